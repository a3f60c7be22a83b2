//! Ancillary decoder: turns a received datagram's control-message chain
//! into a timestamp and a dropped-frame delta.
//!
//! The kernel control messages of interest all live at `SOL_SOCKET`:
//! `SO_TIMESTAMP` (software timestamp, `timeval`), `SO_TIMESTAMPING`
//! (three `timespec`s: software, deprecated, raw hardware) and
//! `SO_RXQ_OVFL` (`u32` overflow counter). Everything else is ignored, per
//! §4.2.

use std::os::raw::c_int;

pub const SOL_SOCKET: c_int = 1;
pub const SCM_TIMESTAMP: c_int = 29; // SO_TIMESTAMP
pub const SCM_TIMESTAMPING: c_int = 37; // SO_TIMESTAMPING
pub const SCM_RXQ_OVFL: c_int = 40; // SO_RXQ_OVFL

/// One control message as handed back by the platform's `recvmsg`. Owning
/// the raw bytes here (rather than borrowing from the `msghdr` directly)
/// keeps this module free of any particular recvmsg wrapper, so it can be
/// unit tested without a live socket.
pub struct CmsgEntry {
    pub level: c_int,
    pub cmsg_type: c_int,
    pub data: Vec<u8>,
}

/// Result of decoding one datagram's ancillary data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ancillary {
    /// (seconds, microseconds).
    pub timestamp: (i64, i64),
    /// `current - previously_seen` for the overflow counter.
    pub drop_delta: u32,
    /// The raw counter value, to be remembered as "previously seen" for
    /// the next call on this endpoint.
    pub drop_total: u32,
}

fn read_i64_pair(data: &[u8], offset: usize) -> Option<(i64, i64)> {
    // struct timeval / timespec on a 64-bit Linux host: two i64 fields.
    if data.len() < offset + 16 {
        return None;
    }
    let mut a = [0u8; 8];
    let mut b = [0u8; 8];
    a.copy_from_slice(&data[offset..offset + 8]);
    b.copy_from_slice(&data[offset + 8..offset + 16]);
    Some((i64::from_ne_bytes(a), i64::from_ne_bytes(b)))
}

fn read_u32(data: &[u8]) -> Option<u32> {
    if data.len() < 4 {
        return None;
    }
    let mut b = [0u8; 4];
    b.copy_from_slice(&data[..4]);
    Some(u32::from_ne_bytes(b))
}

/// Decodes one datagram's control-message chain. `process_header` and
/// `hw_timestamp` mirror the owning interface's configuration;
/// `last_drop_seen` is the endpoint's previously observed `SO_RXQ_OVFL`
/// value (0 if none yet). If `process_header` is false the whole chain is
/// skipped, per §4.2, and a zeroed `Ancillary` is returned.
pub fn decode(cmsgs: &[CmsgEntry], process_header: bool, hw_timestamp: bool, last_drop_seen: u32) -> Ancillary {
    if !process_header {
        return Ancillary::default();
    }

    let mut result = Ancillary {
        drop_total: last_drop_seen,
        ..Ancillary::default()
    };

    for cmsg in cmsgs {
        if cmsg.level != SOL_SOCKET {
            continue;
        }
        match cmsg.cmsg_type {
            SCM_RXQ_OVFL => {
                if let Some(total) = read_u32(&cmsg.data) {
                    result.drop_delta = total.wrapping_sub(last_drop_seen);
                    result.drop_total = total;
                }
            }
            SCM_TIMESTAMP if !hw_timestamp => {
                if let Some((sec, usec)) = read_i64_pair(&cmsg.data, 0) {
                    result.timestamp = (sec, usec);
                }
            }
            SCM_TIMESTAMPING if hw_timestamp => {
                // three timespecs back to back; element index 2 is the raw
                // hardware clock, given in (seconds, nanoseconds).
                if let Some((sec, nsec)) = read_i64_pair(&cmsg.data, 32) {
                    result.timestamp = (sec, nsec / 1000);
                }
            }
            _ => {}
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeval_bytes(sec: i64, usec: i64) -> Vec<u8> {
        let mut v = Vec::with_capacity(16);
        v.extend_from_slice(&sec.to_ne_bytes());
        v.extend_from_slice(&usec.to_ne_bytes());
        v
    }

    fn timestamping_bytes(sw: (i64, i64), deprecated: (i64, i64), raw: (i64, i64)) -> Vec<u8> {
        let mut v = Vec::with_capacity(48);
        v.extend_from_slice(&timeval_bytes(sw.0, sw.1));
        v.extend_from_slice(&timeval_bytes(deprecated.0, deprecated.1));
        v.extend_from_slice(&timeval_bytes(raw.0, raw.1));
        v
    }

    #[test]
    fn process_header_off_yields_zero() {
        let cmsgs = [CmsgEntry {
            level: SOL_SOCKET,
            cmsg_type: SCM_TIMESTAMP,
            data: timeval_bytes(5, 6),
        }];
        let a = decode(&cmsgs, false, false, 0);
        assert_eq!(a, Ancillary::default());
    }

    #[test]
    fn software_timestamp_is_copied() {
        let cmsgs = [CmsgEntry {
            level: SOL_SOCKET,
            cmsg_type: SCM_TIMESTAMP,
            data: timeval_bytes(10, 20),
        }];
        let a = decode(&cmsgs, true, false, 0);
        assert_eq!(a.timestamp, (10, 20));
    }

    #[test]
    fn hardware_timestamp_takes_element_two_in_microseconds() {
        let cmsgs = [CmsgEntry {
            level: SOL_SOCKET,
            cmsg_type: SCM_TIMESTAMPING,
            data: timestamping_bytes((10, 0), (0, 0), (42, 750_000_000)),
        }];
        let a = decode(&cmsgs, true, true, 0);
        assert_eq!(a.timestamp, (42, 750_000));
    }

    #[test]
    fn drop_accounting_scenario() {
        let mk = |total: u32| {
            vec![CmsgEntry {
                level: SOL_SOCKET,
                cmsg_type: SCM_RXQ_OVFL,
                data: total.to_ne_bytes().to_vec(),
            }]
        };
        let mut last = 0u32;
        let mut deltas = Vec::new();
        for total in [0u32, 0, 5] {
            let a = decode(&mk(total), true, false, last);
            deltas.push(a.drop_delta);
            last = a.drop_total;
        }
        assert_eq!(deltas, vec![0, 0, 5]);
    }

    #[test]
    fn unrelated_cmsg_is_ignored() {
        let cmsgs = [CmsgEntry {
            level: 42,
            cmsg_type: 7,
            data: vec![1, 2, 3],
        }];
        let a = decode(&cmsgs, true, false, 0);
        assert_eq!(a, Ancillary::default());
    }
}
