//! The netlink-based interface configuration layer is an external
//! collaborator (§1(i)) — only its call surface is fixed here. This module
//! pins that surface down as a trait so the rest of the crate can be built
//! and tested without a real netlink implementation.

use crate::err::CanError;

/// Controller mode bits, applied as a mask (§3 `ctrl_mode`).
pub mod ctrl_mode {
    pub const LOOPBACK: u32 = 1 << 0;
    pub const LISTEN_ONLY: u32 = 1 << 1;
    pub const TRIPLE_SAMPLING: u32 = 1 << 2;
    pub const ONE_SHOT: u32 = 1 << 3;
    pub const BERR_REPORTING: u32 = 1 << 4;
    pub const FD: u32 = 1 << 5;
    pub const FD_NON_ISO: u32 = 1 << 6;
    pub const PRESUME_ACK: u32 = 1 << 7;
}

/// Link-level error classes, applied as a mask (§3 `error_mask`).
pub mod error_class {
    pub const TX_TIMEOUT: u32 = 1 << 0;
    pub const CONTROLLER: u32 = 1 << 2;
    pub const BUS_OFF: u32 = 1 << 6;
    pub const BUS_ERROR: u32 = 1 << 7;
    pub const RESTARTED: u32 = 1 << 8;
}

/// The five error classes delivered by default (§6).
pub const DEFAULT_ERROR_MASK: u32 =
    error_class::TX_TIMEOUT | error_class::CONTROLLER | error_class::BUS_OFF | error_class::BUS_ERROR | error_class::RESTARTED;

/// Sentinel meaning "leave as set externally" for `bitrate`/`dbitrate`/
/// `restart_ms`.
pub const INVALID_RATE: u32 = u32::MAX;
/// Sentinel meaning "unconfigured" for `ctrl_mode`.
pub const UNCONFIGURED_CTRL_MODE: u32 = u32::MAX;

/// Bit timing parameters, applied verbatim when `bit_timing` is `Some`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BitTiming {
    pub prop_seg: u32,
    pub phase_seg1: u32,
    pub phase_seg2: u32,
    pub sjw: u32,
}

/// Call surface fixed by §6: start/stop, bitrate/dbitrate, restart-ms,
/// control mode, bit timing, statistics. Each setter is responsible for
/// its own read-back-and-compare when `verify` is requested; a mismatch
/// is reported as the matching `Netlink*Mismatch` error.
pub trait NetlinkHandle {
    fn start(&mut self, if_index: u32) -> Result<(), CanError>;
    fn stop(&mut self, if_index: u32) -> Result<(), CanError>;
    fn is_up(&self, if_index: u32) -> Result<bool, CanError>;

    fn set_bitrate(&mut self, if_index: u32, bitrate: u32, verify: bool) -> Result<(), CanError>;
    fn set_dbitrate(&mut self, if_index: u32, dbitrate: u32, verify: bool) -> Result<(), CanError>;
    fn set_restart_ms(&mut self, if_index: u32, restart_ms: u32, verify: bool) -> Result<(), CanError>;
    fn set_ctrl_mode(&mut self, if_index: u32, mask: u32, verify: bool) -> Result<(), CanError>;
    fn set_bit_timing(&mut self, if_index: u32, timing: BitTiming, verify: bool) -> Result<(), CanError>;

    fn read_stats(&self, if_index: u32) -> Result<InterfaceStats, CanError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InterfaceStats {
    pub rx_errors: u64,
    pub tx_errors: u64,
    pub bus_errors: u64,
}

/// A no-op netlink handle: every write succeeds immediately and read-back
/// echoes the written value, so `nl_cmd_verify` never fails. Useful for
/// callers who only need the socket-level behavior of this crate and
/// manage interface configuration themselves (e.g. via `ip link`).
#[derive(Debug, Default)]
pub struct NullNetlink;

impl NetlinkHandle for NullNetlink {
    fn start(&mut self, _if_index: u32) -> Result<(), CanError> {
        Ok(())
    }
    fn stop(&mut self, _if_index: u32) -> Result<(), CanError> {
        Ok(())
    }
    fn is_up(&self, _if_index: u32) -> Result<bool, CanError> {
        Ok(true)
    }
    fn set_bitrate(&mut self, _if_index: u32, _bitrate: u32, _verify: bool) -> Result<(), CanError> {
        Ok(())
    }
    fn set_dbitrate(&mut self, _if_index: u32, _dbitrate: u32, _verify: bool) -> Result<(), CanError> {
        Ok(())
    }
    fn set_restart_ms(&mut self, _if_index: u32, _restart_ms: u32, _verify: bool) -> Result<(), CanError> {
        Ok(())
    }
    fn set_ctrl_mode(&mut self, _if_index: u32, _mask: u32, _verify: bool) -> Result<(), CanError> {
        Ok(())
    }
    fn set_bit_timing(&mut self, _if_index: u32, _timing: BitTiming, _verify: bool) -> Result<(), CanError> {
        Ok(())
    }
    fn read_stats(&self, _if_index: u32) -> Result<InterfaceStats, CanError> {
        Ok(InterfaceStats::default())
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::HashMap;

    /// Records every write so tests can assert on netlink call order and
    /// content, and can be told to simulate a verify mismatch.
    #[derive(Default)]
    pub struct FakeNetlink {
        pub up: HashMap<u32, bool>,
        pub bitrate: HashMap<u32, u32>,
        pub dbitrate: HashMap<u32, u32>,
        pub restart_ms: HashMap<u32, u32>,
        pub ctrl_mode: HashMap<u32, u32>,
        pub calls: Vec<String>,
        pub fail_bitrate_readback: bool,
    }

    impl NetlinkHandle for FakeNetlink {
        fn start(&mut self, if_index: u32) -> Result<(), CanError> {
            self.calls.push("start".into());
            self.up.insert(if_index, true);
            Ok(())
        }
        fn stop(&mut self, if_index: u32) -> Result<(), CanError> {
            self.calls.push("stop".into());
            self.up.insert(if_index, false);
            Ok(())
        }
        fn is_up(&self, if_index: u32) -> Result<bool, CanError> {
            Ok(*self.up.get(&if_index).unwrap_or(&false))
        }
        fn set_bitrate(&mut self, if_index: u32, bitrate: u32, verify: bool) -> Result<(), CanError> {
            self.calls.push("set_bitrate".into());
            self.bitrate.insert(if_index, bitrate);
            if verify {
                let read = if self.fail_bitrate_readback { bitrate.wrapping_add(1) } else { bitrate };
                if read != bitrate {
                    return Err(CanError::NetlinkBitrateMismatch { written: bitrate, read });
                }
            }
            Ok(())
        }
        fn set_dbitrate(&mut self, if_index: u32, dbitrate: u32, _verify: bool) -> Result<(), CanError> {
            self.calls.push("set_dbitrate".into());
            self.dbitrate.insert(if_index, dbitrate);
            Ok(())
        }
        fn set_restart_ms(&mut self, if_index: u32, restart_ms: u32, _verify: bool) -> Result<(), CanError> {
            self.calls.push("set_restart_ms".into());
            self.restart_ms.insert(if_index, restart_ms);
            Ok(())
        }
        fn set_ctrl_mode(&mut self, if_index: u32, mask: u32, _verify: bool) -> Result<(), CanError> {
            self.calls.push("set_ctrl_mode".into());
            self.ctrl_mode.insert(if_index, mask);
            Ok(())
        }
        fn set_bit_timing(&mut self, _if_index: u32, _timing: BitTiming, _verify: bool) -> Result<(), CanError> {
            self.calls.push("set_bit_timing".into());
            Ok(())
        }
        fn read_stats(&self, _if_index: u32) -> Result<InterfaceStats, CanError> {
            Ok(InterfaceStats::default())
        }
    }

    #[test]
    fn bitrate_mismatch_surfaces_as_error() {
        let mut nl = FakeNetlink {
            fail_bitrate_readback: true,
            ..Default::default()
        };
        let err = nl.set_bitrate(1, 500_000, true).unwrap_err();
        matches!(err, CanError::NetlinkBitrateMismatch { .. });
    }
}
