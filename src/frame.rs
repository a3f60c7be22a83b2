//! Frame codec: on-the-wire CAN / CAN-FD frame layouts and the pure
//! functions that translate between raw length/DLC and the event record
//! delivered by the reactor.
//!
//! Layouts mirror the kernel's `struct can_frame` / `struct canfd_frame`
//! byte-for-byte, the same approach the teacher's `CANFrame` used for its
//! classic-only frame.

use std::fmt;

/// if set, indicate 29 bit extended format
pub const EFF_FLAG: u32 = 0x8000_0000;
/// remote transmission request flag
pub const RTR_FLAG: u32 = 0x4000_0000;
/// error flag
pub const ERR_FLAG: u32 = 0x2000_0000;
/// valid bits in standard frame id
pub const SFF_MASK: u32 = 0x0000_07ff;
/// valid bits in extended frame id
pub const EFF_MASK: u32 = 0x1fff_ffff;
/// valid bits in an error frame
pub const ERR_MASK: u32 = 0x1fff_ffff;

/// `struct can_frame` MTU, as read/written on a non-FD socket.
pub const CAN_MTU: usize = 16;
/// `struct canfd_frame` MTU, as read/written on an FD-enabled socket.
pub const CANFD_MTU: usize = 72;

const CANFD_BRS: u8 = 0x01;
const CANFD_ESI: u8 = 0x02;

/// `dlc -> length` table, index is the low 4 bits of the DLC.
pub const DLC_TO_LEN: [u8; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 12, 16, 20, 24, 32, 48, 64];

/// `length -> dlc` table, covers payload lengths 0..=64. Lengths above 64
/// are handled separately by `sanitize_length` (saturate to DLC 15).
const LEN_TO_DLC: [u8; 65] = build_len_to_dlc();

const fn build_len_to_dlc() -> [u8; 65] {
    let mut table = [0u8; 65];
    let mut len = 0usize;
    while len <= 64 {
        // smallest dlc index whose table length is >= len
        let mut dlc = 0usize;
        while dlc < 16 && (DLC_TO_LEN[dlc] as usize) < len {
            dlc += 1;
        }
        table[len] = dlc as u8;
        len += 1;
    }
    table
}

/// Maps a DLC (low 4 bits used) to its payload length via `DLC_TO_LEN`.
pub fn dlc_to_len(dlc: u8) -> u8 {
    DLC_TO_LEN[(dlc & 0x0f) as usize]
}

/// Maps a payload length meant for CAN-FD transmission to the smallest
/// legal DLC whose length is `>= raw_len`. Lengths greater than 64
/// saturate to DLC 15 (length 64).
pub fn sanitize_length(raw_len: usize) -> u8 {
    if raw_len > 64 {
        15
    } else {
        LEN_TO_DLC[raw_len]
    }
}

/// True if the reserved error flag is set on a raw (flag-bearing) CAN id.
pub fn is_error_frame(can_id: u32) -> bool {
    can_id & ERR_FLAG != 0
}

/// A classic CAN 2.0 frame, laid out exactly like the kernel's
/// `struct can_frame`.
#[derive(Copy, Clone)]
#[repr(C, align(8))]
pub struct CanFrame {
    id: u32,
    dlc: u8,
    pad: u8,
    res0: u8,
    res1: u8,
    data: [u8; 8],
}

impl CanFrame {
    pub fn new(mut id: u32, data: &[u8], rtr: bool, err: bool) -> Option<Self> {
        if data.len() > 8 || id > EFF_MASK {
            return None;
        }
        if id > SFF_MASK {
            id |= EFF_FLAG;
        }
        if rtr {
            id |= RTR_FLAG;
        }
        if err {
            id |= ERR_FLAG;
        }
        let mut buf = [0u8; 8];
        buf[..data.len()].copy_from_slice(data);
        Some(Self {
            id,
            dlc: data.len() as u8,
            pad: 0,
            res0: 0,
            res1: 0,
            data: buf,
        })
    }

    pub fn id(&self) -> u32 {
        if self.is_extended() {
            self.id & EFF_MASK
        } else {
            self.id & SFF_MASK
        }
    }

    /// Raw id including EFF/RTR/ERR flag bits, used for error-frame decode.
    pub fn raw_id(&self) -> u32 {
        self.id
    }

    pub fn is_extended(&self) -> bool {
        self.id & EFF_FLAG != 0
    }

    pub fn is_rtr(&self) -> bool {
        self.id & RTR_FLAG != 0
    }

    pub fn is_error(&self) -> bool {
        is_error_frame(self.id)
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.dlc as usize]
    }

    pub fn len(&self) -> usize {
        self.dlc as usize
    }

    pub fn is_empty(&self) -> bool {
        self.dlc == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        unsafe {
            std::slice::from_raw_parts((self as *const Self) as *const u8, std::mem::size_of::<Self>())
        }
    }

    /// # Safety
    /// `bytes` must be at least `CAN_MTU` bytes long and hold a valid
    /// `can_frame` as delivered by the kernel.
    pub unsafe fn from_bytes(bytes: &[u8]) -> Self {
        debug_assert!(bytes.len() >= std::mem::size_of::<Self>());
        std::ptr::read_unaligned(bytes.as_ptr() as *const Self)
    }
}

impl fmt::Debug for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CanFrame")
            .field("id", &format_args!("{:#x}", self.id()))
            .field("rtr", &self.is_rtr())
            .field("data", &self.data())
            .finish()
    }
}

/// A CAN-FD frame, laid out exactly like the kernel's `struct canfd_frame`.
#[derive(Copy, Clone)]
#[repr(C, align(8))]
pub struct CanFdFrame {
    id: u32,
    len: u8,
    flags: u8,
    res0: u8,
    res1: u8,
    data: [u8; 64],
}

impl CanFdFrame {
    pub fn new(mut id: u32, data: &[u8], bitrate_switch: bool, esi: bool) -> Option<Self> {
        if id > EFF_MASK {
            return None;
        }
        if id > SFF_MASK {
            id |= EFF_FLAG;
        }
        let dlc = sanitize_length(data.len());
        let len = dlc_to_len(dlc) as usize;
        if data.len() > len {
            return None;
        }
        let mut buf = [0u8; 64];
        buf[..data.len()].copy_from_slice(data);
        let mut flags = 0u8;
        if bitrate_switch {
            flags |= CANFD_BRS;
        }
        if esi {
            flags |= CANFD_ESI;
        }
        Some(Self {
            id,
            len: len as u8,
            flags,
            res0: 0,
            res1: 0,
            data: buf,
        })
    }

    pub fn id(&self) -> u32 {
        if self.id & EFF_FLAG != 0 {
            self.id & EFF_MASK
        } else {
            self.id & SFF_MASK
        }
    }

    pub fn raw_id(&self) -> u32 {
        self.id
    }

    pub fn is_error(&self) -> bool {
        is_error_frame(self.id)
    }

    pub fn bitrate_switch(&self) -> bool {
        self.flags & CANFD_BRS != 0
    }

    pub fn error_state_indicator(&self) -> bool {
        self.flags & CANFD_ESI != 0
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        unsafe {
            std::slice::from_raw_parts((self as *const Self) as *const u8, std::mem::size_of::<Self>())
        }
    }

    /// # Safety
    /// `bytes` must be at least `CANFD_MTU` bytes long and hold a valid
    /// `canfd_frame` as delivered by the kernel.
    pub unsafe fn from_bytes(bytes: &[u8]) -> Self {
        debug_assert!(bytes.len() >= std::mem::size_of::<Self>());
        std::ptr::read_unaligned(bytes.as_ptr() as *const Self)
    }
}

impl fmt::Debug for CanFdFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CanFdFrame")
            .field("id", &format_args!("{:#x}", self.id()))
            .field("data", &self.data())
            .finish()
    }
}

/// Either kind of frame, as handed to a caller after a read. The endpoint
/// that produced it determines which variant is possible: a non-FD
/// endpoint only ever produces `Data`/`Error` built from `CanFrame`; an
/// FD-enabled endpoint may produce `Fd` as well.
#[derive(Debug, Copy, Clone)]
pub enum CanAnyFrame {
    Data(CanFrame),
    Fd(CanFdFrame),
}

impl CanAnyFrame {
    pub fn is_error(&self) -> bool {
        match self {
            CanAnyFrame::Data(f) => f.is_error(),
            CanAnyFrame::Fd(f) => f.is_error(),
        }
    }

    pub fn raw_id(&self) -> u32 {
        match self {
            CanAnyFrame::Data(f) => f.raw_id(),
            CanAnyFrame::Fd(f) => f.raw_id(),
        }
    }

    pub fn data(&self) -> &[u8] {
        match self {
            CanAnyFrame::Data(f) => f.data(),
            CanAnyFrame::Fd(f) => f.data(),
        }
    }
}

/// A transient record assembled by the reactor for every frame it drains.
#[derive(Debug, Clone)]
pub struct Event {
    pub frame: CanAnyFrame,
    /// (seconds, microseconds) since the epoch, or raw hardware clock time
    /// when `hw_timestamp` is enabled. Zero when `process_header` is off.
    pub timestamp: (i64, i64),
    /// Identifies which endpoint produced this event. `None` for the TX
    /// endpoint (it only ever surfaces error frames).
    pub endpoint_id: Option<u64>,
    pub is_rx: bool,
    pub is_error: bool,
    /// Frames the kernel dropped since the last event on this endpoint,
    /// i.e. the delta of the overflow counter, not its absolute value.
    pub dropped_frames: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_encoding_round_trip() {
        let inputs = [0usize, 1, 8, 9, 12, 13, 20, 48, 64, 65, 100];
        let expected = [0u8, 1, 8, 9, 9, 10, 11, 14, 15, 15, 15];
        for (raw, exp) in inputs.iter().zip(expected.iter()) {
            assert_eq!(sanitize_length(*raw), *exp, "raw_len={raw}");
        }
    }

    #[test]
    fn dlc_to_len_table_matches_spec() {
        let expected: [u8; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 12, 16, 20, 24, 32, 48, 64];
        for dlc in 0u8..16 {
            assert_eq!(dlc_to_len(dlc), expected[dlc as usize]);
        }
    }

    #[test]
    fn dlc_round_trip_law() {
        for dlc in 0u8..16 {
            let len = dlc_to_len(dlc);
            assert_eq!(sanitize_length(len as usize), dlc);
        }
    }

    #[test]
    fn sanitize_is_monotone_and_covers() {
        for len in 0usize..=64 {
            let dlc = sanitize_length(len);
            let mapped = dlc_to_len(dlc) as usize;
            assert!(mapped >= len);
            // it must be the smallest such dlc
            if dlc > 0 {
                assert!((dlc_to_len(dlc - 1) as usize) < len);
            }
        }
    }

    #[test]
    fn error_frame_flag_detection() {
        assert!(is_error_frame(ERR_FLAG | 0x123));
        assert!(!is_error_frame(0x123));
    }

    #[test]
    fn frame_construction_rejects_oversized_payload() {
        assert!(CanFrame::new(0x100, &[0u8; 9], false, false).is_none());
        assert!(CanFdFrame::new(0x100, &[0u8; 65], false, false).is_none());
    }

    #[test]
    fn fd_frame_pads_payload_to_next_legal_length() {
        let f = CanFdFrame::new(0x100, &[1, 2, 3, 4, 5, 6, 7, 8, 9], false, false).unwrap();
        assert_eq!(f.len(), 12);
        assert_eq!(&f.data()[..9], &[1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(&f.data()[9..], &[0u8; 3]);
    }
}
