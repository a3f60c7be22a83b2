//! Error taxonomy for the CAN core: one small enum covering every failure
//! surface named in the spec, each with a stable string and (where it
//! wraps one) the underlying OS error.

use crate::link_error::LinkError;
use thiserror::Error;

/// All failure modes the core can produce. `strerror` and `Display` share
/// the same message table via `thiserror`'s `#[error(...)]` strings.
#[derive(Debug, Error)]
pub enum CanError {
    #[error("interface handle was null")]
    NullInterface,
    #[error("failed to resolve interface index: {0}")]
    InterfaceIndex(#[source] std::io::Error),

    #[error("netlink: failed to start interface: {0}")]
    NetlinkStart(#[source] std::io::Error),
    #[error("netlink: failed to stop interface: {0}")]
    NetlinkStop(#[source] std::io::Error),
    #[error("netlink: failed to read interface state: {0}")]
    NetlinkGetState(#[source] std::io::Error),
    #[error("netlink: bitrate set/read mismatch (wrote {written}, read {read})")]
    NetlinkBitrateMismatch { written: u32, read: u32 },
    #[error("netlink: data bitrate set/read mismatch (wrote {written}, read {read})")]
    NetlinkDbitrateMismatch { written: u32, read: u32 },
    #[error("netlink: restart-ms set/read mismatch (wrote {written}, read {read})")]
    NetlinkRestartMsMismatch { written: u32, read: u32 },
    #[error("netlink: ctrl-mode set/read mismatch (wrote {written:#x}, read {read:#x})")]
    NetlinkCtrlModeMismatch { written: u32, read: u32 },
    #[error("netlink: bit-timing set/read mismatch")]
    NetlinkBitTimingMismatch,
    #[error("netlink: failed to read interface statistics: {0}")]
    NetlinkStatsRead(#[source] std::io::Error),

    #[error("failed to create TX socket: {0}")]
    TxSocketCreate(#[source] std::io::Error),
    #[error("failed to bind TX socket: {0}")]
    TxSocketBind(#[source] std::io::Error),
    #[error("failed to create RX socket: {0}")]
    RxSocketCreate(#[source] std::io::Error),
    #[error("failed to bind RX socket: {0}")]
    RxSocketBind(#[source] std::io::Error),

    #[error("failed to configure socket timestamping: {0}")]
    OptTimestamp(#[source] std::io::Error),
    #[error("failed to enable CAN FD frames on socket: {0}")]
    OptFdFrames(#[source] std::io::Error),
    #[error("failed to install raw acceptance filter: {0}")]
    OptRawFilter(#[source] std::io::Error),
    #[error("failed to install error filter: {0}")]
    OptErrorFilter(#[source] std::io::Error),
    #[error("failed to set send buffer size: {0}")]
    OptSendBufSet(#[source] std::io::Error),
    #[error("failed to read send buffer size: {0}")]
    OptSendBufGet(#[source] std::io::Error),
    #[error("failed to set receive buffer size: {0}")]
    OptRecvBufSet(#[source] std::io::Error),
    #[error("failed to read receive buffer size: {0}")]
    OptRecvBufGet(#[source] std::io::Error),

    #[error("send queue full, retry later")]
    TxRetryLater,
    #[error("short write: frame was not written at its full MTU")]
    IncompleteFrame,
    #[error("failed to write frame to TX socket: {0}")]
    TxSocketWrite(#[source] std::io::Error),

    #[error("network interface is down")]
    NetworkDown,
    #[error("readiness wait failed: {0}")]
    PollFailed(#[source] std::io::Error),
    #[error("link error: {0}")]
    Link(#[from] LinkError),
    #[error("receive queue overflowed, frames were dropped")]
    DroppedFrames,
    #[error("CAN FD framing requested but interface is not CAN FD capable")]
    NotCanFd,

    #[error("a handler with this callback identity is already registered")]
    AlreadyRegistered,
    #[error("no handler with this callback identity is registered")]
    NotFound,

    #[error("failed to initialize interface mutex")]
    MutexInit,
    #[error("failed to acquire interface mutex")]
    MutexLock,
    #[error("failed to allocate driver thread")]
    ThreadAlloc,
    #[error("failed to spawn driver thread: {0}")]
    ThreadCreate(#[source] std::io::Error),
}

impl CanError {
    /// Stable small negative integer for this error, matching the taxonomy
    /// in the design notes. `0` is reserved for success.
    pub fn code(&self) -> i32 {
        use CanError::*;
        -(match self {
            NullInterface => 1,
            InterfaceIndex(_) => 2,
            NetlinkStart(_) => 3,
            NetlinkStop(_) => 4,
            NetlinkGetState(_) => 5,
            NetlinkBitrateMismatch { .. } => 6,
            NetlinkDbitrateMismatch { .. } => 7,
            NetlinkRestartMsMismatch { .. } => 8,
            NetlinkCtrlModeMismatch { .. } => 9,
            NetlinkBitTimingMismatch => 10,
            NetlinkStatsRead(_) => 11,
            TxSocketCreate(_) => 12,
            TxSocketBind(_) => 13,
            RxSocketCreate(_) => 14,
            RxSocketBind(_) => 15,
            OptTimestamp(_) => 16,
            OptFdFrames(_) => 17,
            OptRawFilter(_) => 18,
            OptErrorFilter(_) => 19,
            OptSendBufSet(_) => 20,
            OptSendBufGet(_) => 21,
            OptRecvBufSet(_) => 22,
            OptRecvBufGet(_) => 23,
            TxRetryLater => 24,
            IncompleteFrame => 25,
            TxSocketWrite(_) => 26,
            NetworkDown => 27,
            PollFailed(_) => 37,
            Link(_) => 36,
            DroppedFrames => 28,
            NotCanFd => 29,
            AlreadyRegistered => 30,
            NotFound => 31,
            MutexInit => 32,
            MutexLock => 33,
            ThreadAlloc => 34,
            ThreadCreate(_) => 35,
        } as i32)
    }
}

/// Maps a `CanError` to its human-readable string. Success (`None` in the
/// taxonomy) is represented by the absence of an error (`Result::Ok`), so
/// there is no `CanError` variant for it.
pub fn strerror(e: &CanError) -> String {
    e.to_string()
}

pub type CanResult<T> = Result<T, CanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_negative_and_distinct() {
        let errors = [
            CanError::NullInterface,
            CanError::TxRetryLater,
            CanError::IncompleteFrame,
            CanError::NetworkDown,
            CanError::AlreadyRegistered,
            CanError::NotFound,
        ];
        let mut codes: Vec<i32> = errors.iter().map(|e| e.code()).collect();
        for c in &codes {
            assert!(*c < 0);
        }
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn strerror_matches_display() {
        let e = CanError::TxRetryLater;
        assert_eq!(strerror(&e), format!("{}", e));
    }
}
