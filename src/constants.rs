//! Raw constants for the `AF_CAN` / `SOL_CAN_RAW` socket API, "stolen from
//! C headers" in the teacher's own words (`linux/can.h`, `linux/can/raw.h`,
//! `asm-generic/socket.h`).

use std::os::raw::c_int;

pub const AF_CAN: c_int = 29;
pub const PF_CAN: c_int = 29;
pub const CAN_RAW: c_int = 1;

pub const SOL_CAN_BASE: c_int = 100;
pub const SOL_CAN_RAW: c_int = SOL_CAN_BASE + CAN_RAW;

pub const CAN_RAW_FILTER: c_int = 1;
pub const CAN_RAW_ERR_FILTER: c_int = 2;
pub const CAN_RAW_FD_FRAMES: c_int = 5;

// asm-generic/socket.h
pub const SOL_SOCKET: c_int = 1;
pub const SO_SNDBUF: c_int = 7;
pub const SO_RCVBUF: c_int = 8;
pub const SO_TIMESTAMP: c_int = 29;
pub const SO_SNDBUFFORCE: c_int = 32;
pub const SO_RCVBUFFORCE: c_int = 33;
pub const SO_TIMESTAMPING: c_int = 37;
pub const SO_RXQ_OVFL: c_int = 40;

pub const SOF_TIMESTAMPING_SOFTWARE: u32 = 1 << 4;
pub const SOF_TIMESTAMPING_RX_SOFTWARE: u32 = 1 << 3;
pub const SOF_TIMESTAMPING_RAW_HARDWARE: u32 = 1 << 6;
