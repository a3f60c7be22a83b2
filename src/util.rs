//! Small OS-level helpers shared by the endpoint and reactor modules:
//! `setsockopt` wrappers, interface name/index resolution, and the
//! `sockaddr_can` layout.

use crate::constants::AF_CAN;
use std::mem::size_of;
use std::os::raw::{c_int, c_short};
use std::os::unix::prelude::*;

/// `struct sockaddr_can`, interface-index addressed (no J1939/ISO-TP name
/// fields — those addressing modes are out of scope, per §1).
#[derive(Debug, Clone, Copy)]
#[repr(C, align(8))]
pub(crate) struct CanAddr {
    af_can: c_short,
    if_index: c_int,
    _rx_id: u32,
    _tx_id: u32,
}

impl CanAddr {
    pub fn new(if_index: u32) -> Self {
        Self {
            af_can: AF_CAN as c_short,
            if_index: if_index as c_int,
            _rx_id: 0,
            _tx_id: 0,
        }
    }
}

pub(crate) fn set_socket_option<T>(
    fd: RawFd,
    level: c_int,
    name: c_int,
    val: &T,
) -> std::io::Result<()> {
    let result = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            val as *const T as *const libc::c_void,
            size_of::<T>() as libc::socklen_t,
        )
    };
    if result != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

pub(crate) fn get_socket_option<T: Default>(fd: RawFd, level: c_int, name: c_int) -> std::io::Result<T> {
    let mut val = T::default();
    let mut len = size_of::<T>() as libc::socklen_t;
    let result = unsafe {
        libc::getsockopt(
            fd,
            level,
            name,
            &mut val as *mut T as *mut libc::c_void,
            &mut len as *mut libc::socklen_t,
        )
    };
    if result != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(val)
}

/// Resolves an interface name to its kernel index.
pub fn if_nametoindex(name: &str) -> nix::Result<u32> {
    nix::net::if_::if_nametoindex(name)
}

/// Resolves a kernel interface index back to its name, needed when a
/// caller acquires an interface by numeric index but the MTU/ioctl
/// surface still addresses by name.
pub fn if_indextoname(if_index: u32) -> std::io::Result<String> {
    let mut buf = [0u8; libc::IF_NAMESIZE];
    let ret = unsafe { libc::if_indextoname(if_index, buf.as_mut_ptr() as *mut std::os::raw::c_char) };
    if ret.is_null() {
        return Err(std::io::Error::last_os_error());
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Ok(String::from_utf8_lossy(&buf[..len]).into_owned())
}
