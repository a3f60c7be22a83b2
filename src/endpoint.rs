//! Endpoint: an owned datagram socket bound to one CAN interface, in
//! either TX or RX role. See §4.3.

use crate::ancillary::CmsgEntry;
use crate::constants::*;
use crate::err::CanError;
use crate::util::{self, CanAddr};
use std::mem::{size_of, MaybeUninit};
use std::os::raw::c_void;
use std::os::unix::io::{AsRawFd, RawFd};

const SIOCGIFMTU: libc::c_ulong = 0x8921;

/// A single (id, mask) acceptance filter; a frame is accepted if
/// `received_id & mask == id & mask`.
#[derive(Debug, Copy, Clone)]
#[repr(C)]
pub struct CanFilter {
    pub id: u32,
    pub mask: u32,
}

impl CanFilter {
    pub fn new(id: u32, mask: u32) -> Self {
        Self { id, mask }
    }
}

fn open_raw_socket(nonblocking: bool) -> std::io::Result<RawFd> {
    let mut ty = libc::SOCK_RAW;
    if nonblocking {
        ty |= libc::SOCK_NONBLOCK;
    }
    let fd = unsafe { libc::socket(PF_CAN, ty, CAN_RAW) };
    if fd == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(fd)
}

fn bind_socket(fd: RawFd, if_index: u32) -> std::io::Result<()> {
    let addr = CanAddr::new(if_index);
    let ret = unsafe {
        libc::bind(
            fd,
            &addr as *const CanAddr as *const libc::sockaddr,
            size_of::<CanAddr>() as libc::socklen_t,
        )
    };
    if ret == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

fn interface_mtu(fd: RawFd, if_index: u32, ifname: &str) -> std::io::Result<i32> {
    #[repr(C)]
    struct Ifreq {
        ifr_name: [u8; libc::IFNAMSIZ],
        ifr_mtu: libc::c_int,
    }
    let _ = if_index;
    let mut req: Ifreq = unsafe { MaybeUninit::zeroed().assume_init() };
    let name_bytes = ifname.as_bytes();
    let n = name_bytes.len().min(libc::IFNAMSIZ - 1);
    req.ifr_name[..n].copy_from_slice(&name_bytes[..n]);
    let ret = unsafe { libc::ioctl(fd, SIOCGIFMTU, &mut req as *mut Ifreq) };
    if ret == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(req.ifr_mtu)
}

fn set_fd_frames(fd: RawFd, enable: bool) -> std::io::Result<()> {
    let val: libc::c_int = enable as libc::c_int;
    util::set_socket_option(fd, SOL_CAN_RAW, CAN_RAW_FD_FRAMES, &val)
}

fn set_raw_filter(fd: RawFd, filters: &[CanFilter]) -> std::io::Result<()> {
    if filters.is_empty() {
        let ret = unsafe { libc::setsockopt(fd, SOL_CAN_RAW, CAN_RAW_FILTER, std::ptr::null(), 0) };
        return if ret == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        };
    }
    let ret = unsafe {
        libc::setsockopt(
            fd,
            SOL_CAN_RAW,
            CAN_RAW_FILTER,
            filters.as_ptr() as *const c_void,
            (filters.len() * size_of::<CanFilter>()) as libc::socklen_t,
        )
    };
    if ret == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

fn set_error_filter(fd: RawFd, mask: u32) -> std::io::Result<()> {
    util::set_socket_option(fd, SOL_CAN_RAW, CAN_RAW_ERR_FILTER, &mask)
}

/// Tries the privileged "force" buffer-size variant first, falls back to
/// the ordinary one, then reads back the size the kernel actually granted.
fn set_buf_len_with_fallback(
    fd: RawFd,
    force_opt: libc::c_int,
    plain_opt: libc::c_int,
    requested: u32,
) -> std::io::Result<u32> {
    let val = requested as libc::c_int;
    if util::set_socket_option(fd, SOL_SOCKET, force_opt, &val).is_err() {
        util::set_socket_option(fd, SOL_SOCKET, plain_opt, &val)?;
    }
    let granted: libc::c_int = util::get_socket_option(fd, SOL_SOCKET, plain_opt)?;
    Ok(granted as u32)
}

/// The write-only endpoint shared by producers; carries no user RX
/// handler, but error frames received on it route to the error-handler
/// list (§3).
pub struct TxEndpoint {
    fd: RawFd,
    pub fd_enabled: bool,
    pub granted_tx_buf_len: u32,
}

impl TxEndpoint {
    /// Implements the TX init sequence of §4.3 steps 1-6.
    pub fn open(
        ifname: &str,
        if_index: u32,
        fd_enabled: bool,
        tx_buf_len: u32,
        error_mask: u32,
    ) -> Result<Self, CanError> {
        let fd = open_raw_socket(true).map_err(CanError::TxSocketCreate)?;

        let result = (|| -> Result<(bool, u32), CanError> {
            if fd_enabled {
                let mtu = interface_mtu(fd, if_index, ifname).map_err(CanError::TxSocketCreate)?;
                if mtu as usize != crate::frame::CANFD_MTU {
                    return Err(CanError::NotCanFd);
                }
                set_fd_frames(fd, true).map_err(CanError::OptFdFrames)?;
            }

            set_raw_filter(fd, &[]).map_err(CanError::OptRawFilter)?;

            let granted = if tx_buf_len > 0 {
                set_buf_len_with_fallback(fd, SO_SNDBUFFORCE, SO_SNDBUF, tx_buf_len)
                    .map_err(CanError::OptSendBufSet)?
            } else {
                0
            };

            if error_mask != 0 {
                set_error_filter(fd, error_mask).map_err(CanError::OptErrorFilter)?;
            }

            Ok((fd_enabled, granted))
        })();

        let (fd_enabled, granted_tx_buf_len) = match result {
            Ok(v) => v,
            Err(e) => {
                unsafe {
                    libc::close(fd);
                }
                return Err(e);
            }
        };

        if let Err(e) = bind_socket(fd, if_index) {
            unsafe {
                libc::close(fd);
            }
            return Err(CanError::TxSocketBind(e));
        }

        Ok(Self {
            fd,
            fd_enabled,
            granted_tx_buf_len,
        })
    }

    /// Writes one frame at its appropriate MTU. A short write maps to
    /// `IncompleteFrame`; a full send queue maps to `TxRetryLater`.
    pub fn write(&self, bytes: &[u8]) -> Result<(), CanError> {
        let ret = unsafe { libc::write(self.fd, bytes.as_ptr() as *const c_void, bytes.len()) };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            return match err.kind() {
                std::io::ErrorKind::WouldBlock => Err(CanError::TxRetryLater),
                _ => {
                    if err.raw_os_error() == Some(libc::ENOBUFS) {
                        Err(CanError::TxRetryLater)
                    } else {
                        Err(CanError::TxSocketWrite(err))
                    }
                }
            };
        }
        if ret as usize != bytes.len() {
            return Err(CanError::IncompleteFrame);
        }
        Ok(())
    }

    /// Non-blocking read, used only to drain error frames arriving on the
    /// TX endpoint. Returns `Ok(None)` on a transient would-block.
    pub fn try_read_error(&self, buf: &mut [u8]) -> Result<Option<usize>, CanError> {
        try_read_raw(self.fd, buf)
    }
}

impl Drop for TxEndpoint {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

impl AsRawFd for TxEndpoint {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

/// A filtered read-only endpoint, owned by exactly one interface (§3).
pub struct RxEndpoint {
    fd: RawFd,
    pub fd_enabled: bool,
    pub process_header: bool,
    pub hw_timestamp: bool,
    pub granted_rx_buf_len: u32,
    last_drop_seen: u32,
}

impl RxEndpoint {
    /// Implements the RX init sequence of §4.3 steps 1-7.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        if_index: u32,
        process_header: bool,
        hw_timestamp: bool,
        fd_enabled: bool,
        rx_buf_len: u32,
        error_mask: u32,
        filters: &[CanFilter],
    ) -> Result<Self, CanError> {
        let fd = open_raw_socket(true).map_err(CanError::RxSocketCreate)?;

        let result: Result<u32, CanError> = (|| {
            if process_header {
                let flags = if hw_timestamp {
                    SOF_TIMESTAMPING_SOFTWARE
                        | SOF_TIMESTAMPING_RX_SOFTWARE
                        | SOF_TIMESTAMPING_RAW_HARDWARE
                } else {
                    1u32 // SO_TIMESTAMP is a plain boolean
                };
                let opt = if hw_timestamp { SO_TIMESTAMPING } else { SO_TIMESTAMP };
                util::set_socket_option(fd, SOL_SOCKET, opt, &(flags as libc::c_int))
                    .map_err(CanError::OptTimestamp)?;
            }

            if fd_enabled {
                set_fd_frames(fd, true).map_err(CanError::OptFdFrames)?;
            }

            let granted = if rx_buf_len > 0 {
                set_buf_len_with_fallback(fd, SO_RCVBUFFORCE, SO_RCVBUF, rx_buf_len)
                    .map_err(CanError::OptRecvBufSet)?
            } else {
                0
            };

            if error_mask != 0 {
                set_error_filter(fd, error_mask).map_err(CanError::OptErrorFilter)?;
            }

            if !filters.is_empty() {
                set_raw_filter(fd, filters).map_err(CanError::OptRawFilter)?;
            }

            Ok(granted)
        })();

        let granted_rx_buf_len = match result {
            Ok(v) => v,
            Err(e) => {
                unsafe {
                    libc::close(fd);
                }
                return Err(e);
            }
        };

        if let Err(e) = bind_socket(fd, if_index) {
            unsafe {
                libc::close(fd);
            }
            return Err(CanError::RxSocketBind(e));
        }

        Ok(Self {
            fd,
            fd_enabled,
            process_header,
            hw_timestamp,
            granted_rx_buf_len,
            last_drop_seen: 0,
        })
    }

    /// Non-blocking receive with ancillary data. Returns `Ok(None)` on a
    /// transient would-block condition (drain loop's stop signal).
    pub fn try_read(
        &mut self,
        buf: &mut [u8],
    ) -> Result<Option<(usize, crate::ancillary::Ancillary)>, CanError> {
        let mut iov = libc::iovec {
            iov_base: buf.as_mut_ptr() as *mut c_void,
            iov_len: buf.len(),
        };
        let mut cmsg_buf = [0u8; 256];
        let mut msg: libc::msghdr = unsafe { MaybeUninit::zeroed().assume_init() };
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = cmsg_buf.as_mut_ptr() as *mut c_void;
        msg.msg_controllen = cmsg_buf.len();

        let n = unsafe { libc::recvmsg(self.fd, &mut msg, 0) };
        if n < 0 {
            let err = std::io::Error::last_os_error();
            return match err.kind() {
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted => Ok(None),
                _ if err.raw_os_error() == Some(libc::ENETDOWN) => Err(CanError::NetworkDown),
                _ => Ok(None),
            };
        }

        let cmsgs = parse_cmsgs(&msg);
        let ancillary = crate::ancillary::decode(
            &cmsgs,
            self.process_header,
            self.hw_timestamp,
            self.last_drop_seen,
        );
        self.last_drop_seen = ancillary.drop_total;

        Ok(Some((n as usize, ancillary)))
    }
}

impl Drop for RxEndpoint {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

impl AsRawFd for RxEndpoint {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

fn try_read_raw(fd: RawFd, buf: &mut [u8]) -> Result<Option<usize>, CanError> {
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut c_void, buf.len()) };
    if n < 0 {
        let err = std::io::Error::last_os_error();
        return match err.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted => Ok(None),
            _ if err.raw_os_error() == Some(libc::ENETDOWN) => Err(CanError::NetworkDown),
            _ => Ok(None),
        };
    }
    Ok(Some(n as usize))
}

fn parse_cmsgs(msg: &libc::msghdr) -> Vec<CmsgEntry> {
    let mut out = Vec::new();
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(msg);
        while !cmsg.is_null() {
            let c = &*cmsg;
            let data_len = (c.cmsg_len as usize).saturating_sub(libc::CMSG_LEN(0) as usize);
            let data_ptr = libc::CMSG_DATA(cmsg);
            let data = std::slice::from_raw_parts(data_ptr, data_len).to_vec();
            out.push(CmsgEntry {
                level: c.cmsg_level,
                cmsg_type: c.cmsg_type,
                data,
            });
            cmsg = libc::CMSG_NXTHDR(msg as *const _ as *mut _, cmsg);
        }
    }
    out
}
