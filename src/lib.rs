//! Core of a user-space library that opens, configures, and multiplexes
//! CAN / CAN-FD traffic on a host exposing SocketCAN-style raw sockets
//! addressed by interface index.
//!
//! This crate owns: per-interface lifecycle, a single shared TX endpoint,
//! an arbitrary number of filtered RX endpoints, a reactor that
//! multiplexes all of them and dispatches frames/errors/overflow
//! notifications to user handlers, and an optional driver thread that
//! drives the reactor continuously. Netlink-based interface configuration
//! is an external collaborator — see [`netlink::NetlinkHandle`].

pub mod ancillary;
pub mod constants;
pub mod endpoint;
pub mod err;
pub mod frame;
pub mod link_error;
pub mod logging;
pub mod netlink;
mod reactor;
mod registry;
mod util;
mod worker;

pub use endpoint::CanFilter;
pub use err::{strerror, CanError, CanResult};
pub use frame::{CanAnyFrame, CanFdFrame, CanFrame, Event};
pub use link_error::LinkError;
pub use netlink::{ctrl_mode, error_class, BitTiming, NetlinkHandle, NullNetlink};
pub use registry::{Configuration, ErrorCallback, RxCallback};

use endpoint::TxEndpoint;
use registry::Interface;
use std::sync::Arc;
use std::time::Duration;

/// Identifies which CAN interface to acquire, by name or by kernel index.
pub enum IfaceRef<'a> {
    Name(&'a str),
    Index(u32),
}

/// An acquired interface. Constructed with [`request`], configured and
/// started with [`CanInterface::init`], torn down with
/// [`CanInterface::free`].
#[derive(Clone)]
pub struct CanInterface(Arc<Interface>);

/// `request(name|index)`: allocates and pre-wires a fresh interface with
/// empty handler lists and the default poll timeout. Does not open any
/// endpoint.
pub fn request(iface: IfaceRef<'_>) -> CanResult<CanInterface> {
    logging::init();
    let (name, if_index) = match iface {
        IfaceRef::Name(name) => {
            if name.as_bytes().len() > libc::IFNAMSIZ - 1 {
                return Err(CanError::NullInterface);
            }
            let idx = util::if_nametoindex(name)
                .map_err(|e| CanError::InterfaceIndex(std::io::Error::new(std::io::ErrorKind::NotFound, e.to_string())))?;
            (name.to_owned(), idx)
        }
        IfaceRef::Index(idx) => {
            let name = util::if_indextoname(idx).map_err(CanError::InterfaceIndex)?;
            (name, idx)
        }
    };
    Ok(CanInterface(Arc::new(Interface::new(name, if_index)?)))
}

impl CanInterface {
    /// `init(interface, configuration)`: applies netlink configuration if
    /// non-sentinel, starts the interface, opens and binds the TX
    /// endpoint, registers the default error handler, and (unless
    /// `polled_mode`) spawns the driver thread.
    pub fn init(&self, mut config: Configuration, netlink: &mut dyn NetlinkHandle) -> CanResult<()> {
        let if_index = self.0.if_index;

        if config.bitrate != netlink::INVALID_RATE {
            netlink.set_bitrate(if_index, config.bitrate, config.nl_cmd_verify)?;
        }
        if config.dbitrate != netlink::INVALID_RATE {
            netlink.set_dbitrate(if_index, config.dbitrate, config.nl_cmd_verify)?;
        }
        if config.restart_ms != netlink::INVALID_RATE {
            netlink.set_restart_ms(if_index, config.restart_ms, config.nl_cmd_verify)?;
        }
        if config.ctrl_mode != netlink::UNCONFIGURED_CTRL_MODE {
            netlink.set_ctrl_mode(if_index, config.ctrl_mode, config.nl_cmd_verify)?;
        }
        if let Some(timing) = config.bit_timing {
            netlink.set_bit_timing(if_index, timing, config.nl_cmd_verify)?;
        }

        netlink.start(if_index)?;

        let tx = TxEndpoint::open(&self.0.name, if_index, config.canfd_enabled, config.tx_buf_len, config.error_mask)?;
        config.granted_tx_buf_len = tx.granted_tx_buf_len;

        // Install the effective configuration before the TX endpoint and
        // error handler become visible to a concurrently spawned worker.
        self.0.set_config(config.clone());
        self.0.set_tx(tx)?;
        self.0.register_error_handler(registry::default_error_handler())?;
        self.0.lock().run = true;

        if !config.polled_mode {
            let (handle, shutdown_tx) = worker::spawn(Arc::clone(&self.0))?;
            *self.0.worker.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
            *self.0.worker_shutdown.lock().unwrap_or_else(|e| e.into_inner()) = Some(shutdown_tx);
        }

        Ok(())
    }

    /// `free(interface)`: clears the run flag, joins the driver thread,
    /// then releases the TX endpoint and all remaining RX endpoints and
    /// handler records (§9 #4: in that order, not mutex-before-join).
    pub fn free(self) -> CanResult<()> {
        self.0.lock().run = false;
        if let Some(shutdown) = self.0.worker_shutdown.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = shutdown.send(());
        }
        if let Some(handle) = self.0.worker.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = handle.join();
        }
        // Dropping the last `Arc<Interface>` runs `InterfaceState`'s
        // drop glue: the TX endpoint and every remaining RX endpoint
        // close their sockets, and handler records are freed with them.
        Ok(())
    }

    /// `tx_frame(interface, frame)`: writes one frame at its MTU. Maps a
    /// full send queue to `TxRetryLater` and a short write to
    /// `IncompleteFrame` (§4.1, §4.7).
    pub fn tx_frame(&self, frame: &CanAnyFrame) -> CanResult<()> {
        let state = self.0.lock();
        let tx = state.tx.as_ref().ok_or(CanError::NullInterface)?;
        match frame {
            CanAnyFrame::Data(f) => tx.write(f.as_bytes()),
            CanAnyFrame::Fd(f) => tx.write(f.as_bytes()),
        }
    }

    pub fn register_error_handler(&self, callback: ErrorCallback) -> CanResult<()> {
        self.0.register_error_handler(callback)
    }

    pub fn unregister_error_handler(&self, callback: &ErrorCallback) -> CanResult<()> {
        self.0.unregister_error_handler(callback)
    }

    /// `register_rx_handler(interface, callback, filters)`: atomically
    /// opens an RX endpoint with the given filter vector and links a
    /// handler record to it. Returns the new endpoint's identifier.
    pub fn register_rx_handler(&self, callback: RxCallback, filters: &[CanFilter]) -> CanResult<u64> {
        self.0.register_rx_handler(filters, callback)
    }

    /// `unregister_rx_handler(callback)`: closes the endpoint and drops
    /// the record.
    pub fn unregister_rx_handler(&self, callback: &RxCallback) -> CanResult<()> {
        self.0.unregister_rx_handler(callback)
    }

    /// `open_rx_socket`: opens an RX endpoint without a callback, for
    /// poll-one workflows.
    pub fn open_rx_socket(&self, filters: &[CanFilter]) -> CanResult<u64> {
        self.0.open_rx_socket(filters)
    }

    pub fn close_rx_socket(&self, endpoint_id: u64) -> CanResult<()> {
        self.0.close_rx_socket(endpoint_id)
    }

    pub fn set_thread_poll_rate(&self, timeout: Duration) {
        self.0.set_poll_timeout(timeout);
    }

    pub fn set_thread_poll_rate_msec(&self, msec: u64) {
        self.0.set_poll_timeout(Duration::from_millis(msec));
    }

    /// Pumps the reactor synchronously. Only meaningful when `polled_mode`
    /// was set (no driver thread is running); otherwise the driver thread
    /// is already doing this.
    pub fn poll(&self, timeout: Duration) -> i32 {
        reactor::poll(&self.0, timeout)
    }

    pub fn poll_msec(&self, msec: u64) -> i32 {
        reactor::poll_msec(&self.0, msec)
    }

    pub fn poll_one(&self, timeout: Duration) -> Option<Event> {
        reactor::poll_one(&self.0, timeout)
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn if_index(&self) -> u32 {
        self.0.if_index
    }

    pub fn rx_endpoint_count(&self) -> usize {
        self.0.rx_endpoint_count()
    }

    pub fn config(&self) -> Configuration {
        self.0.config_snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_interface() -> CanInterface {
        CanInterface(Arc::new(Interface::new("vcan0".into(), 1).unwrap()))
    }

    #[test]
    fn request_rejects_overlong_names() {
        let err = request(IfaceRef::Name("way-too-long-interface-name-really")).unwrap_err();
        assert!(matches!(err, CanError::NullInterface));
    }

    #[test]
    fn duplicate_error_handler_registration_is_rejected() {
        let iface = test_interface();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let handler: ErrorCallback = Arc::new(move |_| {
            calls2.fetch_add(1, Ordering::SeqCst);
        });
        iface.register_error_handler(handler.clone()).unwrap();
        let err = iface.register_error_handler(handler).unwrap_err();
        assert!(matches!(err, CanError::AlreadyRegistered));
    }

    #[test]
    fn unregister_missing_handler_is_not_found() {
        let iface = test_interface();
        let handler: ErrorCallback = Arc::new(|_| {});
        let err = iface.unregister_error_handler(&handler).unwrap_err();
        assert!(matches!(err, CanError::NotFound));
    }

    #[test]
    fn duplicate_rx_handler_leaves_endpoint_count_unchanged() {
        let iface = test_interface();
        // No real socket is opened here since `register_rx_handler` would
        // fail on a host without `vcan0`; this only exercises the identity
        // check, which runs before any endpoint is opened.
        let handler: RxCallback = Arc::new(|_| {});
        let first = iface.register_rx_handler(handler.clone(), &[]);
        let before = iface.rx_endpoint_count();
        let second = iface.register_rx_handler(handler, &[]);
        if first.is_ok() {
            assert!(matches!(second, Err(CanError::AlreadyRegistered)));
            assert_eq!(iface.rx_endpoint_count(), before);
        }
    }
}
