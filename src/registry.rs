//! Interface Registry: the per-interface aggregate named in §3/§4.4 —
//! configuration snapshot, TX endpoint, RX endpoint set, handler tables,
//! readiness set, and the mutex that guards all of it.

use crate::endpoint::{CanFilter, RxEndpoint, TxEndpoint};
use crate::err::{CanError, CanResult};
use crate::frame::Event;
use crate::netlink::{self, BitTiming};
use mio::unix::SourceFd;
use mio::{Interest, Poll, Registry, Token};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub type RxCallback = Arc<dyn Fn(&Event) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&CanError) + Send + Sync>;

static NEXT_CALLBACK_ID: AtomicU64 = AtomicU64::new(1);

/// A stable handle a caller keeps in order to unregister a callback later.
/// §9: "callback identity is compared by the address-of-function
/// semantics of the host language" — in Rust that is the identity of the
/// `Arc`'s allocation, so unregistering compares with `Arc::ptr_eq`
/// against the stored callback directly; `CallbackId` exists only so
/// handler records can be listed/logged without cloning the callback.
#[derive(Clone)]
pub struct CallbackId(u64);

impl CallbackId {
    fn new() -> Self {
        Self(NEXT_CALLBACK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// The Configuration record (§3), with `set_defconfig`'s values (§6) as
/// the `Default` impl.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub nl_cmd_verify: bool,
    pub canfd_enabled: bool,
    pub process_header: bool,
    pub hw_timestamp: bool,
    pub bitrate: u32,
    pub dbitrate: u32,
    pub restart_ms: u32,
    pub ctrl_mode: u32,
    pub bit_timing: Option<BitTiming>,
    pub error_mask: u32,
    pub polled_mode: bool,
    pub tx_buf_len: u32,
    pub rx_buf_len: u32,
    pub granted_tx_buf_len: u32,
    pub granted_rx_buf_len: u32,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            nl_cmd_verify: true,
            canfd_enabled: false,
            process_header: true,
            hw_timestamp: false,
            bitrate: netlink::INVALID_RATE,
            dbitrate: netlink::INVALID_RATE,
            restart_ms: netlink::INVALID_RATE,
            ctrl_mode: netlink::UNCONFIGURED_CTRL_MODE,
            bit_timing: None,
            error_mask: netlink::DEFAULT_ERROR_MASK,
            polled_mode: false,
            tx_buf_len: 0,
            rx_buf_len: 0,
            granted_tx_buf_len: 0,
            granted_rx_buf_len: 0,
        }
    }
}

pub(crate) struct RxSlot {
    pub(crate) token: Token,
    pub(crate) endpoint: RxEndpoint,
    pub(crate) handler: Option<RxCallback>,
}

impl RxSlot {
    pub(crate) fn endpoint_id(&self) -> u64 {
        self.token.0 as u64
    }
}

/// Everything that mutates under the interface mutex: the TX endpoint,
/// the RX endpoint list (in registration order — §9 accepts a contiguous
/// collection with swap-remove in place of the source's intrusive list),
/// the error handler table, the worker's poll timeout, and the run flag.
pub(crate) struct InterfaceState {
    pub(crate) config: Configuration,
    pub(crate) tx: Option<TxEndpoint>,
    pub(crate) rx_slots: Vec<RxSlot>,
    pub(crate) error_handlers: Vec<(CallbackId, ErrorCallback)>,
    pub(crate) poll_timeout: Duration,
    pub(crate) run: bool,
    next_token_id: usize,
}

/// The per-interface aggregate (§3/§4.4). Mutable fields live behind
/// `state`; `poll`/`registry` are a separate readiness-set mechanism (see
/// DESIGN.md) that lets `register_rx_handler`/`unregister_rx_handler`
/// proceed while the driver thread is blocked inside the kernel readiness
/// wait: `mio::Registry` allows concurrent `register`/`deregister` while
/// another thread holds `poll` locked inside `Poll::poll`, so no
/// defensive cloning of the fd set is needed.
pub struct Interface {
    pub name: String,
    pub if_index: u32,
    pub(crate) state: Mutex<InterfaceState>,
    pub(crate) poll: Mutex<Poll>,
    pub(crate) registry: Registry,
    pub(crate) worker: Mutex<Option<std::thread::JoinHandle<()>>>,
    pub(crate) worker_shutdown: Mutex<Option<crossbeam::channel::Sender<()>>>,
}

pub(crate) const TX_TOKEN: Token = Token(0);

pub(crate) fn default_error_handler() -> ErrorCallback {
    Arc::new(|e: &CanError| {
        log::error!(target: "ldxcan", "{}", e);
    })
}

impl Interface {
    /// `request(name|index)`: allocate and pre-wire a fresh interface with
    /// empty handler lists and the default poll timeout. Does not open
    /// any endpoint — that happens in `init`.
    pub(crate) fn new(name: String, if_index: u32) -> CanResult<Self> {
        let poll = Poll::new().map_err(|_| CanError::ThreadAlloc)?;
        let registry = poll.registry().try_clone().map_err(|_| CanError::ThreadAlloc)?;
        Ok(Self {
            name,
            if_index,
            state: Mutex::new(InterfaceState {
                config: Configuration::default(),
                tx: None,
                rx_slots: Vec::new(),
                error_handlers: Vec::new(),
                poll_timeout: Duration::from_secs(1),
                run: false,
                next_token_id: 1,
            }),
            poll: Mutex::new(poll),
            registry,
            worker: Mutex::new(None),
            worker_shutdown: Mutex::new(None),
        })
    }

    pub(crate) fn lock(&self) -> std::sync::MutexGuard<'_, InterfaceState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Installs the effective configuration. Called once from `init`
    /// before the driver thread is spawned; every other read of `config`
    /// happens under the same state lock, so there is no race.
    pub(crate) fn set_config(&self, config: Configuration) {
        self.lock().config = config;
    }

    pub(crate) fn config_snapshot(&self) -> Configuration {
        self.lock().config.clone()
    }

    pub(crate) fn set_tx(&self, tx: TxEndpoint) -> CanResult<()> {
        let mut state = self.lock();
        self.registry
            .register(&mut SourceFd(&tx.as_raw_fd()), TX_TOKEN, Interest::READABLE)
            .map_err(|_| CanError::TxSocketBind(std::io::Error::last_os_error()))?;
        state.tx = Some(tx);
        Ok(())
    }

    /// Registers a handler and opens an RX endpoint for it atomically,
    /// per §4.7 `register_rx_handler`. Rejects a duplicate callback
    /// identity *before* opening a socket, so the endpoint count is
    /// unaffected by a failed registration (§8 scenario 2).
    pub(crate) fn register_rx_handler(
        &self,
        filters: &[CanFilter],
        callback: RxCallback,
    ) -> CanResult<u64> {
        let mut state = self.lock();
        if state
            .rx_slots
            .iter()
            .any(|s| s.handler.as_ref().map_or(false, |h| Arc::ptr_eq(h, &callback)))
        {
            return Err(CanError::AlreadyRegistered);
        }

        let endpoint = RxEndpoint::open(
            self.if_index,
            state.config.process_header,
            state.config.hw_timestamp,
            state.config.canfd_enabled,
            state.config.rx_buf_len,
            state.config.error_mask,
            filters,
        )?;

        let token = Token(state.next_token_id);
        state.next_token_id += 1;
        self.registry
            .register(&mut SourceFd(&endpoint.as_raw_fd()), token, Interest::READABLE)
            .map_err(|_| CanError::RxSocketBind(std::io::Error::last_os_error()))?;

        state.rx_slots.push(RxSlot {
            token,
            endpoint,
            handler: Some(callback),
        });
        Ok(token.0 as u64)
    }

    /// `open_rx_socket`: same as `register_rx_handler` but with no
    /// callback, for poll-one workflows.
    pub(crate) fn open_rx_socket(&self, filters: &[CanFilter]) -> CanResult<u64> {
        let mut state = self.lock();
        let endpoint = RxEndpoint::open(
            self.if_index,
            state.config.process_header,
            state.config.hw_timestamp,
            state.config.canfd_enabled,
            state.config.rx_buf_len,
            state.config.error_mask,
            filters,
        )?;

        let token = Token(state.next_token_id);
        state.next_token_id += 1;
        self.registry
            .register(&mut SourceFd(&endpoint.as_raw_fd()), token, Interest::READABLE)
            .map_err(|_| CanError::RxSocketBind(std::io::Error::last_os_error()))?;

        state.rx_slots.push(RxSlot {
            token,
            endpoint,
            handler: None,
        });
        Ok(token.0 as u64)
    }

    /// `close_rx_socket`/part of `unregister_rx_handler`: removes from the
    /// readiness set, then closes (via `Drop`). §4.3 teardown order.
    fn remove_rx_slot_at(&self, state: &mut InterfaceState, pos: usize) {
        let slot = state.rx_slots.swap_remove(pos);
        let _ = self.registry.deregister(&mut SourceFd(&slot.endpoint.as_raw_fd()));
    }

    pub(crate) fn close_rx_socket(&self, endpoint_id: u64) -> CanResult<()> {
        let mut state = self.lock();
        let pos = state
            .rx_slots
            .iter()
            .position(|s| s.endpoint_id() == endpoint_id)
            .ok_or(CanError::NotFound)?;
        self.remove_rx_slot_at(&mut state, pos);
        Ok(())
    }

    pub(crate) fn unregister_rx_handler(&self, callback: &RxCallback) -> CanResult<()> {
        let mut state = self.lock();
        let pos = state
            .rx_slots
            .iter()
            .position(|s| s.handler.as_ref().map_or(false, |h| Arc::ptr_eq(h, callback)))
            .ok_or(CanError::NotFound)?;
        self.remove_rx_slot_at(&mut state, pos);
        Ok(())
    }

    pub(crate) fn register_error_handler(&self, callback: ErrorCallback) -> CanResult<()> {
        let mut state = self.lock();
        if state.error_handlers.iter().any(|(_, h)| Arc::ptr_eq(h, &callback)) {
            return Err(CanError::AlreadyRegistered);
        }
        let id = CallbackId::new();
        state.error_handlers.push((id, callback));
        Ok(())
    }

    pub(crate) fn unregister_error_handler(&self, callback: &ErrorCallback) -> CanResult<()> {
        let mut state = self.lock();
        let pos = state
            .error_handlers
            .iter()
            .position(|(_, h)| Arc::ptr_eq(h, callback))
            .ok_or(CanError::NotFound)?;
        state.error_handlers.remove(pos);
        Ok(())
    }

    pub(crate) fn rx_endpoint_count(&self) -> usize {
        self.lock().rx_slots.len()
    }

    pub(crate) fn set_poll_timeout(&self, timeout: Duration) {
        self.lock().poll_timeout = timeout;
    }

    pub(crate) fn poll_timeout(&self) -> Duration {
        self.lock().poll_timeout
    }

    pub(crate) fn error_handlers_snapshot(&self) -> Vec<ErrorCallback> {
        self.lock().error_handlers.iter().map(|(_, h)| h.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_defaults_match_spec() {
        let c = Configuration::default();
        assert!(c.nl_cmd_verify);
        assert!(!c.canfd_enabled);
        assert!(c.process_header);
        assert!(!c.hw_timestamp);
        assert_eq!(c.bitrate, netlink::INVALID_RATE);
        assert_eq!(c.dbitrate, netlink::INVALID_RATE);
        assert_eq!(c.restart_ms, netlink::INVALID_RATE);
        assert_eq!(c.ctrl_mode, netlink::UNCONFIGURED_CTRL_MODE);
        assert_eq!(c.error_mask, netlink::DEFAULT_ERROR_MASK);
        assert!(!c.polled_mode);
    }
}
