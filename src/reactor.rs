//! Reactor: readiness wait plus drain/dispatch over one interface's
//! endpoints. See §4.5.

use crate::err::CanError;
use crate::frame::{CanAnyFrame, CanFdFrame, CanFrame, Event, CANFD_MTU};
use crate::link_error::LinkError;
use crate::registry::{Interface, TX_TOKEN};
use mio::{Events, Token};
use std::collections::HashSet;
use std::io;
use std::time::Duration;

/// Successful pump, including "nothing was ready before the timeout".
pub const POLL_OK: i32 = 0;

fn build_event(buf: &[u8], n: usize, fd_enabled: bool, anc: crate::ancillary::Ancillary, endpoint_id: Option<u64>, is_rx: bool) -> Event {
    let frame = if fd_enabled && n >= CANFD_MTU {
        CanAnyFrame::Fd(unsafe { CanFdFrame::from_bytes(&buf[..n]) })
    } else {
        CanAnyFrame::Data(unsafe { CanFrame::from_bytes(&buf[..n]) })
    };
    let is_error = frame.is_error();
    Event {
        frame,
        timestamp: anc.timestamp,
        endpoint_id,
        is_rx,
        is_error,
        dropped_frames: anc.drop_delta,
    }
}

fn dispatch_error(iface: &Interface, event: &Event) {
    let code = CanError::Link(LinkError::from_error_frame(event.frame.raw_id(), event.frame.data()));
    for handler in iface.error_handlers_snapshot() {
        handler(&code);
    }
}

fn dispatch_drop(iface: &Interface) {
    for handler in iface.error_handlers_snapshot() {
        handler(&CanError::DroppedFrames);
    }
}

/// One pump: wait up to `timeout`, drain every ready endpoint, and invoke
/// user handlers. Returns `0` on success (including "nothing ready"),
/// `CanError::NetworkDown.code()` (negative) if a receive reported the
/// interface down, and tolerates `EINTR` by returning `0`.
pub fn poll(iface: &Interface, timeout: Duration) -> i32 {
    let mut events = Events::with_capacity(iface.rx_endpoint_count() + 2);
    {
        let mut p = iface.poll.lock().unwrap_or_else(|e| e.into_inner());
        match p.poll(&mut events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return POLL_OK,
            Err(e) => return CanError::PollFailed(e).code(),
        }
    }
    if events.is_empty() {
        return POLL_OK;
    }

    let ready: HashSet<Token> = events.iter().map(|e| e.token()).collect();
    let mut state = iface.lock();

    let rx_tokens: Vec<Token> = state.rx_slots.iter().map(|s| s.token).collect();
    let mut buf = [0u8; CANFD_MTU];

    for token in rx_tokens {
        if !ready.contains(&token) {
            continue;
        }
        let endpoint_id = token.0 as u64;
        let slot = match state.rx_slots.iter_mut().find(|s| s.token == token) {
            Some(s) => s,
            None => continue, // closed between the wait and the drain
        };
        let fd_enabled = slot.endpoint.fd_enabled;
        loop {
            match slot.endpoint.try_read(&mut buf) {
                Ok(None) => break,
                Ok(Some((n, anc))) => {
                    let event = build_event(&buf, n, fd_enabled, anc, Some(endpoint_id), true);
                    if event.is_error {
                        dispatch_error(iface, &event);
                    }
                    if event.dropped_frames != 0 {
                        dispatch_drop(iface);
                    }
                    // §4.5: "RX event: call only those RX handlers whose
                    // endpoint identifier matches the event's" — applies
                    // regardless of is_error, unlike the source's bug
                    // (§9 #3), which called the error list a second time
                    // from here instead of the RX handler.
                    if let Some(handler) = slot.handler.clone() {
                        handler(&event);
                    }
                }
                Err(CanError::NetworkDown) => {
                    drop(state);
                    return CanError::NetworkDown.code();
                }
                Err(_) => break,
            }
        }
    }

    if ready.contains(&TX_TOKEN) {
        if let Some(tx) = state.tx.as_ref() {
            loop {
                match tx.try_read_error(&mut buf) {
                    Ok(None) => break,
                    Ok(Some(n)) => {
                        let anc = crate::ancillary::Ancillary::default();
                        let event = build_event(&buf, n, false, anc, None, false);
                        if event.is_error {
                            dispatch_error(iface, &event);
                        }
                    }
                    Err(CanError::NetworkDown) => {
                        drop(state);
                        return CanError::NetworkDown.code();
                    }
                    Err(_) => break,
                }
            }
        }
    }

    POLL_OK
}

/// Single-event pump: same wait, but stops after decoding and returning at
/// most one event, without invoking user handlers.
pub fn poll_one(iface: &Interface, timeout: Duration) -> Option<Event> {
    let mut events = Events::with_capacity(iface.rx_endpoint_count() + 2);
    {
        let mut p = iface.poll.lock().unwrap_or_else(|e| e.into_inner());
        if p.poll(&mut events, Some(timeout)).is_err() {
            return None;
        }
    }
    let token = events.iter().next()?.token();
    let mut state = iface.lock();
    let mut buf = [0u8; CANFD_MTU];

    if token == TX_TOKEN {
        let tx = state.tx.as_ref()?;
        let n = tx.try_read_error(&mut buf).ok()??;
        return Some(build_event(&buf, n, false, crate::ancillary::Ancillary::default(), None, false));
    }

    let slot = state.rx_slots.iter_mut().find(|s| s.token == token)?;
    let fd_enabled = slot.endpoint.fd_enabled;
    let endpoint_id = slot.endpoint_id();
    let (n, anc) = slot.endpoint.try_read(&mut buf).ok()??;
    Some(build_event(&buf, n, fd_enabled, anc, Some(endpoint_id), true))
}

/// `poll_msec`: translates milliseconds into the duration `poll` expects.
pub fn poll_msec(iface: &Interface, msec: u64) -> i32 {
    poll(iface, Duration::from_millis(msec))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{dlc_to_len, sanitize_length};

    #[test]
    fn build_event_classic_frame_is_not_error() {
        let frame = CanFrame::new(0x123, &[1, 2, 3], false, false).unwrap();
        let bytes = frame.as_bytes();
        let anc = crate::ancillary::Ancillary::default();
        let ev = build_event(bytes, bytes.len(), false, anc, Some(7), true);
        assert!(!ev.is_error);
        assert_eq!(ev.endpoint_id, Some(7));
        assert_eq!(ev.frame.data(), &[1, 2, 3]);
    }

    #[test]
    fn dlc_helpers_are_reexported_and_consistent() {
        assert_eq!(dlc_to_len(sanitize_length(9)), 12);
    }
}
