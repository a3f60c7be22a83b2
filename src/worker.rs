//! Driver Thread: an owned worker that repeatedly pumps the Reactor until
//! torn down. See §4.6.

use crate::err::{CanError, CanResult};
use crate::reactor;
use crate::registry::Interface;
use std::sync::Arc;
use std::thread;

/// Tries to raise the calling thread to the `SCHED_FIFO` real-time class;
/// silently does nothing where the host doesn't permit it (unprivileged
/// process, container without `CAP_SYS_NICE`, non-Linux host), matching
/// §4.6: "a scheduled real-time worker where the host permits".
fn try_set_realtime_priority() {
    unsafe {
        let priority = libc::sched_get_priority_min(libc::SCHED_FIFO);
        if priority < 0 {
            return;
        }
        let param = libc::sched_param {
            sched_priority: priority,
        };
        let _ = libc::sched_setscheduler(0, libc::SCHED_FIFO, &param);
    }
}

/// Spawns the worker. Returns the join handle and the sender half of its
/// shutdown channel; `free` clears the run flag, sends on this channel to
/// unstick a blocked pump, then joins.
pub(crate) fn spawn(
    iface: Arc<Interface>,
) -> CanResult<(thread::JoinHandle<()>, crossbeam::channel::Sender<()>)> {
    let (tx, rx) = crossbeam::channel::bounded::<()>(1);
    let handle = thread::Builder::new()
        .name(format!("ldxcan-{}", iface.name))
        .spawn(move || {
            try_set_realtime_priority();
            loop {
                if rx.try_recv().is_ok() {
                    break;
                }
                if !iface.lock().run {
                    break;
                }
                let timeout = iface.poll_timeout();
                let _ = reactor::poll(&iface, timeout);
                thread::yield_now();
            }
        })
        .map_err(CanError::ThreadCreate)?;
    Ok((handle, tx))
}
