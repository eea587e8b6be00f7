//! Bounded blocking work.
//!
//! Camera acquisition and model loads call into drivers that can hang indefinitely.
//! `run_bounded` moves the call onto a named thread and waits on a rendezvous channel.
//! When the wait times out the receiver is dropped, so a value produced afterwards is
//! handed to `on_late` for cleanup instead of leaking an open device or a loaded model.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};

/// Run `work` with a deadline. Returns `Ok(None)` on timeout.
pub(crate) fn run_bounded<T, F, L>(
    name: &str,
    timeout: Duration,
    work: F,
    on_late: L,
) -> Result<Option<T>>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
    L: FnOnce(T) + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel::<T>(0);
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let value = work();
            if let Err(mpsc::SendError(late)) = tx.send(value) {
                on_late(late);
            }
        })
        .with_context(|| format!("spawn {} thread", name))?;

    match rx.recv_timeout(timeout) {
        Ok(value) => Ok(Some(value)),
        Err(mpsc::RecvTimeoutError::Timeout) => Ok(None),
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            Err(anyhow::anyhow!("{} thread exited without a result", name))
        }
    }
}
