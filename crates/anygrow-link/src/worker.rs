//! Periodic worker threads.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::debug;

use crate::error::LinkResult;

/// Something that does one unit of work per tick.
pub(crate) trait Periodic: Send + 'static {
    fn tick(&mut self);
}

/// Spawn a named thread that calls `task.tick()` every `interval` until
/// `shutdown` is disconnected (its sender dropped).
pub(crate) fn spawn_periodic<T: Periodic>(
    name: &str,
    interval: Duration,
    shutdown: Receiver<()>,
    mut task: T,
) -> LinkResult<JoinHandle<()>> {
    let thread_name = format!("anygrow-{}", name);
    let handle = thread::Builder::new().name(thread_name.clone()).spawn(move || {
        debug!(thread = %thread_name, "worker started");
        loop {
            match shutdown.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => task.tick(),
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!(thread = %thread_name, "worker stopped");
    })?;
    Ok(handle)
}
