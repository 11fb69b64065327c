//! Connection supervision.
//!
//! The [`ConnectionSupervisor`] owns the serial handle. Readers and writers
//! borrow it for exactly one call through [`ConnectionSupervisor::write_frame`]
//! and [`ConnectionSupervisor::read_available`]; the first I/O error on a
//! handle closes it, moves the link to `Disconnected` and arms the reconnect
//! timer.
//!
//! ## Reconnect timer
//!
//! A single supervisor thread performs every open attempt. It sleeps on its
//! control channel until the pending deadline (if any) expires or a control
//! message arrives:
//!
//! ```text
//!   schedule(delay) ──► pending = Some(deadline)   (no-op if already pending)
//!   reconnect()     ──► pending = None, ReconnectNow
//!   deadline hit    ──► pending = None, connect() unless already connected
//!   open succeeds   ──► pending = None
//! ```
//!
//! Because the deadline lives in one slot, at most one reconnect is ever
//! pending.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anygrow_metrics::metric_defs;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::LinkConfig;
use crate::error::{LinkError, LinkResult};
use crate::events::{EventBus, LinkEvent};
use crate::state::ConnectionState;
use crate::transport::{Connector, Transport};

/// Which side of the link failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    /// Reading inbound bytes.
    Read,
    /// Writing a command frame.
    Write,
}

impl IoOp {
    /// Lowercase name, used as the `op` metric label and in status text.
    pub const fn as_str(&self) -> &'static str {
        match self {
            IoOp::Read => "read",
            IoOp::Write => "write",
        }
    }
}

impl fmt::Display for IoOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
enum Control {
    /// Re-read the pending deadline.
    Wake,
    /// Close any open handle and connect now.
    ReconnectNow,
    Shutdown,
}

/// Owner of the serial handle and the connection state machine.
pub struct ConnectionSupervisor {
    connector: Arc<dyn Connector>,
    events: Arc<EventBus>,

    transport: Mutex<Option<Box<dyn Transport>>>,
    state: Mutex<ConnectionState>,
    /// Incremented on every successful open.
    generation: AtomicU64,

    /// Deadline of the one pending reconnect, if any.
    pending: Mutex<Option<Instant>>,
    /// Number of reconnects ever scheduled.
    scheduled: AtomicU64,

    running: AtomicBool,
    control_tx: Sender<Control>,
    control_rx: Receiver<Control>,
    thread: Mutex<Option<JoinHandle<()>>>,

    connect_retry_delay: Duration,
    io_error_retry_delay: Duration,
}

impl ConnectionSupervisor {
    /// Create a stopped supervisor.
    pub fn new(connector: Arc<dyn Connector>, events: Arc<EventBus>, config: &LinkConfig) -> Self {
        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        ConnectionSupervisor {
            connector,
            events,
            transport: Mutex::new(None),
            state: Mutex::new(ConnectionState::Disconnected),
            generation: AtomicU64::new(0),
            pending: Mutex::new(None),
            scheduled: AtomicU64::new(0),
            running: AtomicBool::new(false),
            control_tx,
            control_rx,
            thread: Mutex::new(None),
            connect_retry_delay: config.connect_retry_delay(),
            io_error_retry_delay: config.io_error_retry_delay(),
        }
    }

    /// Spawn the supervisor thread and make the first connection attempt.
    pub fn start(self: &Arc<Self>) -> LinkResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(LinkError::AlreadyRunning);
        }
        // Anything left over from a previous run is stale.
        while self.control_rx.try_recv().is_ok() {}

        let supervisor = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("anygrow-supervisor".into())
            .spawn(move || supervisor.run())
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                LinkError::Io(e)
            })?;
        *self.thread.lock() = Some(handle);

        let _ = self.control_tx.send(Control::ReconnectNow);
        Ok(())
    }

    /// Cancel the pending reconnect, stop the supervisor thread and close the handle.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.control_tx.send(Control::Shutdown);
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                warn!("supervisor thread panicked");
            }
        }

        self.pending.lock().take();
        if self.transport.lock().take().is_some() {
            info!("serial port closed");
        }
        self.set_state(ConnectionState::Disconnected);
        self.events.status("Stopped");
    }

    /// Cancel any pending reconnect and reconnect immediately.
    ///
    /// An open handle is closed first.
    pub fn reconnect(&self) -> LinkResult<()> {
        if !self.is_running() {
            return Err(LinkError::NotRunning);
        }
        if self.pending.lock().take().is_some() {
            debug!("cancelled pending reconnect");
        }
        let _ = self.control_tx.send(Control::ReconnectNow);
        Ok(())
    }

    /// Arm the reconnect timer.
    ///
    /// Returns `false` without changing anything if a reconnect is already
    /// pending or the supervisor is stopped.
    pub fn schedule_reconnect(&self, delay: Duration) -> bool {
        if !self.is_running() {
            return false;
        }
        {
            let mut pending = self.pending.lock();
            if pending.is_some() {
                debug!("reconnect already pending");
                return false;
            }
            *pending = Some(Instant::now() + delay);
        }
        self.scheduled.fetch_add(1, Ordering::SeqCst);
        info!(delay_ms = delay.as_millis() as u64, "reconnect scheduled");
        self.events
            .status(format!("Reconnecting in {:.1}s", delay.as_secs_f64()));
        let _ = self.control_tx.send(Control::Wake);
        true
    }

    /// Write one frame through the open handle.
    pub fn write_frame(&self, frame: &[u8]) -> LinkResult<()> {
        self.with_transport(IoOp::Write, |t| t.write_frame(frame))
    }

    /// Read available bytes through the open handle.
    pub fn read_available(&self, buf: &mut [u8]) -> LinkResult<usize> {
        self.read_tagged(buf).map(|(_, n)| n)
    }

    /// Read available bytes and return them with the generation of the
    /// handle they came from.
    pub fn read_tagged(&self, buf: &mut [u8]) -> LinkResult<(u64, usize)> {
        // The generation only changes while the handle lock is held.
        self.with_transport(IoOp::Read, |t| {
            let n = t.read_available(buf)?;
            Ok((self.generation(), n))
        })
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of successful opens so far. Changes whenever a new handle is installed.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Deadline of the pending reconnect, if one is armed.
    pub fn pending_reconnect(&self) -> Option<Instant> {
        *self.pending.lock()
    }

    /// Number of reconnects scheduled since creation.
    pub fn scheduled_reconnects(&self) -> u64 {
        self.scheduled.load(Ordering::SeqCst)
    }

    /// Run `op` against the handle, holding the lock only for that call.
    fn with_transport<R>(
        &self,
        op: IoOp,
        f: impl FnOnce(&mut dyn Transport) -> io::Result<R>,
    ) -> LinkResult<R> {
        let mut guard = self.transport.lock();
        let transport = guard.as_mut().ok_or(LinkError::NotConnected)?;
        match f(&mut **transport) {
            Ok(value) => Ok(value),
            Err(err) => {
                // Dropping the handle here means only the first failing call
                // on a connection reaches link_lost.
                guard.take();
                drop(guard);
                self.link_lost(op, &err);
                Err(LinkError::Io(err))
            }
        }
    }

    fn link_lost(&self, op: IoOp, err: &io::Error) {
        warn!(%op, error = %err, "serial I/O failed, closing port");
        metrics::counter!(metric_defs::IO_ERRORS.name, "op" => op.as_str()).increment(1);
        self.set_state(ConnectionState::Disconnected);
        self.events.status(format!("Serial {} error: {}", op, err));
        self.schedule_reconnect(self.io_error_retry_delay);
    }

    fn run(&self) {
        debug!("supervisor thread started");
        loop {
            let deadline = *self.pending.lock();
            let message = match deadline {
                Some(at) => self
                    .control_rx
                    .recv_timeout(at.saturating_duration_since(Instant::now())),
                None => self
                    .control_rx
                    .recv()
                    .map_err(|_| RecvTimeoutError::Disconnected),
            };

            match message {
                Ok(Control::Wake) => {}
                Ok(Control::ReconnectNow) => self.connect(),
                Ok(Control::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    if self.take_due_deadline() && !self.is_connected() {
                        self.connect();
                    }
                }
            }
        }
        debug!("supervisor thread exiting");
    }

    /// Clear the pending deadline if it has passed.
    fn take_due_deadline(&self) -> bool {
        let mut pending = self.pending.lock();
        match *pending {
            Some(at) if at <= Instant::now() => {
                *pending = None;
                true
            }
            _ => false,
        }
    }

    fn connect(&self) {
        if !self.is_running() {
            return;
        }
        let target = self.connector.describe();
        let mut transport = self.transport.lock();
        if transport.take().is_some() {
            info!(port = %target, "closing port before reconnect");
            self.set_state(ConnectionState::Disconnected);
        }

        self.set_state(ConnectionState::Connecting);
        self.events.status(format!("Connecting to {}...", target));

        match self.connector.open() {
            Ok(handle) => {
                *transport = Some(handle);
                let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                drop(transport);
                // A timer armed by an open that failed while this one was queued is stale.
                if self.pending.lock().take().is_some() {
                    debug!("cancelled pending reconnect after successful open");
                }
                metrics::counter!(metric_defs::CONNECT_ATTEMPTS.name, "outcome" => "connected")
                    .increment(1);
                info!(port = %target, generation, "connected");
                self.set_state(ConnectionState::Connected);
                self.events.status(format!("Connected to {}", target));
            }
            Err(err) => {
                drop(transport);
                metrics::counter!(metric_defs::CONNECT_ATTEMPTS.name, "outcome" => "failed")
                    .increment(1);
                warn!(port = %target, error = %err, "connection failed");
                self.set_state(ConnectionState::Disconnected);
                let status = match self.connector.diagnostics() {
                    Some(extra) => format!("Failed to open {}: {} ({})", target, err, extra),
                    None => format!("Failed to open {}: {}", target, err),
                };
                self.events.status(status);
                self.schedule_reconnect(self.connect_retry_delay);
            }
        }
    }

    /// Move to `next`, publishing the change. Returns false if already there.
    fn set_state(&self, next: ConnectionState) -> bool {
        let mut state = self.state.lock();
        if *state == next {
            return false;
        }
        let previous = std::mem::replace(&mut *state, next);
        info!(from = %previous, to = %next, "connection state changed");
        metrics::gauge!(metric_defs::CONNECTION_STATE.name).set(next.gauge_value());
        self.events.publish(LinkEvent::StateChanged(next));
        true
    }
}

impl fmt::Debug for ConnectionSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSupervisor")
            .field("target", &self.connector.describe())
            .field("state", &self.state())
            .field("generation", &self.generation())
            .field("pending_reconnect", &self.pending_reconnect())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockConnector;

    fn supervisor(
        mock: &MockConnector,
        config: &LinkConfig,
    ) -> (Arc<ConnectionSupervisor>, Receiver<LinkEvent>) {
        let events = Arc::new(EventBus::new());
        let rx = events.subscribe();
        let connector: Arc<dyn Connector> = Arc::new(mock.clone());
        (Arc::new(ConnectionSupervisor::new(connector, events, config)), rx)
    }

    fn wait_for_state(rx: &Receiver<LinkEvent>, wanted: ConnectionState) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while let Ok(event) = rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            if event == LinkEvent::StateChanged(wanted) {
                return;
            }
        }
        panic!("never reached {}", wanted);
    }

    #[test]
    fn test_start_connects() {
        let mock = MockConnector::new();
        let (sup, rx) = supervisor(&mock, &LinkConfig::default());
        sup.start().unwrap();
        wait_for_state(&rx, ConnectionState::Connected);
        assert_eq!(sup.generation(), 1);
        assert!(sup.write_frame(&[0x02, 0x03]).is_ok());
        assert!(matches!(sup.start(), Err(LinkError::AlreadyRunning)));
        sup.stop();
        assert_eq!(sup.state(), ConnectionState::Disconnected);
        assert!(matches!(sup.write_frame(&[0x02]), Err(LinkError::NotConnected)));
    }

    #[test]
    fn test_schedule_is_single_slot() {
        let mock = MockConnector::new();
        let config = LinkConfig::default();
        let (sup, _rx) = supervisor(&mock, &config);
        assert!(
            !sup.schedule_reconnect(Duration::from_secs(5)),
            "stopped supervisor schedules nothing"
        );

        sup.start().unwrap();
        assert!(sup.schedule_reconnect(Duration::from_secs(60)));
        let first = sup.pending_reconnect().unwrap();
        assert!(!sup.schedule_reconnect(Duration::from_millis(1)));
        assert_eq!(sup.pending_reconnect(), Some(first));
        assert_eq!(sup.scheduled_reconnects(), 1);

        sup.stop();
        assert_eq!(sup.pending_reconnect(), None);
    }

    #[test]
    fn test_reconnect_requires_running() {
        let mock = MockConnector::new();
        let (sup, _rx) = supervisor(&mock, &LinkConfig::default());
        assert!(matches!(sup.reconnect(), Err(LinkError::NotRunning)));
    }

    #[test]
    fn test_manual_reconnect_during_slow_failing_open() {
        let mock = MockConnector::new();
        mock.set_open_delay(Duration::from_millis(100));
        mock.set_fail_opens(true);
        let config = LinkConfig::default()
            .with_retry_delays(Duration::from_millis(400), Duration::from_millis(400));
        let (sup, rx) = supervisor(&mock, &config);

        sup.start().unwrap();
        thread::sleep(Duration::from_millis(30));
        // The first open is still in progress and will fail; this one succeeds.
        mock.set_fail_opens(false);
        sup.reconnect().unwrap();
        wait_for_state(&rx, ConnectionState::Connected);

        // Well past the retry delay the failed open armed.
        thread::sleep(Duration::from_millis(800));
        let states: Vec<ConnectionState> = rx
            .try_iter()
            .filter_map(|event| match event {
                LinkEvent::StateChanged(state) => Some(state),
                _ => None,
            })
            .collect();
        assert!(states.is_empty(), "link changed state after connecting: {:?}", states);
        assert_eq!(mock.open_count(), 1);
        assert_eq!(mock.failed_open_count(), 1);
        assert_eq!(sup.state(), ConnectionState::Connected);
        assert_eq!(sup.pending_reconnect(), None);
        sup.stop();
    }

    #[test]
    fn test_failed_open_retries_after_delay() {
        let mock = MockConnector::new();
        mock.set_fail_opens(true);
        let config = LinkConfig::default()
            .with_retry_delays(Duration::from_millis(50), Duration::from_millis(50));
        let (sup, rx) = supervisor(&mock, &config);

        sup.start().unwrap();
        wait_for_state(&rx, ConnectionState::Connecting);
        wait_for_state(&rx, ConnectionState::Disconnected);
        mock.set_fail_opens(false);
        wait_for_state(&rx, ConnectionState::Connected);

        assert!(mock.failed_open_count() >= 1);
        assert_eq!(mock.open_count(), 1);
        sup.stop();
    }
}
