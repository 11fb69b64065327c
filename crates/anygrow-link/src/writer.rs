//! Rate-limited command writer.
//!
//! The board cannot absorb commands back to back, so the writer sends at most
//! one command per `command_interval`, measured from the end of the previous
//! successful write. Commands stay queued while the link is down. A command
//! popped just as the link dropped is held and goes out first after the
//! reconnect.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anygrow_metrics::metric_defs;
use anygrow_protocol::{Command, PacketCodec};
use tracing::{debug, trace, warn};

use crate::error::LinkError;
use crate::events::{EventBus, LinkEvent};
use crate::queue::CommandQueue;
use crate::supervisor::ConnectionSupervisor;
use crate::worker::Periodic;

pub(crate) struct Writer {
    queue: Arc<CommandQueue>,
    codec: Arc<PacketCodec>,
    supervisor: Arc<ConnectionSupervisor>,
    events: Arc<EventBus>,
    requests_sent: Arc<AtomicU64>,
    interval: Duration,
    last_write: Option<Instant>,
    /// Popped but never reached the port.
    held: Option<Command>,
}

impl Writer {
    pub(crate) fn new(
        queue: Arc<CommandQueue>,
        codec: Arc<PacketCodec>,
        supervisor: Arc<ConnectionSupervisor>,
        events: Arc<EventBus>,
        requests_sent: Arc<AtomicU64>,
        interval: Duration,
    ) -> Self {
        Writer {
            queue,
            codec,
            supervisor,
            events,
            requests_sent,
            interval,
            last_write: None,
            held: None,
        }
    }

    fn gate_open(&self) -> bool {
        self.last_write
            .map_or(true, |last| last.elapsed() >= self.interval)
    }

    fn dispatch(&mut self, command: Command) {
        let frame = match self.codec.encode(&command) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(%command, error = %err, "dropping command that no longer encodes");
                metrics::counter!(metric_defs::COMMANDS_DROPPED.name,
                    "command" => command.name(), "reason" => "invalid")
                .increment(1);
                return;
            }
        };

        let started = Instant::now();
        match self.supervisor.write_frame(&frame) {
            Ok(()) => {
                let finished = Instant::now();
                self.last_write = Some(finished);
                metrics::histogram!(metric_defs::WRITE_LATENCY.name)
                    .record((finished - started).as_micros() as f64);
                metrics::counter!(metric_defs::COMMANDS_WRITTEN.name, "command" => command.name())
                    .increment(1);
                trace!(frame = %frame.to_hex(), "wrote frame");

                if command.is_sensor_request() {
                    let total = self.requests_sent.fetch_add(1, Ordering::SeqCst) + 1;
                    metrics::counter!(metric_defs::SENSOR_REQUESTS.name).increment(1);
                    self.events.publish(LinkEvent::RequestSent { total });
                } else {
                    debug!(%command, "command written");
                }
            }
            Err(LinkError::NotConnected) => {
                debug!(%command, "link dropped before write, holding command");
                self.held = Some(command);
            }
            Err(err) => {
                // The supervisor has already closed the port and scheduled a
                // reconnect. The command is not retried.
                warn!(%command, error = %err, "command lost");
                metrics::counter!(metric_defs::COMMANDS_DROPPED.name,
                    "command" => command.name(), "reason" => "io_error")
                .increment(1);
            }
        }
    }
}

impl Periodic for Writer {
    fn tick(&mut self) {
        if !self.supervisor.is_connected() || !self.gate_open() {
            return;
        }
        if let Some(command) = self.held.take().or_else(|| self.queue.try_pop()) {
            self.dispatch(command);
        }
    }
}
