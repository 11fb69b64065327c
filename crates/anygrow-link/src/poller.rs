//! Periodic telemetry requests.

use std::sync::Arc;

use anygrow_protocol::Command;
use tracing::warn;

use crate::queue::CommandSender;
use crate::supervisor::ConnectionSupervisor;
use crate::worker::Periodic;

/// Queues a [`Command::SensorRequest`] on every tick while connected.
///
/// Nothing is queued while the link is down, so an outage does not leave a
/// backlog of stale requests behind.
pub(crate) struct SensorPoller {
    commands: CommandSender,
    supervisor: Arc<ConnectionSupervisor>,
}

impl SensorPoller {
    pub(crate) fn new(commands: CommandSender, supervisor: Arc<ConnectionSupervisor>) -> Self {
        SensorPoller {
            commands,
            supervisor,
        }
    }
}

impl Periodic for SensorPoller {
    fn tick(&mut self) {
        if !self.supervisor.is_connected() {
            return;
        }
        if let Err(err) = self.commands.submit(Command::SensorRequest) {
            warn!(error = %err, "could not queue sensor request");
        }
    }
}
