//! Outbound command queue.
//!
//! Producers hold a [`CommandSender`] (cheap to clone, one per GUI handler,
//! scheduler job or poller) and the writer drains the single
//! [`CommandQueue`] in submission order.

use std::sync::Arc;

use anygrow_metrics::metric_defs;
use anygrow_protocol::{Command, PacketCodec};
use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, warn};

use crate::error::LinkResult;

/// FIFO of validated commands waiting for the writer.
#[derive(Debug)]
pub struct CommandQueue {
    tx: Sender<Command>,
    rx: Receiver<Command>,
    codec: Arc<PacketCodec>,
}

impl CommandQueue {
    /// Create an empty, unbounded queue. Commands are checked against `codec`
    /// on submission.
    pub fn new(codec: Arc<PacketCodec>) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        CommandQueue { tx, rx, codec }
    }

    /// A producer handle for this queue.
    pub fn sender(&self) -> CommandSender {
        CommandSender {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            codec: Arc::clone(&self.codec),
        }
    }

    /// Validate and append a command. Never blocks.
    pub fn submit(&self, command: Command) -> LinkResult<()> {
        submit(&self.tx, &self.rx, &self.codec, command)
    }

    /// Remove the oldest command, if any.
    pub fn try_pop(&self) -> Option<Command> {
        let command = self.rx.try_recv().ok()?;
        metrics::gauge!(metric_defs::QUEUE_DEPTH.name).set(self.rx.len() as f64);
        Some(command)
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Discard every queued command, returning how many were dropped.
    pub fn clear(&self) -> usize {
        let dropped = self.rx.try_iter().count();
        metrics::gauge!(metric_defs::QUEUE_DEPTH.name).set(0.0);
        dropped
    }
}

/// Producer handle for a [`CommandQueue`].
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: Sender<Command>,
    rx: Receiver<Command>,
    codec: Arc<PacketCodec>,
}

impl CommandSender {
    /// Validate and append a command. Never blocks.
    ///
    /// A command that cannot be encoded is rejected here and never queued.
    pub fn submit(&self, command: Command) -> LinkResult<()> {
        submit(&self.tx, &self.rx, &self.codec, command)
    }
}

fn submit(
    tx: &Sender<Command>,
    rx: &Receiver<Command>,
    codec: &PacketCodec,
    command: Command,
) -> LinkResult<()> {
    if let Err(err) = codec.encode(&command) {
        warn!(command = command.name(), error = %err, "rejected command");
        return Err(err.into());
    }
    debug!(%command, "queued");
    // Both ends live as long as the sender does, so the send cannot fail.
    let _ = tx.send(command);
    metrics::gauge!(metric_defs::QUEUE_DEPTH.name).set(rx.len() as f64);
    Ok(())
}
