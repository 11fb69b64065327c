//! Observer bus for link events.
//!
//! Consumers (a GUI, a scheduler, the CLI) call
//! [`DeviceManager::subscribe`](crate::DeviceManager::subscribe) and read
//! [`LinkEvent`]s from the returned channel. Every subscriber sees every
//! event published after it subscribed, in publish order.

use anygrow_protocol::SensorReading;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::state::ConnectionState;

/// Events published by the link.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Human-readable status text (connect progress, failures, port lists).
    StatusChanged(String),

    /// The connection state changed.
    StateChanged(ConnectionState),

    /// A telemetry frame was decoded.
    DataUpdated(SensorReading),

    /// Bytes arrived from the board, as lowercase hex joined by `,`.
    RawBytesObserved(String),

    /// A telemetry request was written to the port.
    RequestSent {
        /// Requests written since the manager was created.
        total: u64,
    },
}

/// Fan-out of [`LinkEvent`]s to any number of subscribers.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<LinkEvent>>>,
}

impl EventBus {
    /// Create a bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber.
    pub fn subscribe(&self) -> Receiver<LinkEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Deliver an event to every live subscriber.
    ///
    /// Subscribers whose receiver was dropped are removed.
    pub fn publish(&self, event: LinkEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Publish a [`LinkEvent::StatusChanged`].
    pub fn status(&self, text: impl Into<String>) {
        self.publish(LinkEvent::StatusChanged(text.into()));
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
