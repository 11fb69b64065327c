//! Serial link to the AnyGrow grow-box controller.
//!
//! This crate turns the pure frame codec in [`anygrow_protocol`] into a
//! running link:
//!
//! - [`CommandQueue`]: FIFO of validated commands, fed by any number of
//!   producers through [`CommandSender`]s.
//! - Writer: drains the queue at most once per `command_interval`.
//! - Reader: polls the port, accumulates bytes and publishes decoded telemetry.
//! - SensorPoller: queues a telemetry request every `poll_interval`.
//! - [`ConnectionSupervisor`]: owns the port, tracks [`ConnectionState`] and
//!   keeps at most one reconnect pending.
//! - [`DeviceManager`]: owns all of the above with an explicit
//!   `start`/`stop` lifecycle.
//!
//! Consumers observe the link through [`LinkEvent`]s.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use anygrow_link::{DeviceManager, LinkConfig, LinkEvent};
//! use anygrow_link::mock::MockConnector;
//! use anygrow_protocol::{LedMode, SensorValues};
//!
//! let board = MockConnector::with_telemetry(SensorValues {
//!     temperature: 25.3,
//!     humidity: 60.1,
//!     co2_ppm: 800,
//!     illuminance_lux: 1500,
//! });
//! let config = LinkConfig::default().with_poll_interval(Duration::from_millis(100));
//! let mut manager = DeviceManager::new(config, Arc::new(board)).unwrap();
//! let events = manager.subscribe();
//!
//! manager.start().unwrap();
//! manager.set_led_mode(LedMode::On).unwrap();
//!
//! let reading = loop {
//!     match events.recv_timeout(Duration::from_secs(5)).unwrap() {
//!         LinkEvent::DataUpdated(reading) => break reading,
//!         _ => continue,
//!     }
//! };
//! assert_eq!(reading.co2_ppm, 800);
//! manager.stop();
//! ```

mod config;
mod error;
mod events;
mod manager;
pub mod mock;
mod poller;
mod queue;
mod reader;
mod state;
mod supervisor;
mod transport;
mod worker;
mod writer;

pub use config::*;
pub use error::*;
pub use events::*;
pub use manager::*;
pub use queue::*;
pub use reader::Co2SpikeFilter;
pub use state::*;
pub use supervisor::*;
pub use transport::*;
