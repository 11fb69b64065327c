//! AnyGrow Controller Serial Protocol
//!
//! This crate provides the frame codec for the AnyGrow grow-box controller
//! board. It is pure: no I/O, no threads, no clocks beyond stamping decoded
//! telemetry.
//!
//! # Protocol Overview
//!
//! Host and board exchange fixed 30-byte frames over a serial line:
//!
//! - **Commands** (host → board): lighting mode, per-channel LED settings,
//!   pump and UV-filter relays, clock sync and telemetry requests. Each is a
//!   7-byte header from the [`FrameTemplates`] table, a short payload,
//!   `0xFF` filler and ETX.
//! - **Telemetry** (board → host): tag `0x02` at offset 1, with temperature,
//!   humidity, CO2 and illuminance written one ASCII digit per byte.
//!
//! The link has no request/response correlation; a telemetry request only
//! makes it likely that the next inbound frame is fresh telemetry.
//!
//! # Example
//!
//! ```rust
//! use anygrow_protocol::{Command, LedMode, PacketCodec};
//!
//! let codec = PacketCodec::new();
//! let frame = codec.encode(&Command::LedMode(LedMode::On)).unwrap();
//! assert_eq!(frame.len(), 30);
//! assert_eq!(&frame[..8], &[0x02, 0x01, 0xFF, 0x4C, 0xFF, 0x00, 0xFF, 0x01]);
//!
//! // Telemetry arrives in arbitrary chunks; too few bytes is just "not yet".
//! assert!(codec.decode(&frame[..10]).is_none());
//! ```

mod commands;
mod constants;
mod error;
mod frame;
mod telemetry;
mod templates;

pub use commands::*;
pub use constants::*;
pub use error::*;
pub use frame::*;
pub use telemetry::*;
pub use templates::*;
