//! Link configuration.
//!
//! Every field has a default, so a YAML file only needs the keys it changes:
//!
//! ```yaml
//! port: /dev/ttyACM0
//! command_interval_ms: 250
//! templates:
//!   pump: [2, 0, 255, 89, 255, 1, 255]
//! ```

use std::path::Path;
use std::time::Duration;

use anygrow_protocol::FrameTemplates;
use serde::{Deserialize, Serialize};

use crate::error::{LinkError, LinkResult};

/// Default serial device.
pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";

/// Default line speed of the controller board.
pub const DEFAULT_BAUD_RATE: u32 = 38_400;

/// Settings for the serial link and its periodic tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Serial device path.
    pub port: String,

    /// Line speed in baud.
    pub baud_rate: u32,

    /// OS timeout for a single read or write call (milliseconds).
    pub io_timeout_ms: u64,

    /// Minimum spacing between two command writes (milliseconds).
    /// The board corrupts its state when commands arrive back to back.
    pub command_interval_ms: u64,

    /// How often the writer checks the queue (milliseconds).
    pub writer_tick_ms: u64,

    /// How often the reader polls for inbound bytes (milliseconds).
    pub read_interval_ms: u64,

    /// How often a telemetry request is queued (milliseconds).
    pub poll_interval_ms: u64,

    /// Delay before retrying after the port failed to open (milliseconds).
    pub connect_retry_delay_ms: u64,

    /// Delay before reconnecting after a read or write error (milliseconds).
    pub io_error_retry_delay_ms: u64,

    /// Largest accepted jump between consecutive CO2 readings (ppm).
    /// Larger jumps are treated as sensor glitches. `None` disables the filter.
    pub co2_spike_limit: Option<u32>,

    /// CO2 readings at or above this value (ppm) are treated as sensor
    /// glitches. `None` disables the check.
    pub co2_ceiling: Option<u32>,

    /// Queue telemetry requests periodically.
    pub sensor_polling: bool,

    /// Frame header table.
    pub templates: FrameTemplates,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            port: DEFAULT_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            io_timeout_ms: 100,
            command_interval_ms: 200,
            writer_tick_ms: 100,
            read_interval_ms: 50,
            poll_interval_ms: 1000,
            connect_retry_delay_ms: 3000,
            io_error_retry_delay_ms: 1000,
            co2_spike_limit: Some(1000),
            co2_ceiling: Some(6000),
            sensor_polling: true,
            templates: FrameTemplates::default(),
        }
    }
}

impl LinkConfig {
    /// Create a config for the given port with default timings.
    pub fn for_port(port: impl Into<String>) -> Self {
        LinkConfig {
            port: port.into(),
            ..Default::default()
        }
    }

    /// Parse a YAML document.
    pub fn from_yaml_str(yaml: &str) -> LinkResult<Self> {
        let config: LinkConfig =
            serde_yaml::from_str(yaml).map_err(|e| LinkError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML config file.
    pub fn load(path: impl AsRef<Path>) -> LinkResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| LinkError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml_str(&text)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> LinkResult<String> {
        serde_yaml::to_string(self).map_err(|e| LinkError::Config(e.to_string()))
    }

    /// Check that the settings are usable.
    pub fn validate(&self) -> LinkResult<()> {
        if self.port.trim().is_empty() {
            return Err(LinkError::Config("port must not be empty".into()));
        }
        if self.baud_rate == 0 {
            return Err(LinkError::Config("baud_rate must be positive".into()));
        }
        for (name, value) in [
            ("io_timeout_ms", self.io_timeout_ms),
            ("command_interval_ms", self.command_interval_ms),
            ("writer_tick_ms", self.writer_tick_ms),
            ("read_interval_ms", self.read_interval_ms),
            ("poll_interval_ms", self.poll_interval_ms),
        ] {
            if value == 0 {
                return Err(LinkError::Config(format!("{} must be positive", name)));
            }
        }
        self.templates.validate()?;
        Ok(())
    }

    /// Set the serial device path.
    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.port = port.into();
        self
    }

    /// Set the line speed.
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set the minimum spacing between command writes.
    pub fn with_command_interval(mut self, interval: Duration) -> Self {
        self.command_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the writer and reader cadences.
    pub fn with_ticks(mut self, writer_tick: Duration, read_interval: Duration) -> Self {
        self.writer_tick_ms = writer_tick.as_millis() as u64;
        self.read_interval_ms = read_interval.as_millis() as u64;
        self
    }

    /// Set the telemetry request cadence.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set both reconnect delays.
    pub fn with_retry_delays(
        mut self,
        after_open_failure: Duration,
        after_io_error: Duration,
    ) -> Self {
        self.connect_retry_delay_ms = after_open_failure.as_millis() as u64;
        self.io_error_retry_delay_ms = after_io_error.as_millis() as u64;
        self
    }

    /// Enable or disable periodic telemetry requests.
    pub fn with_sensor_polling(mut self, enabled: bool) -> Self {
        self.sensor_polling = enabled;
        self
    }

    /// Set the CO2 spike limit. Pass None to disable the filter.
    pub fn with_co2_spike_limit(mut self, limit: Option<u32>) -> Self {
        self.co2_spike_limit = limit;
        self
    }

    /// Set the CO2 ceiling. Pass None to disable it.
    pub fn with_co2_ceiling(mut self, ceiling: Option<u32>) -> Self {
        self.co2_ceiling = ceiling;
        self
    }

    /// Replace the frame header table.
    pub fn with_templates(mut self, templates: FrameTemplates) -> Self {
        self.templates = templates;
        self
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn command_interval(&self) -> Duration {
        Duration::from_millis(self.command_interval_ms)
    }

    pub fn writer_tick(&self) -> Duration {
        Duration::from_millis(self.writer_tick_ms)
    }

    pub fn read_interval(&self) -> Duration {
        Duration::from_millis(self.read_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }

    pub fn io_error_retry_delay(&self) -> Duration {
        Duration::from_millis(self.io_error_retry_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LinkConfig::default();
        assert_eq!(config.port, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, 38400);
        assert_eq!(config.command_interval(), Duration::from_millis(200));
        assert_eq!(config.co2_spike_limit, Some(1000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml() {
        let config = LinkConfig::from_yaml_str(
            "port: /dev/ttyACM1\ncommand_interval_ms: 250\nco2_spike_limit: null\n",
        )
        .unwrap();
        assert_eq!(config.port, "/dev/ttyACM1");
        assert_eq!(config.command_interval_ms, 250);
        assert_eq!(config.co2_spike_limit, None);
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);
    }

    #[test]
    fn test_template_override() {
        let config =
            LinkConfig::from_yaml_str("templates:\n  uv_filter: [2, 0, 255, 86, 255, 2, 255]\n")
                .unwrap();
        assert_eq!(config.templates.uv_filter.0[3], 0x56);
        assert_eq!(config.templates.pump, FrameTemplates::default().pump);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            LinkConfig::from_yaml_str("baud_rate: 0\n"),
            Err(LinkError::Config(_))
        ));
        assert!(matches!(
            LinkConfig::default().with_command_interval(Duration::ZERO).validate(),
            Err(LinkError::Config(msg)) if msg.contains("command_interval_ms")
        ));
        assert!(matches!(
            LinkConfig::from_yaml_str("templates:\n  pump: [0, 0, 255, 89, 255, 1, 255]\n"),
            Err(LinkError::Protocol(_))
        ));
        assert!(LinkConfig::from_yaml_str("port: [1, 2]\n").is_err());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = LinkConfig::for_port("COM3").with_sensor_polling(false);
        let yaml = config.to_yaml().unwrap();
        assert_eq!(LinkConfig::from_yaml_str(&yaml).unwrap(), config);
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            LinkConfig::load("/nonexistent/anygrow.yaml"),
            Err(LinkError::Config(_))
        ));
    }
}
