//! Commands that can be sent to the controller board.

use std::fmt;
use std::str::FromStr;

use chrono::{Local, Timelike};

use crate::constants::*;
use crate::error::*;

/// Whole-board lighting mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum LedMode {
    /// All LEDs off.
    Off,
    /// All LEDs on.
    On,
    /// Mood lighting.
    Mood,
}

impl LedMode {
    /// Wire value of this mode.
    pub const fn code(self) -> u8 {
        match self {
            LedMode::Off => LED_MODE_OFF,
            LedMode::On => LED_MODE_ON,
            LedMode::Mood => LED_MODE_MOOD,
        }
    }

    /// Returns the mode as a lowercase string.
    pub const fn as_str(self) -> &'static str {
        match self {
            LedMode::Off => "off",
            LedMode::On => "on",
            LedMode::Mood => "mood",
        }
    }
}

impl fmt::Display for LedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LedMode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(LedMode::Off),
            "on" => Ok(LedMode::On),
            "mood" => Ok(LedMode::Mood),
            other => Err(ProtocolError::InvalidCommand(format!(
                "unknown LED mode '{}' (expected off, on or mood)",
                other
            ))),
        }
    }
}

/// Settings for one LED channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChannelSetting {
    /// Whether the channel is lit.
    pub on: bool,
    /// PWM frequency in Hz.
    pub hz: u16,
    /// Brightness, 0-255.
    pub brightness: u8,
}

impl ChannelSetting {
    /// Create a channel setting.
    pub const fn new(on: bool, hz: u16, brightness: u8) -> Self {
        ChannelSetting { on, hz, brightness }
    }

    /// A dark channel at the board's idle frequency.
    pub const fn off() -> Self {
        ChannelSetting::new(false, 1, 0)
    }

    /// Wire encoding: `[on][hz_hi][hz_lo][brightness]`.
    pub fn to_bytes(&self) -> [u8; CHANNEL_ENTRY_LEN] {
        let [hz_hi, hz_lo] = self.hz.to_be_bytes();
        [u8::from(self.on), hz_hi, hz_lo, self.brightness]
    }
}

impl Default for ChannelSetting {
    fn default() -> Self {
        ChannelSetting::off()
    }
}

/// Commands that can be sent to the controller board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Set the whole-board lighting mode.
    LedMode(LedMode),

    /// Switch the nutrient pump.
    Pump {
        /// Pump relay state.
        on: bool,
    },

    /// Switch the UV filter.
    UvFilter {
        /// UV relay state.
        on: bool,
    },

    /// Ask the board to send a telemetry frame.
    SensorRequest,

    /// Set the board's real-time clock.
    TimeSync {
        /// Hour, 0-23.
        hour: u8,
        /// Minute, 0-59.
        minute: u8,
        /// Second, 0-59.
        second: u8,
    },

    /// Per-channel LED settings. Exactly [`LED_CHANNEL_COUNT`] entries are
    /// accepted; anything else is rejected at encode time.
    ChannelLed {
        /// One entry per channel, in channel order.
        channels: Vec<ChannelSetting>,
    },
}

impl Command {
    /// Build a clock sync command from the host's local time.
    pub fn time_sync_now() -> Self {
        let now = Local::now();
        Command::TimeSync {
            hour: now.hour() as u8,
            minute: now.minute() as u8,
            second: now.second() as u8,
        }
    }

    /// Short, stable name of the command kind (used for logs and metric labels).
    pub const fn name(&self) -> &'static str {
        match self {
            Command::LedMode(_) => "led_mode",
            Command::Pump { .. } => "pump",
            Command::UvFilter { .. } => "uv_filter",
            Command::SensorRequest => "sensor_request",
            Command::TimeSync { .. } => "time_sync",
            Command::ChannelLed { .. } => "channel_led",
        }
    }

    /// Whether this is a telemetry request.
    pub fn is_sensor_request(&self) -> bool {
        matches!(self, Command::SensorRequest)
    }

    /// Check the structural constraints the board relies on.
    ///
    /// Encoding performs the same checks; this lets producers reject a
    /// command without building a frame.
    pub fn validate(&self) -> ProtocolResult<()> {
        match self {
            Command::TimeSync {
                hour,
                minute,
                second,
            } => {
                check_range("hour", *hour, 23)?;
                check_range("minute", *minute, 59)?;
                check_range("second", *second, 59)
            }
            Command::ChannelLed { channels } if channels.len() != LED_CHANNEL_COUNT => {
                Err(ProtocolError::ChannelCount {
                    expected: LED_CHANNEL_COUNT,
                    actual: channels.len(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Payload bytes placed right after the template header.
    pub(crate) fn payload(&self) -> ProtocolResult<Vec<u8>> {
        self.validate()?;
        let payload = match self {
            Command::LedMode(mode) => vec![mode.code()],
            Command::Pump { on } | Command::UvFilter { on } => vec![u8::from(*on)],
            Command::SensorRequest => Vec::new(),
            Command::TimeSync {
                hour,
                minute,
                second,
            } => vec![to_bcd(*hour), to_bcd(*minute), to_bcd(*second)],
            Command::ChannelLed { channels } => channels
                .iter()
                .flat_map(|channel| channel.to_bytes())
                .collect(),
        };
        Ok(payload)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::LedMode(mode) => write!(f, "led {}", mode),
            Command::Pump { on } => write!(f, "pump {}", on_off(*on)),
            Command::UvFilter { on } => write!(f, "uv {}", on_off(*on)),
            Command::SensorRequest => f.write_str("sensor request"),
            Command::TimeSync {
                hour,
                minute,
                second,
            } => write!(f, "time sync {:02}:{:02}:{:02}", hour, minute, second),
            Command::ChannelLed { channels } => {
                f.write_str("channels")?;
                for channel in channels {
                    write!(
                        f,
                        " [{} {}Hz {}]",
                        on_off(channel.on),
                        channel.hz,
                        channel.brightness
                    )?;
                }
                Ok(())
            }
        }
    }
}

/// Binary-coded decimal: `(n / 10) * 16 + n % 10`.
pub const fn to_bcd(n: u8) -> u8 {
    (n / 10) * 16 + (n % 10)
}

fn check_range(field: &'static str, value: u8, max: u8) -> ProtocolResult<()> {
    if value > max {
        return Err(ProtocolError::FieldOutOfRange {
            field,
            value: value as u32,
            max: max as u32,
        });
    }
    Ok(())
}

fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}
