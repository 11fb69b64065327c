//! Per-command frame headers.
//!
//! Several opcode bytes (pump, UV filter, channel LED) have never been
//! confirmed against the board's documentation. They live in this table
//! rather than in the encoder so a corrected table can be swapped in
//! (see [`PacketCodec::with_templates`](crate::PacketCodec::with_templates))
//! without touching the framing logic.

use crate::constants::*;
use crate::error::*;

/// The fixed leading bytes of a command frame: STX, tag and opcode bytes.
///
/// Payload bytes follow immediately after the header; the rest of the frame
/// is filler up to the trailing ETX.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct FrameHeader(pub [u8; HEADER_LEN]);

impl FrameHeader {
    /// Build a header from its tag and the three opcode bytes at offsets 3, 5 and 6.
    ///
    /// Offsets 2 and 4 are filler in every known command.
    pub const fn new(tag: u8, opcode: u8, selector: u8, separator: u8) -> Self {
        FrameHeader([STX, tag, FILLER, opcode, FILLER, selector, separator])
    }

    /// Tag byte of this header.
    pub const fn tag(&self) -> u8 {
        self.0[TAG_OFFSET]
    }

    /// Get the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; HEADER_LEN] {
        &self.0
    }

    pub(crate) fn check(&self, command: &'static str) -> ProtocolResult<()> {
        if self.0[0] != STX {
            return Err(ProtocolError::Template {
                command,
                reason: format!("header starts with 0x{:02X}, not STX", self.0[0]),
            });
        }
        Ok(())
    }
}

/// Header table for every command kind.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FrameTemplates {
    /// `02 01 FF 4C FF 00 FF` + mode.
    pub led_mode: FrameHeader,
    /// `02 01 FF 4D FF 00 FF` + 16 channel bytes (opcode unverified).
    pub channel_led: FrameHeader,
    /// `02 02 FF 53 FF 00 FF`.
    pub sensor_request: FrameHeader,
    /// `02 02 FF 54 FF 00 FF` + BCD hour, minute, second.
    pub time_sync: FrameHeader,
    /// `02 00 FF 59 FF 01 FF` + state (opcode unverified).
    pub pump: FrameHeader,
    /// `02 00 FF 59 FF 02 FF` + state (opcode unverified).
    pub uv_filter: FrameHeader,
}

impl Default for FrameTemplates {
    fn default() -> Self {
        FrameTemplates {
            led_mode: FrameHeader::new(TAG_LED, OP_LED_MODE, 0x00, FILLER),
            channel_led: FrameHeader::new(TAG_LED, OP_CHANNEL_LED, 0x00, FILLER),
            sensor_request: FrameHeader::new(TAG_SENSOR, OP_SENSOR_REQUEST, 0x00, FILLER),
            time_sync: FrameHeader::new(TAG_SENSOR, OP_TIME_SYNC, 0x00, FILLER),
            pump: FrameHeader::new(TAG_ACTUATOR, OP_RELAY, RELAY_PUMP, FILLER),
            uv_filter: FrameHeader::new(TAG_ACTUATOR, OP_RELAY, RELAY_UV_FILTER, FILLER),
        }
    }
}

impl FrameTemplates {
    /// Header used for the given command.
    pub fn header_for(&self, command: &crate::Command) -> &FrameHeader {
        use crate::Command;
        match command {
            Command::LedMode(_) => &self.led_mode,
            Command::ChannelLed { .. } => &self.channel_led,
            Command::SensorRequest => &self.sensor_request,
            Command::TimeSync { .. } => &self.time_sync,
            Command::Pump { .. } => &self.pump,
            Command::UvFilter { .. } => &self.uv_filter,
        }
    }

    /// Check every header in the table.
    pub fn validate(&self) -> ProtocolResult<()> {
        self.led_mode.check("led_mode")?;
        self.channel_led.check("channel_led")?;
        self.sensor_request.check("sensor_request")?;
        self.time_sync.check("time_sync")?;
        self.pump.check("pump")?;
        self.uv_filter.check("uv_filter")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_headers() {
        let t = FrameTemplates::default();
        assert_eq!(t.led_mode.0, [0x02, 0x01, 0xFF, 0x4C, 0xFF, 0x00, 0xFF]);
        assert_eq!(t.sensor_request.0, [0x02, 0x02, 0xFF, 0x53, 0xFF, 0x00, 0xFF]);
        assert_eq!(t.pump.0, [0x02, 0x00, 0xFF, 0x59, 0xFF, 0x01, 0xFF]);
        assert_eq!(t.uv_filter.0, [0x02, 0x00, 0xFF, 0x59, 0xFF, 0x02, 0xFF]);
        assert!(t.validate().is_ok());
    }

    #[test]
    fn test_header_without_stx_rejected() {
        let mut t = FrameTemplates::default();
        t.pump.0[0] = 0x00;
        assert!(matches!(
            t.validate(),
            Err(ProtocolError::Template { command: "pump", .. })
        ));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_partial_override_from_yaml() {
        let yaml = "pump: [2, 0, 255, 80, 255, 1, 255]\n";
        let t: FrameTemplates = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(t.pump.0[3], 0x50);
        assert_eq!(t.led_mode, FrameTemplates::default().led_mode);
    }
}
