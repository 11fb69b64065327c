//! Telemetry decoding.
//!
//! The board answers a sensor request with a 30-byte frame whose numeric
//! fields are written one decimal digit per byte, each offset by `0x30`.
//! The serial link delivers these frames in arbitrary chunks, so decoding
//! always looks at the last [`FRAME_LEN`] bytes of whatever has accumulated.

use bytes::{Buf, BytesMut};
use chrono::{DateTime, Local};

use crate::constants::*;

/// Decoded sensor values, before they are stamped with an observation time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorValues {
    /// Air temperature in degrees Celsius (0.1 resolution).
    pub temperature: f64,
    /// Relative humidity in percent (0.1 resolution).
    pub humidity: f64,
    /// CO2 concentration in ppm.
    pub co2_ppm: u32,
    /// Illuminance in lux.
    pub illuminance_lux: u32,
}

impl SensorValues {
    /// Attach an observation time.
    pub fn observed(self, observed_at: DateTime<Local>) -> SensorReading {
        SensorReading {
            temperature: self.temperature,
            humidity: self.humidity,
            co2_ppm: self.co2_ppm,
            illuminance_lux: self.illuminance_lux,
            observed_at,
        }
    }
}

/// One telemetry sample from the board.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SensorReading {
    /// Air temperature in degrees Celsius (0.1 resolution).
    pub temperature: f64,
    /// Relative humidity in percent (0.1 resolution).
    pub humidity: f64,
    /// CO2 concentration in ppm.
    pub co2_ppm: u32,
    /// Illuminance in lux.
    pub illuminance_lux: u32,
    /// When the frame was decoded on the host.
    pub observed_at: DateTime<Local>,
}

impl SensorReading {
    /// The values without the timestamp.
    pub fn values(&self) -> SensorValues {
        SensorValues {
            temperature: self.temperature,
            humidity: self.humidity,
            co2_ppm: self.co2_ppm,
            illuminance_lux: self.illuminance_lux,
        }
    }
}

/// Decode the last 30 bytes of `buffer` as a telemetry frame.
///
/// Earlier bytes are ignored. Returns `None` if fewer than 30 bytes are
/// available, if the window does not start with STX and the sensor tag, or
/// if any digit field holds a non-digit byte.
pub fn decode_sensor_window(buffer: &[u8]) -> Option<SensorValues> {
    let window = buffer.get(buffer.len().checked_sub(FRAME_LEN)?..)?;
    if window[0] != STX || window[TAG_OFFSET] != SENSOR_RESPONSE_TAG {
        return None;
    }

    let temperature = digit_field(window, TEMPERATURE_DIGITS)?;
    let humidity = digit_field(window, HUMIDITY_DIGITS)?;
    let co2_ppm = digit_field(window, CO2_DIGITS)?;
    let illuminance_lux = digit_field(window, ILLUMINANCE_DIGITS)?;

    Some(SensorValues {
        temperature: temperature as f64 / 10.0,
        humidity: humidity as f64 / 10.0,
        co2_ppm,
        illuminance_lux,
    })
}

/// Read the inclusive byte range `[first, last]` as one decimal digit per byte.
pub fn digit_field(window: &[u8], (first, last): (usize, usize)) -> Option<u32> {
    window.get(first..=last)?.iter().try_fold(0u32, |acc, &byte| {
        let digit = byte.checked_sub(DIGIT_BASE).filter(|d| *d <= 9)?;
        acc.checked_mul(10)?.checked_add(digit as u32)
    })
}

/// Render bytes for diagnostic display: lowercase hex pairs joined by commas.
pub fn format_raw(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| hex::encode([*b]))
        .collect::<Vec<_>>()
        .join(",")
}

/// Maximum number of bytes kept while waiting for a valid frame.
pub const MAX_ACCUMULATED: usize = FRAME_LEN * 4;

/// A codec for accumulating inbound bytes until they end in a telemetry frame.
#[derive(Debug)]
pub struct TelemetryAccumulator {
    /// Buffer for accumulating incoming data.
    buffer: BytesMut,
}

impl Default for TelemetryAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryAccumulator {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        TelemetryAccumulator {
            buffer: BytesMut::with_capacity(MAX_ACCUMULATED),
        }
    }

    /// Add received data, discarding the oldest bytes beyond [`MAX_ACCUMULATED`].
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
        if self.buffer.len() > MAX_ACCUMULATED {
            let excess = self.buffer.len() - MAX_ACCUMULATED;
            self.buffer.advance(excess);
        }
    }

    /// Try to decode the buffer. On success the buffer is cleared.
    pub fn decode(&mut self) -> Option<SensorValues> {
        let values = decode_sensor_window(&self.buffer)?;
        self.buffer.clear();
        Some(values)
    }

    /// Get the number of buffered bytes.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a telemetry frame from the digit strings of each field.
    fn telemetry_frame(temp: &str, hum: &str, co2: &str, lux: &str) -> Vec<u8> {
        let mut frame = vec![FILLER; FRAME_LEN];
        frame[0] = STX;
        frame[1] = SENSOR_RESPONSE_TAG;
        frame[FRAME_LEN - 1] = ETX;
        for (digits, (first, _)) in [
            (temp, TEMPERATURE_DIGITS),
            (hum, HUMIDITY_DIGITS),
            (co2, CO2_DIGITS),
            (lux, ILLUMINANCE_DIGITS),
        ] {
            frame[first..first + digits.len()].copy_from_slice(digits.as_bytes());
        }
        frame
    }

    #[test]
    fn test_decode_reference_values() {
        let frame = telemetry_frame("253", "601", "0800", "1500");
        let values = decode_sensor_window(&frame).expect("valid frame");
        assert_eq!(values.temperature, 25.3);
        assert_eq!(values.humidity, 60.1);
        assert_eq!(values.co2_ppm, 800);
        assert_eq!(values.illuminance_lux, 1500);
    }

    #[test]
    fn test_decode_temperature_example() {
        let frame = telemetry_frame("303", "000", "0000", "0000");
        assert_eq!(decode_sensor_window(&frame).unwrap().temperature, 30.3);
    }

    #[test]
    fn test_short_buffer_is_none() {
        let frame = telemetry_frame("253", "601", "0800", "1500");
        for len in 0..FRAME_LEN {
            assert!(decode_sensor_window(&frame[..len]).is_none());
        }
    }

    #[test]
    fn test_wrong_tag_is_none() {
        let mut frame = telemetry_frame("253", "601", "0800", "1500");
        frame[1] = 0x01;
        assert!(decode_sensor_window(&frame).is_none());
    }

    #[test]
    fn test_missing_stx_is_none() {
        let mut frame = telemetry_frame("253", "601", "0800", "1500");
        frame[0] = 0x00;
        assert!(decode_sensor_window(&frame).is_none());
    }

    #[test]
    fn test_non_digit_field_is_none() {
        let mut frame = telemetry_frame("253", "601", "0800", "1500");
        frame[19] = 0x3A;
        assert!(decode_sensor_window(&frame).is_none());
        frame[19] = 0x2F;
        assert!(decode_sensor_window(&frame).is_none());
    }

    #[test]
    fn test_only_last_window_counts() {
        let mut stream = vec![0xAA, 0x02, 0x02, 0x31];
        stream.extend(telemetry_frame("199", "455", "1234", "0042"));
        let values = decode_sensor_window(&stream).unwrap();
        assert_eq!(values.temperature, 19.9);
        assert_eq!(values.humidity, 45.5);
        assert_eq!(values.co2_ppm, 1234);
        assert_eq!(values.illuminance_lux, 42);

        // A trailing partial frame shifts the window off alignment.
        stream.extend([0x02, 0x02]);
        assert!(decode_sensor_window(&stream).is_none());
    }

    #[test]
    fn test_accumulator_partial_reads() {
        let frame = telemetry_frame("253", "601", "0800", "1500");
        let mut acc = TelemetryAccumulator::new();

        acc.push(&frame[..12]);
        assert!(acc.decode().is_none());
        acc.push(&frame[12..]);
        let values = acc.decode().expect("should decode frame");
        assert_eq!(values.co2_ppm, 800);
        assert_eq!(acc.buffered_len(), 0);
    }

    #[test]
    fn test_accumulator_caps_buffer() {
        let mut acc = TelemetryAccumulator::new();
        acc.push(&vec![0x55; MAX_ACCUMULATED * 2]);
        assert_eq!(acc.buffered_len(), MAX_ACCUMULATED);
        acc.push(&telemetry_frame("100", "200", "0300", "0400"));
        assert_eq!(acc.decode().unwrap().illuminance_lux, 400);
    }

    #[test]
    fn test_format_raw() {
        assert_eq!(format_raw(&[0x02, 0xFF, 0x03]), "02,ff,03");
        assert_eq!(format_raw(&[]), "");
    }
}
