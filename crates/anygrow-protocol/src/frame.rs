//! Frame encoding.
//!
//! Every command frame is assembled from its [`FrameHeader`], the command's
//! payload bytes, filler, and the trailing ETX:
//!
//! ```text
//! +------------------+-----------+------------------+-----+
//! | header (7 bytes) | payload   | 0xFF filler ...  | ETX |
//! +------------------+-----------+------------------+-----+
//! |<------------------------ 30 bytes -------------------->|
//! ```

use std::fmt;
use std::ops::Deref;

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, Local};

use crate::commands::Command;
use crate::constants::*;
use crate::error::*;
use crate::templates::FrameTemplates;
use crate::telemetry::{decode_sensor_window, SensorReading, SensorValues};

/// One fixed-length protocol frame.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Frame([u8; FRAME_LEN]);

impl Frame {
    /// Wrap exactly [`FRAME_LEN`] bytes.
    pub fn from_slice(bytes: &[u8]) -> ProtocolResult<Self> {
        let arr: [u8; FRAME_LEN] = bytes.try_into().map_err(|_| ProtocolError::FrameLength {
            expected: FRAME_LEN,
            actual: bytes.len(),
        })?;
        Ok(Frame(arr))
    }

    /// Get the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.0
    }

    /// Tag byte of the frame.
    pub fn tag(&self) -> u8 {
        self.0[TAG_OFFSET]
    }

    /// Uppercase hex without separators, as the board documentation writes frames.
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }
}

impl Deref for Frame {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({})", self.to_hex())
    }
}

/// Stateless encoder/decoder for the board's frames.
///
/// The codec only holds the header table; it never touches I/O.
#[derive(Debug, Clone, Default)]
pub struct PacketCodec {
    templates: FrameTemplates,
}

impl PacketCodec {
    /// Create a codec with the documented header table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a codec with a custom header table.
    pub fn with_templates(templates: FrameTemplates) -> ProtocolResult<Self> {
        templates.validate()?;
        Ok(PacketCodec { templates })
    }

    /// The header table in use.
    pub fn templates(&self) -> &FrameTemplates {
        &self.templates
    }

    /// Encode a command into a frame, or reject it.
    pub fn encode(&self, command: &Command) -> ProtocolResult<Frame> {
        let header = self.templates.header_for(command);
        header.check(command.name())?;
        let payload = command.payload()?;

        let used = HEADER_LEN + payload.len() + 1;
        if used > FRAME_LEN {
            return Err(ProtocolError::FrameLength {
                expected: FRAME_LEN,
                actual: used,
            });
        }

        let mut buf = BytesMut::with_capacity(FRAME_LEN);
        buf.put_slice(header.as_bytes());
        buf.put_slice(&payload);
        buf.put_bytes(FILLER, FRAME_LEN - used);
        buf.put_u8(ETX);

        let frame = Frame::from_slice(&buf)?;
        log::trace!("encoded {} -> {}", command.name(), frame.to_hex());
        Ok(frame)
    }

    /// Try to decode telemetry from an accumulated byte buffer, stamping it
    /// with the current local time.
    ///
    /// Returns `None` when the buffer does not (yet) end in a valid telemetry frame.
    pub fn decode(&self, buffer: &[u8]) -> Option<SensorReading> {
        self.decode_at(buffer, Local::now())
    }

    /// Like [`decode`](Self::decode) with an explicit observation time.
    pub fn decode_at(&self, buffer: &[u8], observed_at: DateTime<Local>) -> Option<SensorReading> {
        decode_sensor_window(buffer).map(|values| values.observed(observed_at))
    }

    /// Build the frame a board sends in answer to a sensor request.
    ///
    /// This is the board side of the link and is only needed by simulated
    /// boards. Values are clamped to their field widths.
    pub fn encode_telemetry(values: &SensorValues) -> Frame {
        let mut bytes = [FILLER; FRAME_LEN];
        bytes[0] = STX;
        bytes[TAG_OFFSET] = SENSOR_RESPONSE_TAG;
        bytes[FRAME_LEN - 1] = ETX;

        put_digits(&mut bytes, TEMPERATURE_DIGITS, tenths(values.temperature));
        put_digits(&mut bytes, HUMIDITY_DIGITS, tenths(values.humidity));
        put_digits(&mut bytes, CO2_DIGITS, values.co2_ppm);
        put_digits(&mut bytes, ILLUMINANCE_DIGITS, values.illuminance_lux);
        Frame(bytes)
    }
}

fn tenths(value: f64) -> u32 {
    (value * 10.0).round().max(0.0) as u32
}

fn put_digits(frame: &mut [u8; FRAME_LEN], (first, last): (usize, usize), value: u32) {
    let width = (last - first + 1) as u32;
    let mut rest = value.min(10u32.pow(width) - 1);
    for slot in frame[first..=last].iter_mut().rev() {
        *slot = DIGIT_BASE + (rest % 10) as u8;
        rest /= 10;
    }
}
