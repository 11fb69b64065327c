//! Protocol constants
//!
//! Byte values and field offsets of the AnyGrow serial protocol. Every frame,
//! in both directions, is exactly [`FRAME_LEN`] bytes long:
//!
//! ```text
//! +-----+-----+--------------------+----------------+-----+
//! | STX | TAG | opcode / payload   | 0xFF filler... | ETX |
//! +-----+-----+--------------------+----------------+-----+
//! ```

// ============================================================================
// Framing
// ============================================================================

/// Start-of-frame sentinel.
pub const STX: u8 = 0x02;
/// End-of-frame sentinel.
pub const ETX: u8 = 0x03;
/// Filler byte for unused frame positions.
pub const FILLER: u8 = 0xFF;
/// Total length of every frame, inbound and outbound.
pub const FRAME_LEN: usize = 30;
/// Length of the fixed command header (STX, tag and opcode bytes).
pub const HEADER_LEN: usize = 7;
/// Offset of the tag byte.
pub const TAG_OFFSET: usize = 1;

// ============================================================================
// Device tags (offset 1)
// ============================================================================

/// Pump / UV-filter device class.
pub const TAG_ACTUATOR: u8 = 0x00;
/// LED device class.
pub const TAG_LED: u8 = 0x01;
/// Sensor / clock device class.
pub const TAG_SENSOR: u8 = 0x02;
/// Tag carried by inbound telemetry frames.
pub const SENSOR_RESPONSE_TAG: u8 = TAG_SENSOR;

// ============================================================================
// Opcodes (offset 3)
// ============================================================================

/// `L`: whole-board LED mode.
pub const OP_LED_MODE: u8 = 0x4C;
/// `M`: per-channel LED settings.
pub const OP_CHANNEL_LED: u8 = 0x4D;
/// `S`: sensor telemetry request.
pub const OP_SENSOR_REQUEST: u8 = 0x53;
/// `T`: clock sync.
pub const OP_TIME_SYNC: u8 = 0x54;
/// `Y`: relay switch (pump, UV filter).
pub const OP_RELAY: u8 = 0x59;

/// Relay selector for the nutrient pump (offset 5).
pub const RELAY_PUMP: u8 = 0x01;
/// Relay selector for the UV filter (offset 5).
pub const RELAY_UV_FILTER: u8 = 0x02;

// ============================================================================
// LED mode values
// ============================================================================

/// All LEDs off.
pub const LED_MODE_OFF: u8 = 0x00;
/// All LEDs on.
pub const LED_MODE_ON: u8 = 0x01;
/// Mood lighting.
pub const LED_MODE_MOOD: u8 = 0x02;

// ============================================================================
// Channel LED payload
// ============================================================================

/// Number of LED channels on the board.
pub const LED_CHANNEL_COUNT: usize = 4;
/// Bytes per channel entry: `[on][hz_hi][hz_lo][brightness]`.
pub const CHANNEL_ENTRY_LEN: usize = 4;

// ============================================================================
// Telemetry digit fields (inclusive offsets into the 30-byte window)
// ============================================================================

/// Each telemetry digit is stored as `digit + DIGIT_BASE` (ASCII).
pub const DIGIT_BASE: u8 = 0x30;
/// Temperature digits, tenths of a degree Celsius.
pub const TEMPERATURE_DIGITS: (usize, usize) = (10, 12);
/// Relative humidity digits, tenths of a percent.
pub const HUMIDITY_DIGITS: (usize, usize) = (14, 16);
/// CO2 digits, ppm.
pub const CO2_DIGITS: (usize, usize) = (18, 21);
/// Illuminance digits, lux.
pub const ILLUMINANCE_DIGITS: (usize, usize) = (23, 26);
