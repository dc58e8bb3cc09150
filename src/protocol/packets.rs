//! # Link Protocol Constants and Types
//!
//! Frame layouts for the vehicle → host telemetry stream and the decoded
//! record types.
//!
//! ## Fast frame (`0xA2`, 20 bytes)
//!
//! ```text
//! type(1) seq(2) loop_us(2) bat_adc(2) m0 m1 m2 m3 roll_c(2) pitch_c(2) gx_c(2) gy_c(2) csum(1)
//! ```
//!
//! ## Debug frame (`0xA3`, 14 bytes)
//!
//! ```text
//! type(1) seq(2) loop_us(2) e_roll_c(2) e_pitch_c(2) u_roll_c(2) u_pitch_c(2) csum(1)
//! ```
//!
//! Multi-byte fields are big-endian; `_c` fields are signed hundredths.

use serde::Serialize;

use crate::motors::MotorPowers;

/// Fast telemetry frame tag (attitude, gyro, battery, motors)
pub const PKT_FAST: u8 = 0xA2;

/// Debug telemetry frame tag (controller errors and efforts)
pub const PKT_DEBUG: u8 = 0xA3;

/// Fast frame length including tag and checksum
pub const FAST_FRAME_LEN: usize = 20;

/// Debug frame length including tag and checksum
pub const DEBUG_FRAME_LEN: usize = 14;

/// Motor command length (one byte per motor)
pub const MOTOR_COMMAND_LEN: usize = 4;

/// Handshake token that asks the vehicle for its reset banner
pub const HANDSHAKE_TOKEN: &[u8] = b"HELLO\n";

/// Full-scale value of the vehicle's 12-bit battery ADC
pub const ADC_FULL_SCALE: f32 = 4095.0;

/// Voltage-divider calibration: pack volts at ADC full scale
pub const VBAT_RATIO: f32 = 13.21;

/// Divisor for centi-degree and centi-unit fields
pub const CENTI_SCALE: f32 = 100.0;

/// Telemetry frame kinds, identified by the first byte of each frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FrameType {
    Fast,
    Debug,
}

impl FrameType {
    /// Look up the frame type for a tag byte
    ///
    /// # Examples
    ///
    /// ```
    /// use quad_ground::protocol::packets::FrameType;
    ///
    /// assert_eq!(FrameType::from_tag(0xA2), Some(FrameType::Fast));
    /// assert_eq!(FrameType::from_tag(0x00), None);
    /// ```
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            PKT_FAST => Some(FrameType::Fast),
            PKT_DEBUG => Some(FrameType::Debug),
            _ => None,
        }
    }

    pub const fn tag(self) -> u8 {
        match self {
            FrameType::Fast => PKT_FAST,
            FrameType::Debug => PKT_DEBUG,
        }
    }

    /// Total frame length in bytes (tag and checksum included)
    pub const fn frame_len(self) -> usize {
        match self {
            FrameType::Fast => FAST_FRAME_LEN,
            FrameType::Debug => DEBUG_FRAME_LEN,
        }
    }
}

/// Convert a raw battery ADC reading to pack volts
///
/// # Examples
///
/// ```
/// use quad_ground::protocol::packets::adc_to_volts;
///
/// assert_eq!(adc_to_volts(0), 0.0);
/// assert!((adc_to_volts(4095) - 13.21).abs() < 1e-4);
/// ```
pub fn adc_to_volts(adc: u16) -> f32 {
    (adc as f32 / ADC_FULL_SCALE) * VBAT_RATIO
}

/// Decoded Fast frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FastRecord {
    /// Vehicle transmit sequence number (wraps at 65535)
    pub seq: u16,

    /// Vehicle main loop interval in microseconds
    pub loop_us: u16,

    /// Raw battery ADC reading (0-4095)
    pub bat_adc: u16,

    /// Battery pack voltage derived from `bat_adc`
    pub battery_volts: f32,

    /// Motor powers the vehicle is currently applying
    pub motors: MotorPowers,

    /// Roll angle in degrees
    pub roll_deg: f32,

    /// Pitch angle in degrees
    pub pitch_deg: f32,

    /// Gyro X rate in degrees per second
    pub gyro_x_dps: f32,

    /// Gyro Y rate in degrees per second
    pub gyro_y_dps: f32,

    /// Checksum byte as received
    pub checksum: u8,
}

/// Decoded Debug frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DebugRecord {
    pub seq: u16,

    pub loop_us: u16,

    /// Roll error in degrees
    pub roll_error_deg: f32,

    /// Pitch error in degrees
    pub pitch_error_deg: f32,

    /// Roll control effort
    pub roll_effort: f32,

    /// Pitch control effort
    pub pitch_effort: f32,

    pub checksum: u8,
}

/// A telemetry record that passed checksum verification
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", content = "record", rename_all = "lowercase")]
pub enum TelemetryRecord {
    Fast(FastRecord),
    Debug(DebugRecord),
}

impl TelemetryRecord {
    pub fn frame_type(&self) -> FrameType {
        match self {
            TelemetryRecord::Fast(_) => FrameType::Fast,
            TelemetryRecord::Debug(_) => FrameType::Debug,
        }
    }

    pub fn seq(&self) -> u16 {
        match self {
            TelemetryRecord::Fast(record) => record.seq,
            TelemetryRecord::Debug(record) => record.seq,
        }
    }
}
