//! # Telemetry Decoder
//!
//! Decodes Fast and Debug frames into [`TelemetryRecord`]s and parses the
//! 4-byte motor command (used by the simulated vehicle in tests).

use super::checksum::{verify, xor8};
use super::packets::*;
use crate::error::{GroundError, Result};
use crate::motors::MotorPowers;

/// Decode a complete telemetry frame
///
/// # Arguments
///
/// * `frame` - Whole frame bytes, tag first and checksum last
///
/// # Returns
///
/// * `Result<TelemetryRecord>` - Decoded record, or error if invalid
///
/// # Errors
///
/// Returns error if:
/// - The first byte is not a known frame tag
/// - The frame length does not match its type
/// - The checksum byte is not the XOR of the preceding bytes
///
/// # Examples
///
/// ```
/// use quad_ground::protocol::checksum::xor8;
/// use quad_ground::protocol::decoder::decode_frame;
/// use quad_ground::protocol::packets::TelemetryRecord;
///
/// let mut frame = vec![0xA3, 0x00, 0x07, 0x03, 0xE8, 0x00, 0x64, 0xFF, 0x9C, 0x00, 0x00, 0x00, 0x32];
/// frame.push(xor8(&frame));
///
/// match decode_frame(&frame)? {
///     TelemetryRecord::Debug(record) => {
///         assert_eq!(record.seq, 7);
///         assert_eq!(record.roll_error_deg, 1.0);
///         assert_eq!(record.pitch_error_deg, -1.0);
///     }
///     other => panic!("unexpected record {:?}", other),
/// }
/// # Ok::<(), quad_ground::error::GroundError>(())
/// ```
pub fn decode_frame(frame: &[u8]) -> Result<TelemetryRecord> {
    let Some(&tag) = frame.first() else {
        return Err(GroundError::FrameLength { expected: 1, actual: 0 });
    };

    let frame_type = FrameType::from_tag(tag).ok_or(GroundError::UnknownFrameType(tag))?;

    let expected = frame_type.frame_len();
    if frame.len() != expected {
        return Err(GroundError::FrameLength {
            expected,
            actual: frame.len(),
        });
    }

    if !verify(frame) {
        return Err(GroundError::ChecksumMismatch {
            frame_type,
            computed: xor8(&frame[..expected - 1]),
            received: frame[expected - 1],
        });
    }

    let record = match frame_type {
        FrameType::Fast => TelemetryRecord::Fast(decode_fast(frame)),
        FrameType::Debug => TelemetryRecord::Debug(decode_debug(frame)),
    };

    Ok(record)
}

/// Decode the body of a length- and checksum-verified Fast frame
fn decode_fast(frame: &[u8]) -> FastRecord {
    let bat_adc = read_u16(frame, 5);

    FastRecord {
        seq: read_u16(frame, 1),
        loop_us: read_u16(frame, 3),
        bat_adc,
        battery_volts: adc_to_volts(bat_adc),
        motors: MotorPowers::new(frame[7], frame[8], frame[9], frame[10]),
        roll_deg: read_centi(frame, 11),
        pitch_deg: read_centi(frame, 13),
        gyro_x_dps: read_centi(frame, 15),
        gyro_y_dps: read_centi(frame, 17),
        checksum: frame[19],
    }
}

/// Decode the body of a length- and checksum-verified Debug frame
fn decode_debug(frame: &[u8]) -> DebugRecord {
    DebugRecord {
        seq: read_u16(frame, 1),
        loop_us: read_u16(frame, 3),
        roll_error_deg: read_centi(frame, 5),
        pitch_error_deg: read_centi(frame, 7),
        roll_effort: read_centi(frame, 9),
        pitch_effort: read_centi(frame, 11),
        checksum: frame[13],
    }
}

#[inline]
fn read_u16(frame: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([frame[offset], frame[offset + 1]])
}

/// Signed big-endian hundredths → units
#[inline]
fn read_centi(frame: &[u8], offset: usize) -> f32 {
    i16::from_be_bytes([frame[offset], frame[offset + 1]]) as f32 / CENTI_SCALE
}

/// Decode a 4-byte motor command back into powers
///
/// # Errors
///
/// Returns `FrameLength` if `command` is not exactly 4 bytes.
pub fn decode_motor_command(command: &[u8]) -> Result<MotorPowers> {
    let bytes: [u8; MOTOR_COMMAND_LEN] =
        command.try_into().map_err(|_| GroundError::FrameLength {
            expected: MOTOR_COMMAND_LEN,
            actual: command.len(),
        })?;

    Ok(MotorPowers::from_array(bytes))
}
