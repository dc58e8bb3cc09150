//! # Motor Command Encoder
//!
//! Encodes motor powers into the 4-byte host → vehicle command.

use super::packets::MOTOR_COMMAND_LEN;
use crate::motors::{Motor, MotorPowers};

/// Encode motor powers into a command frame
///
/// One unsigned byte per motor, in the fixed channel order
/// front-left, front-right, back-left, back-right. There is no header and
/// no checksum; the vehicle reads exactly four bytes at a time.
///
/// # Examples
///
/// ```
/// use quad_ground::motors::MotorPowers;
/// use quad_ground::protocol::encoder::encode_motor_command;
///
/// let command = encode_motor_command(&MotorPowers::new(10, 20, 30, 40));
/// assert_eq!(command, [10, 20, 30, 40]);
/// ```
pub fn encode_motor_command(powers: &MotorPowers) -> [u8; MOTOR_COMMAND_LEN] {
    let mut command = [0u8; MOTOR_COMMAND_LEN];
    for motor in Motor::ALL {
        command[motor.index()] = powers.get(motor);
    }
    command
}
