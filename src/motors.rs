//! # Motor Power Table
//!
//! The single authoritative set of four motor powers sent to the vehicle on
//! every transmit tick.
//!
//! ## Channel Order
//!
//! | Index | Motor |
//! |-------|-------|
//! | 0 | Front left |
//! | 1 | Front right |
//! | 2 | Back left |
//! | 3 | Back right |
//!
//! Powers are stored as `u8`, so a value outside 0-255 cannot be represented.
//! Ramping computes in `i32` and goes back through [`saturate_power`], which
//! clamps instead of wrapping.

use serde::Serialize;
use std::fmt;
use std::ops::Index;

/// Number of motors on the vehicle
pub const MOTOR_COUNT: usize = 4;

/// Motor identifiers in wire order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Motor {
    FrontLeft,
    FrontRight,
    BackLeft,
    BackRight,
}

impl Motor {
    /// All motors in the fixed channel order used on the wire
    pub const ALL: [Motor; MOTOR_COUNT] = [
        Motor::FrontLeft,
        Motor::FrontRight,
        Motor::BackLeft,
        Motor::BackRight,
    ];

    /// Position of this motor in the command frame
    pub const fn index(self) -> usize {
        match self {
            Motor::FrontLeft => 0,
            Motor::FrontRight => 1,
            Motor::BackLeft => 2,
            Motor::BackRight => 3,
        }
    }

    /// Short label used in logs
    pub const fn label(self) -> &'static str {
        match self {
            Motor::FrontLeft => "FL",
            Motor::FrontRight => "FR",
            Motor::BackLeft => "BL",
            Motor::BackRight => "BR",
        }
    }
}

/// Clamp a power computed in a wider integer type into 0-255
///
/// # Examples
///
/// ```
/// use quad_ground::motors::saturate_power;
///
/// assert_eq!(saturate_power(-3), 0);
/// assert_eq!(saturate_power(120), 120);
/// assert_eq!(saturate_power(300), 255);
/// ```
pub fn saturate_power(level: i32) -> u8 {
    level.clamp(0, u8::MAX as i32) as u8
}

/// Power level (0-255) for each of the four motors
///
/// # Examples
///
/// ```
/// use quad_ground::motors::{Motor, MotorPowers};
///
/// let mut powers = MotorPowers::ZERO;
/// powers.set(Motor::BackRight, 40);
/// assert_eq!(powers[Motor::BackRight], 40);
/// assert!(!powers.is_zero());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct MotorPowers([u8; MOTOR_COUNT]);

impl MotorPowers {
    /// All motors stopped
    pub const ZERO: MotorPowers = MotorPowers([0; MOTOR_COUNT]);

    /// Build from individual powers in channel order
    pub const fn new(front_left: u8, front_right: u8, back_left: u8, back_right: u8) -> Self {
        Self([front_left, front_right, back_left, back_right])
    }

    /// Same power on every motor
    pub const fn uniform(power: u8) -> Self {
        Self([power; MOTOR_COUNT])
    }

    /// Build from raw wire bytes (channel order)
    pub const fn from_array(powers: [u8; MOTOR_COUNT]) -> Self {
        Self(powers)
    }

    /// Powers in channel order
    pub const fn as_array(&self) -> [u8; MOTOR_COUNT] {
        self.0
    }

    pub fn get(&self, motor: Motor) -> u8 {
        self.0[motor.index()]
    }

    pub fn set(&mut self, motor: Motor, power: u8) {
        self.0[motor.index()] = power;
    }

    pub fn set_all(&mut self, power: u8) {
        self.0 = [power; MOTOR_COUNT];
    }

    /// Stop every motor
    pub fn zero(&mut self) {
        self.set_all(0);
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&power| power == 0)
    }

    /// Iterate `(motor, power)` pairs in channel order
    pub fn iter(&self) -> impl Iterator<Item = (Motor, u8)> + '_ {
        Motor::ALL.iter().map(move |&motor| (motor, self.get(motor)))
    }

    /// Add `delta` to every motor, clamping each result to `0..=ceiling`
    ///
    /// This is one step of the hold-to-ramp control.
    pub fn ramp(&mut self, delta: i32, ceiling: u8) {
        for power in self.0.iter_mut() {
            *power = saturate_power((*power as i32).saturating_add(delta)).min(ceiling);
        }
    }

    /// Lower any motor above `ceiling` down to it
    pub fn limit(&mut self, ceiling: u8) {
        for power in self.0.iter_mut() {
            *power = (*power).min(ceiling);
        }
    }
}

impl Index<Motor> for MotorPowers {
    type Output = u8;

    fn index(&self, motor: Motor) -> &u8 {
        &self.0[motor.index()]
    }
}

impl fmt::Display for MotorPowers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (motor, power) in self.iter() {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{}={}", motor.label(), power)?;
            first = false;
        }
        Ok(())
    }
}
