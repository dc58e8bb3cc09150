//! # Safety Module
//!
//! Everything that can force the motors to zero:
//! - Arm switch inference from pack voltage, with hysteresis
//! - The ESC reset (calibration) sequencer

pub mod esc_reset;
pub mod switch_monitor;

pub use esc_reset::{EscResetFailure, EscResetProfile, EscResetSequencer, EscResetState};
pub use switch_monitor::{SwitchMonitor, SwitchState, SwitchThresholds};
