//! # Arm Switch Monitor
//!
//! Infers the physical arm switch position from the pack voltage reported in
//! Fast telemetry. With the switch off the battery ADC reads close to zero;
//! with it on it reads the (possibly sagging) pack voltage.
//!
//! Two thresholds give hysteresis: the state only changes when the reading
//! crosses the threshold *opposite* to the current state, so load transients
//! in the band between them never toggle it.
//!
//! ```text
//!   volts:  0 ───── off ════ dead band ════ on ───── 12.6
//!   Off → On   only at volts >= on
//!   On  → Off  only at volts <= off
//! ```
//!
//! ## Usage
//!
//! ```
//! use quad_ground::safety::switch_monitor::{SwitchMonitor, SwitchState, SwitchThresholds};
//!
//! let mut monitor = SwitchMonitor::new(SwitchThresholds::new(8.0, 5.0));
//! assert_eq!(monitor.update(9.0).state, SwitchState::On);
//! assert_eq!(monitor.update(6.0).state, SwitchState::On); // dead band
//! assert!(monitor.update(4.0).turned_off());
//! ```

use serde::Serialize;
use std::fmt;

/// Debounced arm switch position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SwitchState {
    /// No Fast telemetry seen yet on this connection
    #[default]
    Unknown,
    On,
    Off,
}

impl fmt::Display for SwitchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SwitchState::Unknown => "UNKNOWN",
            SwitchState::On => "ON",
            SwitchState::Off => "OFF",
        };
        f.write_str(text)
    }
}

/// Voltage thresholds for the hysteresis classifier
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwitchThresholds {
    /// Readings at or above this mean the switch is on
    pub on_volts: f32,
    /// Readings at or below this mean the switch is off (must be below `on_volts`)
    pub off_volts: f32,
}

impl SwitchThresholds {
    pub const fn new(on_volts: f32, off_volts: f32) -> Self {
        Self { on_volts, off_volts }
    }
}

impl Default for SwitchThresholds {
    fn default() -> Self {
        Self::new(8.0, 5.0)
    }
}

/// Outcome of feeding one reading to the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchUpdate {
    pub previous: SwitchState,
    pub state: SwitchState,
    pub changed: bool,
}

impl SwitchUpdate {
    /// True for the On → Off edge, which must immediately stop the motors
    pub fn turned_off(&self) -> bool {
        self.changed && self.previous == SwitchState::On && self.state == SwitchState::Off
    }

    pub fn turned_on(&self) -> bool {
        self.changed && self.state == SwitchState::On
    }
}

/// Hysteresis classifier for the arm switch
#[derive(Debug, Clone)]
pub struct SwitchMonitor {
    thresholds: SwitchThresholds,
    state: SwitchState,
}

impl SwitchMonitor {
    pub fn new(thresholds: SwitchThresholds) -> Self {
        Self {
            thresholds,
            state: SwitchState::Unknown,
        }
    }

    /// Feed one pack voltage reading
    ///
    /// The first reading after construction or [`reset`](Self::reset) is
    /// classified with the on threshold alone.
    pub fn update(&mut self, volts: f32) -> SwitchUpdate {
        let previous = self.state;

        self.state = match previous {
            SwitchState::Unknown => {
                if volts >= self.thresholds.on_volts {
                    SwitchState::On
                } else {
                    SwitchState::Off
                }
            }
            SwitchState::On if volts <= self.thresholds.off_volts => SwitchState::Off,
            SwitchState::Off if volts >= self.thresholds.on_volts => SwitchState::On,
            unchanged => unchanged,
        };

        SwitchUpdate {
            previous,
            state: self.state,
            changed: previous != self.state,
        }
    }

    pub fn state(&self) -> SwitchState {
        self.state
    }

    /// True only when the switch has been positively classified as off
    pub fn is_confirmed_off(&self) -> bool {
        self.state == SwitchState::Off
    }

    pub fn is_on(&self) -> bool {
        self.state == SwitchState::On
    }

    pub fn thresholds(&self) -> SwitchThresholds {
        self.thresholds
    }

    /// Forget the current classification (new or closed connection)
    pub fn reset(&mut self) {
        self.state = SwitchState::Unknown;
    }
}
