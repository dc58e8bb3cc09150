//! # Battery Gauge
//!
//! Turns the pack voltage from Fast telemetry into a smoothed voltage, a
//! per-cell voltage and a state-of-charge estimate.
//!
//! The estimate uses a resting (open circuit) LiPo discharge curve, so it
//! reads low while the motors load the pack. Good enough to decide when to
//! land, not a fuel gauge.

use serde::Serialize;

/// Resting LiPo cell voltage → state of charge, highest voltage first
const LIPO_OCV_CURVE: [(f32, f32); 18] = [
    (4.20, 100.0),
    (4.15, 95.0),
    (4.10, 90.0),
    (4.05, 85.0),
    (4.00, 78.0),
    (3.95, 70.0),
    (3.90, 62.0),
    (3.85, 56.0),
    (3.80, 45.0),
    (3.75, 35.0),
    (3.70, 25.0),
    (3.65, 18.0),
    (3.60, 12.0),
    (3.55, 9.0),
    (3.50, 7.0),
    (3.45, 4.0),
    (3.40, 2.0),
    (3.30, 0.0),
];

/// State of charge at or above which the pack is reported `Good`
pub const GOOD_PERCENT: u8 = 60;

/// State of charge at or above which the pack is reported `Low`
pub const LOW_PERCENT: u8 = 30;

/// Coarse battery level for display colouring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BatteryLevel {
    Good,
    Low,
    Critical,
}

impl BatteryLevel {
    pub fn from_percent(percent: u8) -> Self {
        if percent >= GOOD_PERCENT {
            BatteryLevel::Good
        } else if percent >= LOW_PERCENT {
            BatteryLevel::Low
        } else {
            BatteryLevel::Critical
        }
    }
}

/// Smoothed battery reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BatteryStatus {
    /// Smoothed pack voltage
    pub volts: f32,
    pub per_cell: f32,
    pub percent: u8,
    pub level: BatteryLevel,
}

/// State of charge (0-100) for one resting LiPo cell, linearly
/// interpolated between curve points and clamped at both ends
///
/// # Examples
///
/// ```
/// use quad_ground::telemetry::battery::lipo_percent;
///
/// assert_eq!(lipo_percent(4.25), 100.0);
/// assert_eq!(lipo_percent(3.75), 35.0);
/// assert_eq!(lipo_percent(3.10), 0.0);
/// ```
pub fn lipo_percent(cell_volts: f32) -> f32 {
    let (top_volts, top_percent) = LIPO_OCV_CURVE[0];
    let (bottom_volts, bottom_percent) = LIPO_OCV_CURVE[LIPO_OCV_CURVE.len() - 1];

    if cell_volts.is_nan() || cell_volts <= bottom_volts {
        return bottom_percent;
    }
    if cell_volts >= top_volts {
        return top_percent;
    }

    for pair in LIPO_OCV_CURVE.windows(2) {
        let (high_volts, high_percent) = pair[0];
        let (low_volts, low_percent) = pair[1];

        if cell_volts >= low_volts {
            let fraction = (cell_volts - low_volts) / (high_volts - low_volts);
            return low_percent + fraction * (high_percent - low_percent);
        }
    }

    bottom_percent
}

/// Exponentially smoothed battery gauge for an N-cell pack
#[derive(Debug, Clone)]
pub struct BatteryGauge {
    cells: u8,
    alpha: f32,
    smoothed: Option<f32>,
}

impl BatteryGauge {
    /// # Arguments
    ///
    /// * `cells` - Cells in series (at least 1)
    /// * `alpha` - EMA weight of the newest sample, in (0, 1]
    pub fn new(cells: u8, alpha: f32) -> Self {
        Self {
            cells: cells.max(1),
            alpha: alpha.clamp(f32::EPSILON, 1.0),
            smoothed: None,
        }
    }

    /// Fold in one pack voltage sample and return the updated status
    pub fn update(&mut self, pack_volts: f32) -> BatteryStatus {
        let volts = match self.smoothed {
            Some(previous) => self.alpha * pack_volts + (1.0 - self.alpha) * previous,
            None => pack_volts,
        };
        self.smoothed = Some(volts);
        self.status_for(volts)
    }

    /// Latest status, if any sample has been seen
    pub fn status(&self) -> Option<BatteryStatus> {
        self.smoothed.map(|volts| self.status_for(volts))
    }

    fn status_for(&self, volts: f32) -> BatteryStatus {
        let per_cell = volts / self.cells as f32;
        let percent = lipo_percent(per_cell).round() as u8;

        BatteryStatus {
            volts,
            per_cell,
            percent,
            level: BatteryLevel::from_percent(percent),
        }
    }

    /// Forget the smoothing history (new connection, pack disconnected)
    pub fn reset(&mut self) {
        self.smoothed = None;
    }

    pub fn cells(&self) -> u8 {
        self.cells
    }
}

impl Default for BatteryGauge {
    fn default() -> Self {
        Self::new(3, 0.5)
    }
}
