//! # Telemetry Module
//!
//! Post-processing of decoded telemetry.
//!
//! This module handles:
//! - Battery smoothing and state-of-charge estimation
//! - Recording records as JSONL (JSON Lines) with file rotation
//! - Retaining only the last N telemetry files

pub mod battery;
pub mod recorder;

pub use battery::{BatteryGauge, BatteryLevel, BatteryStatus};
pub use recorder::TelemetryRecorder;
