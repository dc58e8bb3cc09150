//! # Quad Ground Library
//!
//! Ground-station side of a WiFi quadrotor link.
//!
//! The vehicle listens on a TCP port. The host streams 4-byte motor commands
//! to it and receives binary telemetry frames back. On top of that link this
//! library provides:
//!
//! - [`protocol`]: frame layouts, checksum, streaming decoder and motor encoder
//! - [`link`]: connection lifecycle, reset banner handshake and the session loop
//! - [`safety`]: power switch monitoring and the ESC reset sequence
//! - [`telemetry`]: battery estimation and JSONL recording
//! - [`console`]: line commands for the terminal front end

pub mod config;
pub mod console;
pub mod error;
pub mod link;
pub mod motors;
pub mod protocol;
pub mod safety;
pub mod telemetry;
