//! # Vehicle Link Module
//!
//! TCP link to the vehicle's access point.
//!
//! This module handles:
//! - Opening the TCP stream (behind the [`Connector`] trait for testing)
//! - The `HELLO` handshake and the reset report line that answers it
//! - The session event loop: motor command transmission, telemetry intake,
//!   arm switch tracking and the ESC reset sequence

pub mod banner;
pub mod session;
pub mod transport;

pub use banner::ResetReport;
pub use session::{ConnectionSession, SessionCommand, SessionEvent, SessionSettings};
pub use transport::{Connector, LinkStream, TcpConnector};
