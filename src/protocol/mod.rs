//! # Vehicle Link Protocol Module
//!
//! Binary protocol spoken between the ground station and the quadrotor over TCP.
//!
//! This module handles:
//! - Frame synchronization on the inbound byte stream (Fast and Debug frames)
//! - Telemetry decoding with XOR-8 checksum verification and fixed-point scaling
//! - Encoding of the 4-byte motor power command

pub mod packets;
pub mod checksum;
pub mod decoder;
pub mod encoder;
pub mod frame_sync;
