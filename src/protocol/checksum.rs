//! # XOR-8 Checksum
//!
//! Every telemetry frame ends with a single byte equal to the XOR of all
//! bytes before it (tag included).

/// Calculate the XOR-8 checksum of a byte slice
///
/// # Arguments
///
/// * `data` - Frame bytes without the trailing checksum byte
///
/// # Returns
///
/// * `u8` - XOR of every byte in `data` (0x00 for an empty slice)
///
/// # Examples
///
/// ```
/// use quad_ground::protocol::checksum::xor8;
///
/// assert_eq!(xor8(&[0xA2, 0x00, 0x01]), 0xA3);
/// ```
pub fn xor8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &byte| acc ^ byte)
}

/// Check that the last byte of `frame` is the XOR of the bytes before it
///
/// Returns `false` for an empty frame.
pub fn verify(frame: &[u8]) -> bool {
    match frame.split_last() {
        Some((&received, body)) => xor8(body) == received,
        None => false,
    }
}
