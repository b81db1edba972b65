//! # AFHDS3 Frame Checksum
//!
//! One's complement of the 8-bit wrapping sum over the unescaped frame body
//! (address, frame number, type, command, payload).

/// Calculate the frame checksum
///
/// # Arguments
///
/// * `body` - Unescaped frame body, without delimiters or checksum
///
/// # Returns
///
/// * `u8` - Checksum byte to append after the body
///
/// # Examples
///
/// ```
/// use afhds3_link::transport::checksum::checksum;
///
/// assert_eq!(checksum(&[0x41, 0x00, 0x01, 0x01]), 0xBC);
/// ```
pub fn checksum(body: &[u8]) -> u8 {
    !wrapping_sum(body)
}

/// 8-bit wrapping sum, for checksums computed over several slices
pub fn wrapping_sum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |sum, &byte| sum.wrapping_add(byte))
}

/// Verify a body whose last byte is the checksum
pub fn verify(body_with_checksum: &[u8]) -> bool {
    match body_with_checksum.split_last() {
        Some((&received, body)) => checksum(body) == received,
        None => false,
    }
}
