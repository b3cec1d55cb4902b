//! Flash checksum used by the verify step.
//!
//! PIC16 program memory is 14 bits wide. The image stores each word as two
//! little-endian bytes, so only the low 6 bits of every odd byte are data.

/// Mask applied to the high byte of each program word.
pub const HIGH_BYTE_MASK: u8 = 0x3F;

/// Sum of all 14-bit program words in `data`, truncated to 16 bits.
///
/// A trailing odd byte is treated as a word whose high byte is zero.
pub fn checksum(data: &[u8]) -> u16 {
    data.chunks(2).fold(0u16, |sum, word| {
        let low = u16::from(word[0]);
        let high = u16::from(word.get(1).copied().unwrap_or(0) & HIGH_BYTE_MASK);
        sum.wrapping_add(low).wrapping_add(high << 8)
    })
}
