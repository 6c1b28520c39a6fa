//! # Frame check sequence
//!
//! CRC-16-CCITT in its reflected form (polynomial `0x8408`, LSB first), the
//! same variant the radio peer computes. The frame check sequence stored on
//! the wire is the CRC of `data_len ‖ data` seeded with `0xFFFF`, with the
//! 16-bit result bit-reversed.

/// Register seed used for every frame check sequence.
pub const FCS_SEED: u16 = 0xFFFF;

/// Fold one octet into a running reflected CCITT CRC.
#[inline]
pub fn crc_ccitt_byte(crc: u16, byte: u8) -> u16 {
    let mut d = byte ^ (crc as u8);
    d ^= d << 4;
    let d = d as u16;
    ((d << 8) | (crc >> 8)) ^ (d >> 4) ^ (d << 3)
}

/// Run the reflected CCITT CRC over `data` starting from `crc`.
pub fn crc_ccitt(crc: u16, data: &[u8]) -> u16 {
    data.iter().fold(crc, |acc, &b| crc_ccitt_byte(acc, b))
}

/// Compute the wire FCS over the little-endian length word and the full
/// (padded) data region.
pub fn frame_check(data_len: u16, data: &[u8]) -> u16 {
    let crc = crc_ccitt(FCS_SEED, &data_len.to_le_bytes());
    crc_ccitt(crc, data).reverse_bits()
}
