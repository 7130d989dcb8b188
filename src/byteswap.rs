//! Byte order helpers
//!
//! SCSI fields are big-endian on the wire, ATA fields are little-endian,
//! and ATA strings are stored with the two bytes of every word swapped.

/// Read a big-endian u16 at `offset`.
pub fn be16(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

/// Read a big-endian u32 at `offset`.
pub fn be32(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

/// Read a big-endian u64 at `offset`.
pub fn be64(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_be_bytes(bytes)
}

/// Read a little-endian u16 at `offset`.
pub fn le16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

/// Swap the bytes of every 16-bit word in place.
///
/// A trailing odd byte is left untouched.
pub fn swap16_in_place(buf: &mut [u8]) {
    for pair in buf.chunks_exact_mut(2) {
        pair.swap(0, 1);
    }
}
