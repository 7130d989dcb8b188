//! SCSI command descriptor blocks and response layouts
//!
//! All multi-byte CDB fields are big-endian.

/// INQUIRY
pub const OP_INQUIRY: u8 = 0x12;
/// READ CAPACITY(10)
pub const OP_READ_CAPACITY_10: u8 = 0x25;
/// READ(10)
pub const OP_READ_10: u8 = 0x28;
/// ATA PASS-THROUGH(16)
pub const OP_ATA_PASS_THROUGH_16: u8 = 0x85;
/// SERVICE ACTION IN(16)
pub const OP_SERVICE_ACTION_IN_16: u8 = 0x9E;
/// READ CAPACITY(16) service action of SERVICE ACTION IN(16)
pub const SA_READ_CAPACITY_16: u8 = 0x10;

/// Standard INQUIRY response length requested from the device
pub const INQUIRY_LEN: usize = 96;
/// READ CAPACITY(10) response length
pub const READ_CAPACITY_10_LEN: usize = 8;
/// READ CAPACITY(16) response length
pub const READ_CAPACITY_16_LEN: usize = 32;

/// Peripheral device type for CD/DVD drives
pub const PERIPHERAL_TYPE_CDROM: u8 = 0x05;

/// Largest READ(10) transfer issued in one command
pub const MAX_SCSI_TRANSFER: usize = 65536;

/// INQUIRY with a 96-byte allocation length.
pub fn inquiry_cdb() -> [u8; 6] {
    let alloc = (INQUIRY_LEN as u16).to_be_bytes();
    [OP_INQUIRY, 0, 0, alloc[0], alloc[1], 0]
}

/// READ CAPACITY(10).
pub fn read_capacity_10_cdb() -> [u8; 10] {
    let mut cdb = [0u8; 10];
    cdb[0] = OP_READ_CAPACITY_10;
    cdb
}

/// READ CAPACITY(16) via SERVICE ACTION IN(16).
pub fn read_capacity_16_cdb() -> [u8; 16] {
    let mut cdb = [0u8; 16];
    cdb[0] = OP_SERVICE_ACTION_IN_16;
    cdb[1] = SA_READ_CAPACITY_16;
    cdb[10..14].copy_from_slice(&(READ_CAPACITY_16_LEN as u32).to_be_bytes());
    cdb
}

/// READ(10) of `count` blocks starting at `lba`.
pub fn read_10_cdb(lba: u32, count: u16) -> [u8; 10] {
    let mut cdb = [0u8; 10];
    cdb[0] = OP_READ_10;
    cdb[2..6].copy_from_slice(&lba.to_be_bytes());
    cdb[7..9].copy_from_slice(&count.to_be_bytes());
    cdb
}

/// Trim trailing spaces and NULs from a fixed-width ASCII field.
pub fn trim_field(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(|c: char| c == ' ' || c == '\0')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_10_cdb_layout() {
        let cdb = read_10_cdb(0x01020304, 0x0506);
        assert_eq!(cdb, [0x28, 0, 1, 2, 3, 4, 0, 5, 6, 0]);
    }

    #[test]
    fn test_capacity_16_allocation_length() {
        let cdb = read_capacity_16_cdb();
        assert_eq!(cdb[0], 0x9E);
        assert_eq!(cdb[1], 0x10);
        assert_eq!(&cdb[10..14], &[0, 0, 0, 32]);
        assert!(cdb[2..10].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_inquiry_cdb() {
        assert_eq!(inquiry_cdb(), [0x12, 0, 0, 0, 96, 0]);
    }

    #[test]
    fn test_trim_field() {
        assert_eq!(trim_field(b"PBDS    "), "PBDS");
        assert_eq!(trim_field(b"ABC\0\0"), "ABC");
    }
}
