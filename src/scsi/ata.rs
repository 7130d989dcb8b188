//! ATA IDENTIFY (PACKET) DEVICE through SCSI/ATA translation
//!
//! The 512-byte IDENTIFY block is little-endian words, except the string
//! fields which keep the ATA byte order (two characters per word, high
//! byte first) on every host.

use super::{protocol::OP_ATA_PASS_THROUGH_16, ScsiData, ScsiTransport};
use crate::byteswap::{le16, swap16_in_place};
use crate::error::{FileError, Result};

/// IDENTIFY DEVICE
pub const ATA_IDENTIFY_DEVICE: u8 = 0xEC;
/// IDENTIFY PACKET DEVICE
pub const ATA_IDENTIFY_PACKET_DEVICE: u8 = 0xA1;

/// Size of the IDENTIFY data block
pub const IDENTIFY_LEN: usize = 512;

const PROTOCOL_PIO_DATA_IN: u8 = 4;
// T_DIR = from device, BYT_BLOK = count in blocks, T_LENGTH = sector count field
const FLAGS_PIO_IN_BLOCKS: u8 = (1 << 3) | (1 << 2) | 2;

const SERIAL_NUMBER: std::ops::Range<usize> = 20..40;
const FIRMWARE_REVISION: std::ops::Range<usize> = 46..54;
const MODEL_NUMBER: std::ops::Range<usize> = 54..94;
const MEDIA_SERIAL_NUMBER: std::ops::Range<usize> = 352..412;

/// Parsed IDENTIFY data
#[derive(Debug, Clone)]
pub struct AtaIdentify {
    /// All 256 words in host order
    pub words: [u16; 256],
    pub serial_number: String,
    pub firmware_revision: String,
    pub model_number: String,
    pub media_serial_number: String,
}

impl AtaIdentify {
    /// General configuration word
    pub fn general_config(&self) -> u16 {
        self.words[0]
    }

    /// True for ATAPI (packet) devices
    pub fn is_atapi(&self) -> bool {
        self.words[0] & 0xC000 == 0x8000
    }
}

/// ATA PASS-THROUGH(16) CDB for IDENTIFY (PACKET) DEVICE.
pub fn identify_cdb(packet: bool) -> [u8; 16] {
    let mut cdb = [0u8; 16];
    cdb[0] = OP_ATA_PASS_THROUGH_16;
    cdb[1] = PROTOCOL_PIO_DATA_IN << 1;
    cdb[2] = FLAGS_PIO_IN_BLOCKS;
    cdb[6] = 1; // sector count
    cdb[14] = if packet {
        ATA_IDENTIFY_PACKET_DEVICE
    } else {
        ATA_IDENTIFY_DEVICE
    };
    cdb
}

/// Validate and parse a raw IDENTIFY block.
///
/// The block's bytes must sum to zero modulo 256 (word 255 holds the
/// checksum); otherwise nothing is returned.
pub fn parse_identify(raw: &[u8; IDENTIFY_LEN]) -> Result<AtaIdentify> {
    let sum = raw.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    if sum != 0 {
        return Err(FileError::Checksum(format!(
            "IDENTIFY data sums to {:#04x}",
            sum
        )));
    }

    let mut words = [0u16; 256];
    for (i, word) in words.iter_mut().enumerate() {
        *word = le16(raw, i * 2);
    }

    Ok(AtaIdentify {
        words,
        serial_number: ata_string(&raw[SERIAL_NUMBER]),
        firmware_revision: ata_string(&raw[FIRMWARE_REVISION]),
        model_number: ata_string(&raw[MODEL_NUMBER]),
        media_serial_number: ata_string(&raw[MEDIA_SERIAL_NUMBER]),
    })
}

fn ata_string(field: &[u8]) -> String {
    let mut bytes = field.to_vec();
    swap16_in_place(&mut bytes);
    String::from_utf8_lossy(&bytes)
        .trim_matches(|c: char| c == ' ' || c == '\0')
        .to_string()
}

/// Issue IDENTIFY DEVICE, or IDENTIFY PACKET DEVICE if `packet` is set.
pub fn identify(transport: &mut dyn ScsiTransport, packet: bool) -> Result<AtaIdentify> {
    let mut raw = [0u8; IDENTIFY_LEN];
    transport.send_cdb(&identify_cdb(packet), ScsiData::In(&mut raw))?;
    parse_identify(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{identify_block, MockDrive};

    #[test]
    fn test_identify_cdb() {
        let cdb = identify_cdb(false);
        assert_eq!(cdb[0], 0x85);
        assert_eq!(cdb[1], 0x08);
        assert_eq!(cdb[2], 0x0E);
        assert_eq!(cdb[6], 1);
        assert_eq!(cdb[14], 0xEC);
        assert_eq!(identify_cdb(true)[14], 0xA1);
    }

    #[test]
    fn test_parse_valid_block() {
        let raw = identify_block("S123456", "FW01", "TEST MODEL");
        let id = parse_identify(&raw).unwrap();
        assert_eq!(id.serial_number, "S123456");
        assert_eq!(id.firmware_revision, "FW01");
        assert_eq!(id.model_number, "TEST MODEL");
        assert_eq!(id.media_serial_number, "");
        assert_eq!(id.general_config(), 0x85C0);
        assert!(id.is_atapi());
    }

    #[test]
    fn test_bad_checksum_rejected() {
        let mut raw = identify_block("S1", "FW", "MODEL");
        raw[100] ^= 0x01;
        let err = parse_identify(&raw).unwrap_err();
        assert!(matches!(err, FileError::Checksum(_)));
        assert_eq!(err.code(), crate::error::errno::EIO);
    }

    #[test]
    fn test_identify_through_transport() {
        let mut drive = MockDrive::new(vec![0u8; 2048], 2048);
        drive.identify = Some(identify_block("XYZ", "1.00", "DRIVE"));
        let id = identify(&mut drive, true).unwrap();
        assert_eq!(id.model_number, "DRIVE");
        assert_eq!(drive.last_cdb().unwrap()[14], 0xA1);
    }
}
