//! SCSI command submission
//!
//! A [`ScsiTransport`] sends one CDB to a device and normalizes the result
//! into [`FileError`]. Each supported OS provides its own transport (see
//! `platform`); the helpers here build the standard commands on top of it.

pub mod ata;
pub mod kreon;
pub mod protocol;

use crate::byteswap::{be32, be64};
use crate::error::{FileError, Result};
use protocol::{
    inquiry_cdb, read_10_cdb, read_capacity_10_cdb, read_capacity_16_cdb, trim_field,
    INQUIRY_LEN, READ_CAPACITY_10_LEN, READ_CAPACITY_16_LEN,
};

/// Timeout applied to every SCSI command, in seconds
pub const SCSI_TIMEOUT_SECS: u32 = 20;

/// Data phase of a SCSI command
pub enum ScsiData<'a> {
    /// No data transfer
    None,
    /// Device to host
    In(&'a mut [u8]),
    /// Host to device
    Out(&'a [u8]),
}

impl ScsiData<'_> {
    /// Length of the data buffer in bytes
    pub fn len(&self) -> usize {
        match self {
            ScsiData::None => 0,
            ScsiData::In(buf) => buf.len(),
            ScsiData::Out(buf) => buf.len(),
        }
    }

    /// True if there is no data phase
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Raw command submission for one open device
pub trait ScsiTransport: Send {
    /// Send `cdb` with the given data phase.
    ///
    /// A device that rejects the command yields [`FileError::Scsi`]; OS
    /// failures yield `Io` or `Unsupported`.
    fn send_cdb(&mut self, cdb: &[u8], data: ScsiData<'_>) -> Result<()>;
}

/// Transport for targets without a pass-through interface
#[derive(Debug, Default)]
pub struct UnsupportedTransport;

impl ScsiTransport for UnsupportedTransport {
    fn send_cdb(&mut self, _cdb: &[u8], _data: ScsiData<'_>) -> Result<()> {
        Err(FileError::unsupported("SCSI pass-through is not implemented"))
    }
}

/// Decode a sense buffer returned with CHECK CONDITION.
///
/// Handles fixed (0x70/0x71) and descriptor (0x72/0x73) formats. Anything
/// else, including an empty buffer, is a plain I/O error.
pub fn decode_sense(sense: &[u8]) -> FileError {
    let Some(&first) = sense.first() else {
        return FileError::io_other("CHECK CONDITION without sense data");
    };

    let (sense_key, asc, ascq) = match first & 0x7F {
        0x70 | 0x71 if sense.len() >= 14 => (sense[2] & 0x0F, sense[12], sense[13]),
        0x72 | 0x73 if sense.len() >= 4 => (sense[1] & 0x0F, sense[2], sense[3]),
        code => {
            log::debug!("Unrecognized sense response code {:#04x}", code);
            return FileError::io_other(format!("unrecognized sense data {:#04x}", code));
        }
    };

    if sense_key == 0 && asc == 0 && ascq == 0 {
        return FileError::io_other("CHECK CONDITION with NO SENSE");
    }
    FileError::Scsi { sense_key, asc, ascq }
}

/// Parsed standard INQUIRY data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InquiryData {
    /// Peripheral device type (low 5 bits of byte 0)
    pub peripheral_type: u8,
    /// Raw 8-byte vendor identification
    pub vendor_raw: [u8; 8],
    /// Raw 16-byte product identification
    pub product_raw: [u8; 16],
    /// Raw 4-byte product revision
    pub revision_raw: [u8; 4],
}

impl InquiryData {
    /// Parse a standard INQUIRY response.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 36 {
            return Err(FileError::io_other(format!(
                "INQUIRY response too short: {} bytes",
                buf.len()
            )));
        }
        let mut vendor_raw = [0u8; 8];
        let mut product_raw = [0u8; 16];
        let mut revision_raw = [0u8; 4];
        vendor_raw.copy_from_slice(&buf[8..16]);
        product_raw.copy_from_slice(&buf[16..32]);
        revision_raw.copy_from_slice(&buf[32..36]);
        Ok(Self {
            peripheral_type: buf[0] & 0x1F,
            vendor_raw,
            product_raw,
            revision_raw,
        })
    }

    pub fn vendor(&self) -> String {
        trim_field(&self.vendor_raw)
    }

    pub fn product(&self) -> String {
        trim_field(&self.product_raw)
    }

    pub fn revision(&self) -> String {
        trim_field(&self.revision_raw)
    }

    /// True for CD/DVD class devices
    pub fn is_cdrom(&self) -> bool {
        self.peripheral_type == protocol::PERIPHERAL_TYPE_CDROM
    }
}

/// Issue a standard INQUIRY.
pub fn inquiry(transport: &mut dyn ScsiTransport) -> Result<InquiryData> {
    let mut buf = [0u8; INQUIRY_LEN];
    transport.send_cdb(&inquiry_cdb(), ScsiData::In(&mut buf))?;
    InquiryData::parse(&buf)
}

/// Device capacity as reported by READ CAPACITY
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capacity {
    /// Total size in bytes
    pub device_size: u64,
    /// Logical block length in bytes
    pub sector_size: u32,
}

/// Query the device capacity.
///
/// READ CAPACITY(10) is tried first; a saturated last LBA means the device
/// is too large for it, so READ CAPACITY(16) is issued instead.
pub fn read_capacity(transport: &mut dyn ScsiTransport) -> Result<Capacity> {
    let mut buf10 = [0u8; READ_CAPACITY_10_LEN];
    transport.send_cdb(&read_capacity_10_cdb(), ScsiData::In(&mut buf10))?;

    let last_lba = be32(&buf10, 0);
    let (last_lba, sector_size) = if last_lba == u32::MAX {
        log::debug!("READ CAPACITY(10) saturated, retrying with READ CAPACITY(16)");
        let mut buf16 = [0u8; READ_CAPACITY_16_LEN];
        transport.send_cdb(&read_capacity_16_cdb(), ScsiData::In(&mut buf16))?;
        (be64(&buf16, 0), be32(&buf16, 8))
    } else {
        (u64::from(last_lba), be32(&buf10, 4))
    };

    if sector_size == 0 {
        return Err(FileError::io_other("READ CAPACITY returned a zero block length"));
    }

    let device_size = last_lba
        .checked_add(1)
        .and_then(|blocks| blocks.checked_mul(u64::from(sector_size)))
        .ok_or_else(|| FileError::io_other("READ CAPACITY result overflows"))?;

    Ok(Capacity {
        device_size,
        sector_size,
    })
}

/// Read `count` blocks starting at `lba` with READ(10).
///
/// `buf` must hold at least `count * sector_size` bytes.
pub fn read_10(
    transport: &mut dyn ScsiTransport,
    lba: u32,
    count: u16,
    sector_size: u32,
    buf: &mut [u8],
) -> Result<()> {
    let len = usize::from(count) * sector_size as usize;
    if buf.len() < len {
        return Err(FileError::InvalidArgument(format!(
            "READ(10) buffer holds {} bytes, need {}",
            buf.len(),
            len
        )));
    }
    transport.send_cdb(&read_10_cdb(lba, count), ScsiData::In(&mut buf[..len]))
}
