//! In-memory stand-ins for block devices and SCSI drives used by tests

use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{FileError, Result};
use crate::file::device::DeviceIo;
use crate::scsi::{ScsiData, ScsiTransport};

/// Byte pattern that differs in every sector and every offset
pub fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 7) ^ (i >> 9)) as u8).collect()
}

/// A `Read + Seek` disk image that counts its read calls
pub struct CountingDisk {
    inner: Cursor<Vec<u8>>,
    reads: Arc<AtomicUsize>,
}

impl CountingDisk {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            inner: Cursor::new(data),
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared read counter, still valid after the disk is moved
    pub fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.reads)
    }
}

impl Read for CountingDisk {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read(buf)
    }
}

impl Seek for CountingDisk {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

impl DeviceIo for CountingDisk {}

/// Scripted SCSI drive backed by a byte vector
pub struct MockDrive {
    pub data: Vec<u8>,
    pub sector_size: u32,
    /// Block count reported by READ CAPACITY instead of the data length
    pub reported_blocks: Option<u64>,
    pub peripheral_type: u8,
    pub vendor: [u8; 8],
    pub product: [u8; 16],
    pub revision: [u8; 4],
    /// IDENTIFY block; `None` rejects ATA pass-through
    pub identify: Option<[u8; 512]>,
    /// Kreon feature words; `None` rejects every vendor command
    pub kreon_features: Option<Vec<u16>>,
    /// Reject READ(10) with a medium error
    pub fail_reads: bool,
    log: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MockDrive {
    pub fn new(data: Vec<u8>, sector_size: u32) -> Self {
        Self {
            data,
            sector_size,
            reported_blocks: None,
            peripheral_type: 0x05,
            vendor: *b"GENERIC ",
            product: *b"DVD-ROM DRIVE   ",
            revision: *b"1.00",
            identify: None,
            kreon_features: None,
            fail_reads: false,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn set_identity(&mut self, vendor: &[u8; 8], product: &[u8; 16], revision: &[u8; 4]) {
        self.vendor = *vendor;
        self.product = *product;
        self.revision = *revision;
    }

    /// Shared CDB log, still valid after the drive is moved
    pub fn cdb_log(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
        Arc::clone(&self.log)
    }

    pub fn opcodes(&self) -> Vec<u8> {
        self.log.lock().unwrap().iter().map(|cdb| cdb[0]).collect()
    }

    pub fn last_cdb(&self) -> Option<Vec<u8>> {
        self.log.lock().unwrap().last().cloned()
    }

    fn blocks(&self) -> u64 {
        self.reported_blocks
            .unwrap_or(self.data.len() as u64 / u64::from(self.sector_size))
    }

    fn rejected(asc: u8) -> FileError {
        FileError::Scsi {
            sense_key: 0x05,
            asc,
            ascq: 0,
        }
    }

    fn handle(&mut self, cdb: &[u8], data: ScsiData<'_>) -> Result<()> {
        match (cdb[0], data) {
            (0x12, ScsiData::In(buf)) => {
                buf.fill(0);
                buf[0] = self.peripheral_type;
                buf[8..16].copy_from_slice(&self.vendor);
                buf[16..32].copy_from_slice(&self.product);
                buf[32..36].copy_from_slice(&self.revision);
                Ok(())
            }
            (0x25, ScsiData::In(buf)) => {
                let last = self.blocks().saturating_sub(1);
                let last = u32::try_from(last).unwrap_or(u32::MAX);
                buf[0..4].copy_from_slice(&last.to_be_bytes());
                buf[4..8].copy_from_slice(&self.sector_size.to_be_bytes());
                Ok(())
            }
            (0x9E, ScsiData::In(buf)) if cdb[1] == 0x10 => {
                buf.fill(0);
                let last = self.blocks().saturating_sub(1);
                buf[0..8].copy_from_slice(&last.to_be_bytes());
                buf[8..12].copy_from_slice(&self.sector_size.to_be_bytes());
                Ok(())
            }
            (0x28, ScsiData::In(buf)) => {
                if self.fail_reads {
                    return Err(FileError::Scsi {
                        sense_key: 0x03,
                        asc: 0x11,
                        ascq: 0,
                    });
                }
                let lba = u32::from_be_bytes([cdb[2], cdb[3], cdb[4], cdb[5]]) as usize;
                let count = u16::from_be_bytes([cdb[7], cdb[8]]) as usize;
                let ss = self.sector_size as usize;
                let start = lba * ss;
                let end = start + count * ss;
                if end > self.data.len() || buf.len() != count * ss {
                    return Err(Self::rejected(0x21));
                }
                buf.copy_from_slice(&self.data[start..end]);
                Ok(())
            }
            (0x85, ScsiData::In(buf)) => match &self.identify {
                Some(block) => {
                    buf.copy_from_slice(block);
                    Ok(())
                }
                None => Err(Self::rejected(0x20)),
            },
            (0xFF, data) => {
                let Some(features) = &self.kreon_features else {
                    return Err(Self::rejected(0x20));
                };
                match (cdb[3], data) {
                    (0x10, ScsiData::In(buf)) => {
                        buf.fill(0);
                        for (i, word) in features.iter().take(buf.len() / 2).enumerate() {
                            buf[i * 2..i * 2 + 2].copy_from_slice(&word.to_be_bytes());
                        }
                        Ok(())
                    }
                    (0x11 | 0x15, ScsiData::None) => Ok(()),
                    _ => Err(Self::rejected(0x24)),
                }
            }
            _ => Err(Self::rejected(0x20)),
        }
    }
}

impl ScsiTransport for MockDrive {
    fn send_cdb(&mut self, cdb: &[u8], data: ScsiData<'_>) -> Result<()> {
        self.log.lock().unwrap().push(cdb.to_vec());
        self.handle(cdb, data)
    }
}

/// Build a valid IDENTIFY block with the given strings
pub fn identify_block(serial: &str, firmware: &str, model: &str) -> [u8; 512] {
    let mut raw = [0u8; 512];
    raw[0..2].copy_from_slice(&0x85C0u16.to_le_bytes());
    put_ata_string(&mut raw[20..40], serial);
    put_ata_string(&mut raw[46..54], firmware);
    put_ata_string(&mut raw[54..94], model);
    put_ata_string(&mut raw[352..412], "");
    raw[510] = 0xA5;
    let sum = raw[..511].iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    raw[511] = sum.wrapping_neg();
    raw
}

fn put_ata_string(field: &mut [u8], text: &str) {
    field.fill(b' ');
    field[..text.len()].copy_from_slice(text.as_bytes());
    for pair in field.chunks_exact_mut(2) {
        pair.swap(0, 1);
    }
}
