//! Raw block device access
//!
//! Devices can only be read in whole sectors. [`BlockDevice`] keeps a
//! software position and one cached sector so callers can read any byte
//! range: a partial sector at the head or tail of a request goes through the
//! cache, whole sectors in between are read straight into the caller's
//! buffer.
//!
//! Until a Kreon drive is unlocked, sectors are read through the OS handle.
//! Afterwards every read is a SCSI READ(10), since the OS block layer does
//! not know about the extra sectors.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{FileError, Result};
use crate::platform;
use crate::scsi::{self, ata, kreon, Capacity, InquiryData, ScsiTransport};

/// `cached_lba` value when no sector is cached
pub const NO_CACHED_LBA: u32 = u32::MAX;

/// Smallest supported sector size
pub const MIN_SECTOR_SIZE: u32 = 512;
/// Largest supported sector size
pub const MAX_SECTOR_SIZE: u32 = 65536;

/// Sector size used until a capacity query succeeds
const FALLBACK_SECTOR_SIZE: u32 = 2048;

/// True for a power of two in [512, 65536]
pub fn is_valid_sector_size(sector_size: u32) -> bool {
    sector_size.is_power_of_two() && (MIN_SECTOR_SIZE..=MAX_SECTOR_SIZE).contains(&sector_size)
}

/// Seekable byte source underneath a block device
pub trait DeviceIo: Read + Seek + Send {
    /// Ask the OS for `(device size, sector size)`.
    fn query_size(&self) -> Result<(u64, u32)> {
        Err(FileError::unsupported("device size query"))
    }
}

impl DeviceIo for File {
    fn query_size(&self) -> Result<(u64, u32)> {
        platform::query_device_size(self)
    }
}

/// Position, geometry and sector cache of an open device
#[derive(Debug)]
pub struct DeviceInfo {
    /// Logical byte position; the OS handle may be elsewhere
    pub position: u64,
    pub size: u64,
    pub sector_size: u32,
    /// Kreon unlock state; reads use SCSI while set
    pub unlocked: bool,
    cache: Option<Box<[u8]>>,
    cached_lba: u32,
}

impl DeviceInfo {
    fn new(size: u64, sector_size: u32) -> Self {
        Self {
            position: 0,
            size,
            sector_size,
            unlocked: false,
            cache: None,
            cached_lba: NO_CACHED_LBA,
        }
    }

    /// LBA of the sector currently in the cache
    pub fn cached_lba(&self) -> Option<u32> {
        (self.cached_lba != NO_CACHED_LBA).then_some(self.cached_lba)
    }

    fn invalidate(&mut self) {
        self.cached_lba = NO_CACHED_LBA;
    }

    fn set_geometry(&mut self, size: u64, sector_size: u32) {
        if sector_size != self.sector_size {
            self.cache = None;
            self.invalidate();
        }
        self.size = size;
        self.sector_size = sector_size;
    }
}

/// An open raw device
pub struct BlockDevice {
    // Field order is drop order: sector cache, then the transport, then the OS handle.
    info: DeviceInfo,
    transport: Box<dyn ScsiTransport>,
    io: Box<dyn DeviceIo>,
}

impl BlockDevice {
    /// Wrap an already opened device.
    pub fn new(
        io: Box<dyn DeviceIo>,
        transport: Box<dyn ScsiTransport>,
        size: u64,
        sector_size: u32,
    ) -> Result<Self> {
        if !is_valid_sector_size(sector_size) {
            return Err(FileError::unsupported(format!(
                "sector size {} is not a power of two in [512, 65536]",
                sector_size
            )));
        }
        Ok(Self {
            info: DeviceInfo::new(size, sector_size),
            transport,
            io,
        })
    }

    /// Set up a device opened from `path`.
    ///
    /// The size comes from the OS if it can tell, else from READ CAPACITY.
    /// If both fail the device opens with size 0 and can be refreshed
    /// later with [`reread_size_scsi`](Self::reread_size_scsi).
    pub fn open(file: File, path: &Path) -> Result<Self> {
        let mut transport = platform::open_transport(&file, path)?;

        let (size, sector_size) = match file.query_size() {
            Ok(geometry) => geometry,
            Err(os_err) => {
                log::debug!("OS size query for {} failed: {}", path.display(), os_err);
                match scsi::read_capacity(transport.as_mut()) {
                    Ok(Capacity { device_size, sector_size }) => (device_size, sector_size),
                    Err(e) => {
                        log::warn!("Could not get the size of {}: {}", path.display(), e);
                        (0, FALLBACK_SECTOR_SIZE)
                    }
                }
            }
        };

        log::debug!(
            "Opened device {}: {} bytes, {}-byte sectors",
            path.display(),
            size,
            sector_size
        );
        Self::new(Box::new(file), transport, size, sector_size)
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn position(&self) -> u64 {
        self.info.position
    }

    pub fn size(&self) -> u64 {
        self.info.size
    }

    pub fn sector_size(&self) -> u32 {
        self.info.sector_size
    }

    pub fn is_unlocked(&self) -> bool {
        self.info.unlocked
    }

    /// Move the logical position, clamped to `[0, size]`.
    pub fn seek(&mut self, pos: u64) -> u64 {
        self.info.position = pos.min(self.info.size);
        self.info.position
    }

    fn lba_of(&self, pos: u64) -> Result<u32> {
        let lba = pos / u64::from(self.info.sector_size);
        u32::try_from(lba)
            .ok()
            .filter(|&lba| lba != NO_CACHED_LBA)
            .ok_or_else(|| FileError::InvalidArgument(format!("LBA {} out of range", lba)))
    }

    /// Load sector `lba` into the cache.
    ///
    /// A cache hit issues no device read. Without SCSI the OS handle is
    /// still moved past the sector, as if it had been read.
    pub fn read_one_sector(&mut self, lba: u32) -> Result<()> {
        let ss = self.info.sector_size;
        let sector_end = (u64::from(lba) + 1) * u64::from(ss);

        if lba == self.info.cached_lba {
            if !self.info.unlocked {
                self.io.seek(SeekFrom::Start(sector_end))?;
            }
            return Ok(());
        }

        self.info.invalidate();
        let cache = self
            .info
            .cache
            .get_or_insert_with(|| vec![0u8; ss as usize].into_boxed_slice());

        if self.info.unlocked {
            scsi::read_10(self.transport.as_mut(), lba, 1, ss, cache)?;
        } else {
            self.io.seek(SeekFrom::Start(u64::from(lba) * u64::from(ss)))?;
            self.io.read_exact(cache)?;
        }

        log::trace!("Cached sector {}", lba);
        self.info.cached_lba = lba;
        Ok(())
    }

    /// Read whole sectors starting at `lba` straight into `buf`.
    ///
    /// `buf.len()` is a multiple of the sector size. On failure the bytes
    /// already read are returned with the error.
    fn read_direct(&mut self, lba: u32, buf: &mut [u8]) -> (usize, Option<FileError>) {
        let ss = self.info.sector_size as usize;

        if self.info.unlocked {
            let sectors = buf.len() / ss;
            let fits = u32::try_from(sectors.saturating_sub(1))
                .ok()
                .and_then(|extra| lba.checked_add(extra))
                .is_some();
            if !fits {
                let msg = format!("{} sectors from LBA {} exceed READ(10) addressing", sectors, lba);
                return (0, Some(FileError::InvalidArgument(msg)));
            }

            let max_sectors = (scsi::protocol::MAX_SCSI_TRANSFER / ss).max(1);
            let mut done = 0;
            for (i, chunk) in buf.chunks_mut(max_sectors * ss).enumerate() {
                let chunk_lba = lba + (i * max_sectors) as u32;
                let count = (chunk.len() / ss) as u16;
                if let Err(e) =
                    scsi::read_10(self.transport.as_mut(), chunk_lba, count, ss as u32, chunk)
                {
                    return (done, Some(e));
                }
                done += chunk.len();
            }
            return (done, None);
        }

        if let Err(e) = self.io.seek(SeekFrom::Start(u64::from(lba) * ss as u64)) {
            return (0, Some(e.into()));
        }
        let mut done = 0;
        while done < buf.len() {
            match self.io.read(&mut buf[done..]) {
                Ok(0) => {
                    let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "short device read");
                    return (done, Some(eof.into()));
                }
                Ok(n) => done += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return (done, Some(e.into())),
            }
        }
        (done, None)
    }

    /// Read up to `buf.len()` bytes at the current position.
    ///
    /// Stops at the end of the device. On failure returns the bytes copied
    /// so far together with the error; the position covers exactly the
    /// bytes returned.
    pub fn read_blocks(&mut self, buf: &mut [u8]) -> (usize, Option<FileError>) {
        if self.info.sector_size == 0 {
            return (0, Some(FileError::io_other("device geometry is unknown")));
        }
        if buf.is_empty() {
            return (0, None);
        }
        let ss = self.info.sector_size as usize;
        let pos = self.info.position;
        if pos >= self.info.size {
            return (0, None);
        }

        let len = (buf.len() as u64).min(self.info.size - pos) as usize;
        let buf = &mut buf[..len];
        let mut done = 0;

        // Unaligned head
        let offset = (pos % ss as u64) as usize;
        if offset != 0 {
            if let Err(e) = self.lba_of(pos).and_then(|lba| self.read_one_sector(lba)) {
                return (0, Some(e));
            }
            let n = (ss - offset).min(len);
            if let Some(cache) = &self.info.cache {
                buf[..n].copy_from_slice(&cache[offset..offset + n]);
            }
            done += n;
            self.info.position += n as u64;
        }

        // Whole sectors
        let whole = (len - done) / ss * ss;
        if whole > 0 {
            let lba = match self.lba_of(self.info.position) {
                Ok(lba) => lba,
                Err(e) => return (done, Some(e)),
            };
            let (n, err) = self.read_direct(lba, &mut buf[done..done + whole]);
            done += n;
            self.info.position += n as u64;
            if err.is_some() {
                return (done, err);
            }
        }

        // Partial tail
        let rest = len - done;
        if rest > 0 {
            if let Err(e) = self
                .lba_of(self.info.position)
                .and_then(|lba| self.read_one_sector(lba))
            {
                return (done, Some(e));
            }
            if let Some(cache) = &self.info.cache {
                buf[done..].copy_from_slice(&cache[..rest]);
            }
            done += rest;
            self.info.position += rest as u64;
        }

        (done, None)
    }

    fn update_geometry(&mut self, result: Result<(u64, u32)>) -> Result<()> {
        match result {
            Ok((size, sector_size)) if is_valid_sector_size(sector_size) => {
                self.info.set_geometry(size, sector_size);
                Ok(())
            }
            Ok((_, sector_size)) => {
                self.info.set_geometry(0, 0);
                Err(FileError::unsupported(format!("sector size {}", sector_size)))
            }
            Err(e) => {
                self.info.set_geometry(0, 0);
                Err(e)
            }
        }
    }

    /// Refresh size and sector size from the OS. Zeroes both on failure.
    pub fn reread_size_os(&mut self) -> Result<()> {
        let result = self.io.query_size();
        self.update_geometry(result)
    }

    /// Refresh size and sector size with READ CAPACITY. Zeroes both on failure.
    pub fn reread_size_scsi(&mut self) -> Result<()> {
        let result = scsi::read_capacity(self.transport.as_mut())
            .map(|cap| (cap.device_size, cap.sector_size));
        self.update_geometry(result)
    }

    pub fn scsi_inquiry(&mut self) -> Result<InquiryData> {
        scsi::inquiry(self.transport.as_mut())
    }

    pub fn ata_identify(&mut self, packet: bool) -> Result<ata::AtaIdentify> {
        ata::identify(self.transport.as_mut(), packet)
    }

    pub fn is_kreon_drive_model(&mut self) -> bool {
        kreon::is_kreon_drive_model(self.transport.as_mut())
    }

    pub fn kreon_feature_list(&mut self) -> Result<Vec<u16>> {
        kreon::feature_list(self.transport.as_mut())
    }

    pub fn set_kreon_error_skip_state(&mut self, skip: bool) -> Result<()> {
        kreon::set_error_skip_state(self.transport.as_mut(), skip)
    }

    /// Change the Kreon lock state. Reads switch to SCSI while unlocked.
    pub fn set_kreon_lock_state(&mut self, state: kreon::KreonLockState) -> Result<()> {
        kreon::set_lock_state(self.transport.as_mut(), state)?;
        self.info.unlocked = state.is_unlocked();
        self.info.invalidate();
        log::debug!("Kreon lock state set to {:?}", state);
        Ok(())
    }
}
