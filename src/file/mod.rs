//! Unified file handle over plain files, gzip files and raw devices
//!
//! [`RomFile`] is what format parsers read from. It classifies its path
//! once, at open time, and then dispatches every call to the matching
//! backend. Failures are returned and also remembered in
//! [`RomFile::last_error`], so a parser that only looks at byte counts can
//! still find out why a read came up short.

pub mod device;
pub mod gzip;

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::config::{self, AppConfig};
use crate::error::{FileError, Result};
use crate::platform;
use crate::scsi::ata::AtaIdentify;
use crate::scsi::kreon::KreonLockState;
use crate::scsi::InquiryData;
use device::BlockDevice;
use gzip::{GzipStream, Probe};

/// How a file is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    /// Read-only ("rb")
    Read,
    /// Read-write, the file must exist ("rb+")
    ReadWrite,
    /// Create or truncate, read-write ("wb+")
    Create,
    /// Read-only with transparent gzip decompression
    ReadGz,
}

impl FileMode {
    pub fn is_writable(self) -> bool {
        matches!(self, FileMode::ReadWrite | FileMode::Create)
    }

    fn wants_gzip(self, config: &AppConfig) -> bool {
        match self {
            FileMode::ReadGz => true,
            FileMode::Read => config.gzip.transparent_by_default,
            FileMode::ReadWrite | FileMode::Create => false,
        }
    }
}

enum Backing {
    Closed,
    Plain(File),
    Gzip(GzipStream),
    Device(BlockDevice),
}

/// An open file, gzip file or raw device
pub struct RomFile {
    path: PathBuf,
    mode: FileMode,
    backing: Backing,
    is_device: bool,
    is_compressed: bool,
    is_writable: bool,
    last_error: i32,
}

/// Read until `buf` is full or the reader is exhausted.
fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> (usize, Option<FileError>) {
    let mut done = 0;
    while done < buf.len() {
        match reader.read(&mut buf[done..]) {
            Ok(0) => break,
            Ok(n) => done += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return (done, Some(e.into())),
        }
    }
    (done, None)
}

impl RomFile {
    fn closed(path: &Path, mode: FileMode) -> Self {
        Self {
            path: path.to_path_buf(),
            mode,
            backing: Backing::Closed,
            is_device: false,
            is_compressed: false,
            is_writable: false,
            last_error: 0,
        }
    }

    /// Open `path`, using the process-wide configuration.
    ///
    /// Never fails: check [`is_open`](Self::is_open) and
    /// [`last_error`](Self::last_error) afterwards.
    pub fn new(path: impl AsRef<Path>, mode: FileMode) -> Self {
        Self::with_config(path, mode, config::get_config())
    }

    /// Like [`new`](Self::new) with an explicit configuration.
    pub fn with_config(path: impl AsRef<Path>, mode: FileMode, config: &AppConfig) -> Self {
        let mut file = Self::closed(path.as_ref(), mode);
        if let Err(e) = file.open_backing(config) {
            log::debug!("Failed to open {}: {}", file.path.display(), e);
            file.last_error = e.code();
        }
        file
    }

    /// Open `path`, returning the error instead of an unopened handle.
    pub fn open(path: impl AsRef<Path>, mode: FileMode) -> Result<Self> {
        Self::open_with_config(path, mode, config::get_config())
    }

    /// Like [`open`](Self::open) with an explicit configuration.
    pub fn open_with_config(
        path: impl AsRef<Path>,
        mode: FileMode,
        config: &AppConfig,
    ) -> Result<Self> {
        let mut file = Self::closed(path.as_ref(), mode);
        file.open_backing(config)?;
        Ok(file)
    }

    /// Wrap an already opened block device.
    pub fn from_block_device(name: impl AsRef<Path>, device: BlockDevice) -> Self {
        Self {
            path: name.as_ref().to_path_buf(),
            mode: FileMode::Read,
            backing: Backing::Device(device),
            is_device: true,
            is_compressed: false,
            is_writable: false,
            last_error: 0,
        }
    }

    fn open_backing(&mut self, config: &AppConfig) -> Result<()> {
        if let Some(device_path) = platform::resolve_device_path(&self.path)? {
            return self.open_device(&device_path, config);
        }

        // Classify before opening so FIFOs never block in open()
        let metadata = match fs::metadata(&self.path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound && self.mode == FileMode::Create => {
                return self.open_regular(config);
            }
            Err(e) => return Err(FileError::classify(e)),
        };

        let file_type = metadata.file_type();
        if file_type.is_dir() {
            return Err(FileError::IsADirectory);
        }
        if file_type.is_file() {
            return self.open_regular(config);
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::FileTypeExt;
            let is_disk = file_type.is_block_device()
                || (file_type.is_char_device() && platform::CHAR_DEVICES_ARE_DISKS);
            if is_disk {
                if !platform::matches_device_pattern(&self.path, &config.devices.extra_patterns) {
                    return Err(FileError::unsupported(format!(
                        "{} is not an allowed device",
                        self.path.display()
                    )));
                }
                let path = self.path.clone();
                return self.open_device(&path, config);
            }
        }

        Err(FileError::unsupported("special files cannot be opened"))
    }

    fn open_regular(&mut self, config: &AppConfig) -> Result<()> {
        let file = match self.mode {
            FileMode::Read | FileMode::ReadGz => File::open(&self.path),
            FileMode::ReadWrite => OpenOptions::new().read(true).write(true).open(&self.path),
            FileMode::Create => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&self.path),
        }
        .map_err(FileError::classify)?;

        if !self.mode.wants_gzip(config) {
            log::debug!("{}: plain file", self.path.display());
            self.is_writable = self.mode.is_writable();
            self.backing = Backing::Plain(file);
            return Ok(());
        }

        match gzip::probe(file)? {
            Probe::Compressed(stream) => {
                log::debug!("{}: gzip compressed", self.path.display());
                self.is_compressed = true;
                self.backing = Backing::Gzip(stream);
            }
            Probe::Plain(file) => {
                log::debug!("{}: plain file", self.path.display());
                self.backing = Backing::Plain(file);
            }
        }
        Ok(())
    }

    fn open_device(&mut self, path: &Path, config: &AppConfig) -> Result<()> {
        if !config.devices.allow_raw_devices {
            return Err(FileError::unsupported("raw device access is disabled"));
        }
        if self.mode.is_writable() {
            return Err(FileError::unsupported("devices can only be opened read-only"));
        }

        let file = platform::open_device(path)?;
        let device = BlockDevice::open(file, path)?;
        log::debug!("{}: block device", self.path.display());
        self.is_device = true;
        self.backing = Backing::Device(device);
        Ok(())
    }

    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.last_error = e.code();
        }
        result
    }

    fn device_mut(&mut self) -> Result<&mut BlockDevice> {
        match &mut self.backing {
            Backing::Device(device) => Ok(device),
            Backing::Closed => Err(FileError::NotOpen),
            _ => Err(FileError::NoDevice),
        }
    }

    fn device(&self) -> Result<&BlockDevice> {
        match &self.backing {
            Backing::Device(device) => Ok(device),
            Backing::Closed => Err(FileError::NotOpen),
            _ => Err(FileError::NoDevice),
        }
    }

    /// Read up to `buf.len()` bytes.
    ///
    /// Fewer bytes come back at end of file or when a read fails part way;
    /// in the latter case the failure is in [`last_error`](Self::last_error).
    /// An error is only returned if nothing could be read.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let (n, err) = match &mut self.backing {
            Backing::Closed => (0, Some(FileError::NotOpen)),
            Backing::Plain(file) => read_full(file, buf),
            Backing::Gzip(stream) => read_full(stream, buf),
            Backing::Device(device) => device.read_blocks(buf),
        };
        match err {
            None => Ok(n),
            Some(e) => {
                self.last_error = e.code();
                if n == 0 {
                    Err(e)
                } else {
                    log::debug!("Short read on {} after {} bytes: {}", self.path.display(), n, e);
                    Ok(n)
                }
            }
        }
    }

    /// Write all of `buf`.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let result = match &mut self.backing {
            Backing::Closed => Err(FileError::NotOpen),
            Backing::Gzip(_) => Err(FileError::unsupported("write on a compressed file")),
            Backing::Device(_) => Err(FileError::unsupported("write on a device")),
            Backing::Plain(_) if !self.is_writable => Err(FileError::ReadOnly),
            Backing::Plain(file) => file.write_all(buf).map(|()| buf.len()).map_err(FileError::from),
        };
        self.track(result)
    }

    /// Seek to absolute offset `pos`.
    ///
    /// Device seeks are clamped to the device size.
    pub fn seek(&mut self, pos: u64) -> Result<u64> {
        let result = match &mut self.backing {
            Backing::Closed => Err(FileError::NotOpen),
            Backing::Plain(file) => file.seek(SeekFrom::Start(pos)).map_err(FileError::from),
            Backing::Gzip(stream) => stream.seek(pos).map_err(FileError::from),
            Backing::Device(device) => Ok(device.seek(pos)),
        };
        self.track(result)
    }

    /// Current offset.
    pub fn tell(&mut self) -> Result<u64> {
        let result = match &mut self.backing {
            Backing::Closed => Err(FileError::NotOpen),
            Backing::Plain(file) => file.stream_position().map_err(FileError::from),
            Backing::Gzip(stream) => Ok(stream.tell()),
            Backing::Device(device) => Ok(device.position()),
        };
        self.track(result)
    }

    /// Size in bytes; the uncompressed size for gzip files.
    pub fn size(&mut self) -> Result<u64> {
        let result = match &self.backing {
            Backing::Closed => Err(FileError::NotOpen),
            Backing::Plain(file) => file.metadata().map(|m| m.len()).map_err(FileError::from),
            Backing::Gzip(stream) => Ok(stream.size()),
            Backing::Device(device) => Ok(device.size()),
        };
        self.track(result)
    }

    pub fn truncate(&mut self, size: u64) -> Result<()> {
        let result = match &mut self.backing {
            Backing::Closed => Err(FileError::NotOpen),
            Backing::Plain(file) if self.is_writable => file.set_len(size).map_err(FileError::from),
            Backing::Plain(_) => Err(FileError::unsupported("truncate on a read-only file")),
            Backing::Gzip(_) => Err(FileError::unsupported("truncate on a compressed file")),
            Backing::Device(_) => Err(FileError::unsupported("truncate on a device")),
        };
        self.track(result)
    }

    pub fn flush(&mut self) -> Result<()> {
        let result = match &mut self.backing {
            Backing::Closed => Err(FileError::NotOpen),
            Backing::Plain(file) if self.is_writable => file.flush().map_err(FileError::from),
            Backing::Plain(_) => Err(FileError::unsupported("flush on a read-only file")),
            Backing::Gzip(_) => Err(FileError::unsupported("flush on a compressed file")),
            Backing::Device(_) => Err(FileError::unsupported("flush on a device")),
        };
        self.track(result)
    }

    /// Reopen a read-only plain file as read-write, keeping the position.
    pub fn make_writable(&mut self) -> Result<()> {
        let result = self.reopen_writable();
        self.track(result)
    }

    fn reopen_writable(&mut self) -> Result<()> {
        let file = match &mut self.backing {
            Backing::Closed => return Err(FileError::NotOpen),
            Backing::Gzip(_) => return Err(FileError::unsupported("compressed files are read-only")),
            Backing::Device(_) => return Err(FileError::unsupported("devices are read-only")),
            Backing::Plain(_) if self.is_writable => return Ok(()),
            Backing::Plain(file) => file,
        };

        let pos = file.stream_position()?;
        let mut writable = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(FileError::classify)?;
        writable.seek(SeekFrom::Start(pos))?;

        self.backing = Backing::Plain(writable);
        self.is_writable = true;
        Ok(())
    }

    /// Release the decompression stream, sector cache and OS handle.
    ///
    /// Path, mode and classification stay readable.
    pub fn close(&mut self) {
        self.backing = Backing::Closed;
    }

    pub fn is_open(&self) -> bool {
        !matches!(self.backing, Backing::Closed)
    }

    pub fn is_device(&self) -> bool {
        self.is_device
    }

    pub fn is_compressed(&self) -> bool {
        self.is_compressed
    }

    pub fn is_writable(&self) -> bool {
        self.is_writable
    }

    pub fn filename(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> FileMode {
        self.mode
    }

    /// Code of the most recent failure, 0 if nothing failed yet.
    ///
    /// POSIX errno values, or `(key << 16) | (asc << 8) | ascq` for SCSI
    /// errors.
    pub fn last_error(&self) -> i32 {
        self.last_error
    }

    /// Device size in bytes.
    pub fn device_size(&mut self) -> Result<u64> {
        let result = self.device().map(BlockDevice::size);
        self.track(result)
    }

    /// Device sector size in bytes.
    pub fn sector_size(&mut self) -> Result<u32> {
        let result = self.device().map(BlockDevice::sector_size);
        self.track(result)
    }

    /// Refresh the device geometry from the OS. Zeroes it on failure.
    pub fn reread_device_size_os(&mut self) -> Result<()> {
        let result = self.device_mut().and_then(BlockDevice::reread_size_os);
        self.track(result)
    }

    /// Refresh the device geometry with READ CAPACITY. Zeroes it on failure.
    pub fn reread_device_size_scsi(&mut self) -> Result<()> {
        let result = self.device_mut().and_then(BlockDevice::reread_size_scsi);
        self.track(result)
    }

    pub fn scsi_inquiry(&mut self) -> Result<InquiryData> {
        let result = self.device_mut().and_then(BlockDevice::scsi_inquiry);
        self.track(result)
    }

    pub fn ata_identify_device(&mut self) -> Result<AtaIdentify> {
        let result = self.device_mut().and_then(|d| d.ata_identify(false));
        self.track(result)
    }

    pub fn ata_identify_packet_device(&mut self) -> Result<AtaIdentify> {
        let result = self.device_mut().and_then(|d| d.ata_identify(true));
        self.track(result)
    }

    /// True if the device is a drive model known to run Kreon firmware.
    pub fn is_kreon_drive_model(&mut self) -> bool {
        self.device_mut()
            .map(BlockDevice::is_kreon_drive_model)
            .unwrap_or(false)
    }

    pub fn is_kreon_unlocked(&self) -> bool {
        self.device().map(BlockDevice::is_unlocked).unwrap_or(false)
    }

    /// Kreon feature codes, headers included. Empty if the drive answered
    /// with something that is not a feature list.
    pub fn kreon_feature_list(&mut self) -> Result<Vec<u16>> {
        let result = self.device_mut().and_then(BlockDevice::kreon_feature_list);
        self.track(result)
    }

    pub fn set_kreon_error_skip_state(&mut self, skip: bool) -> Result<()> {
        let result = self
            .device_mut()
            .and_then(|d| d.set_kreon_error_skip_state(skip));
        self.track(result)
    }

    /// Change the Kreon lock state.
    ///
    /// The drive is not re-locked on close; restore
    /// [`KreonLockState::Locked`] first if the drive needs it.
    pub fn set_kreon_lock_state(&mut self, state: KreonLockState) -> Result<()> {
        let result = self.device_mut().and_then(|d| d.set_kreon_lock_state(state));
        self.track(result)
    }
}

impl Read for RomFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        RomFile::read(self, buf).map_err(io::Error::from)
    }
}

impl Write for RomFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        RomFile::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        RomFile::flush(self).map_err(io::Error::from)
    }
}

impl Seek for RomFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::Current(delta) => self.tell()?.checked_add_signed(delta),
            SeekFrom::End(delta) => self.size()?.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek to a negative offset")
        })?;
        RomFile::seek(self, target).map_err(io::Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::errno;
    use crate::scsi::UnsupportedTransport;
    use crate::testing::{patterned, CountingDisk, MockDrive};
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::{tempdir, NamedTempFile};

    fn plain_file(content: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    fn gzip_file(content: &[u8]) -> NamedTempFile {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(content).unwrap();
        plain_file(&encoder.finish().unwrap())
    }

    fn open(path: &Path, mode: FileMode) -> RomFile {
        RomFile::with_config(path, mode, &AppConfig::default())
    }

    fn device_file(data: Vec<u8>, sector_size: u32) -> RomFile {
        let size = data.len() as u64;
        let dev = BlockDevice::new(
            Box::new(CountingDisk::new(data)),
            Box::new(UnsupportedTransport),
            size,
            sector_size,
        )
        .unwrap();
        RomFile::from_block_device("/dev/sr0", dev)
    }

    #[test]
    fn test_plain_read_seek_tell() {
        let file = plain_file(b"0123456789");
        let mut f = open(file.path(), FileMode::Read);
        assert!(f.is_open());
        assert!(!f.is_device());
        assert!(!f.is_compressed());
        assert!(!f.is_writable());
        assert_eq!(f.size().unwrap(), 10);

        f.seek(4).unwrap();
        let mut buf = [0u8; 3];
        assert_eq!(f.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"456");
        assert_eq!(f.tell().unwrap(), 7);

        let mut rest = [0u8; 10];
        assert_eq!(f.read(&mut rest).unwrap(), 3);
        assert_eq!(f.read(&mut rest).unwrap(), 0);
    }

    #[test]
    fn test_gzip_transparent_read() {
        let file = gzip_file(b"ABCDEFGH");
        let mut f = open(file.path(), FileMode::ReadGz);
        assert!(f.is_compressed());
        assert_eq!(f.size().unwrap(), 8);

        let mut buf = [0u8; 8];
        assert_eq!(f.read(&mut buf).unwrap(), 8);
        assert_eq!(&buf, b"ABCDEFGH");
        let mut one = [0u8; 1];
        assert_eq!(f.read(&mut one).unwrap(), 0);
        assert_eq!(f.size().unwrap(), 8);
    }

    #[test]
    fn test_gzip_size_is_stable() {
        let data = patterned(50_000);
        let file = gzip_file(&data);
        let mut f = open(file.path(), FileMode::ReadGz);
        let raw = fs::read(file.path()).unwrap();
        let trailer = u32::from_le_bytes(raw[raw.len() - 4..].try_into().unwrap()) as u64;
        assert_eq!(f.size().unwrap(), trailer);

        let mut buf = vec![0u8; 1000];
        for pos in [40_000u64, 5, 49_999, 0] {
            f.seek(pos).unwrap();
            let n = f.read(&mut buf).unwrap();
            assert_eq!(&buf[..n], &data[pos as usize..pos as usize + n]);
            assert_eq!(f.size().unwrap(), trailer);
        }
    }

    #[test]
    fn test_gzip_only_in_gz_mode() {
        let file = gzip_file(b"compressed content here");
        let f = open(file.path(), FileMode::Read);
        assert!(!f.is_compressed());

        let mut config = AppConfig::default();
        config.gzip.transparent_by_default = true;
        let f = RomFile::with_config(file.path(), FileMode::Read, &config);
        assert!(f.is_compressed());
    }

    #[test]
    fn test_write_on_gzip_is_unsupported() {
        let file = gzip_file(b"ABCDEFGH");
        let mut f = open(file.path(), FileMode::ReadGz);
        assert!(matches!(f.write(b"x"), Err(FileError::Unsupported(_))));
        assert_eq!(f.last_error(), errno::ENOTSUP);
        assert!(matches!(f.truncate(0), Err(FileError::Unsupported(_))));
        assert!(matches!(f.make_writable(), Err(FileError::Unsupported(_))));
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempdir().unwrap();
        let f = open(&dir.path().join("missing.bin"), FileMode::Read);
        assert!(!f.is_open());
        assert_eq!(f.last_error(), errno::ENOENT);

        let config = AppConfig::default();
        let err = RomFile::open_with_config(dir.path().join("missing.bin"), FileMode::Read, &config)
            .err()
            .unwrap();
        assert!(matches!(err, FileError::NotFound));
    }

    #[test]
    fn test_open_directory() {
        let dir = tempdir().unwrap();
        let f = open(dir.path(), FileMode::Read);
        assert!(!f.is_open());
        assert_eq!(f.last_error(), errno::EISDIR);
    }

    #[cfg(unix)]
    #[test]
    fn test_fifo_is_refused_without_blocking() {
        let dir = tempdir().unwrap();
        let fifo = dir.path().join("pipe");
        let c_path = std::ffi::CString::new(fifo.to_str().unwrap()).unwrap();
        assert_eq!(unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) }, 0);

        let f = open(&fifo, FileMode::Read);
        assert!(!f.is_open());
        assert_eq!(f.last_error(), errno::ENOTSUP);
    }

    #[test]
    fn test_create_write_truncate() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("new.bin");
        let mut f = open(&path, FileMode::Create);
        assert!(f.is_open());
        assert!(f.is_writable());
        assert_eq!(f.write(b"hello world").unwrap(), 11);
        f.flush().unwrap();
        assert_eq!(f.size().unwrap(), 11);

        f.truncate(5).unwrap();
        assert_eq!(f.size().unwrap(), 5);
        f.seek(0).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(f.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"hello");
    }

    #[test]
    fn test_read_only_refuses_writes() {
        let file = plain_file(b"data");
        let mut f = open(file.path(), FileMode::Read);
        assert!(matches!(f.write(b"x"), Err(FileError::ReadOnly)));
        assert_eq!(f.last_error(), errno::EBADF);
        assert!(matches!(f.truncate(0), Err(FileError::Unsupported(_))));
        assert!(matches!(f.flush(), Err(FileError::Unsupported(_))));
    }

    #[test]
    fn test_make_writable_keeps_position() {
        let file = plain_file(b"abcdefgh");
        let mut f = open(file.path(), FileMode::Read);
        f.seek(3).unwrap();
        f.make_writable().unwrap();
        assert!(f.is_writable());
        assert_eq!(f.tell().unwrap(), 3);
        f.write(b"XY").unwrap();
        drop(f);
        assert_eq!(fs::read(file.path()).unwrap(), b"abcXYfgh");
    }

    #[test]
    fn test_close_keeps_properties() {
        let file = gzip_file(b"ABCDEFGH");
        let mut f = open(file.path(), FileMode::ReadGz);
        f.close();
        assert!(!f.is_open());
        assert!(f.is_compressed());
        assert_eq!(f.filename(), file.path());
        assert_eq!(f.mode(), FileMode::ReadGz);
        let mut buf = [0u8; 4];
        assert!(matches!(f.read(&mut buf), Err(FileError::NotOpen)));
        assert_eq!(f.last_error(), errno::EBADF);
    }

    #[test]
    fn test_device_operations_on_plain_file() {
        let file = plain_file(b"data");
        let mut f = open(file.path(), FileMode::Read);
        assert!(matches!(f.device_size(), Err(FileError::NoDevice)));
        assert!(matches!(f.scsi_inquiry(), Err(FileError::NoDevice)));
        assert!(!f.is_kreon_drive_model());
        assert_eq!(f.last_error(), errno::ENODEV);
    }

    #[test]
    fn test_device_reads_through_facade() {
        let data = patterned(2048 * 4);
        let mut f = device_file(data.clone(), 2048);
        assert!(f.is_device());
        assert_eq!(f.size().unwrap(), 8192);
        assert_eq!(f.sector_size().unwrap(), 2048);

        // Head of sector 0, all of sector 1, head of sector 2
        f.seek(100).unwrap();
        let mut buf = vec![0u8; 4900];
        assert_eq!(f.read(&mut buf).unwrap(), 4900);
        assert_eq!(buf, &data[100..5000]);

        // [100, 3000) only touches sectors 0 and 1
        f.seek(100).unwrap();
        let mut buf = vec![0u8; 2900];
        assert_eq!(f.read(&mut buf).unwrap(), 2900);
        assert_eq!(buf, &data[100..3000]);
        assert_eq!(f.tell().unwrap(), 3000);

        // Clamped seek and short read at the end
        assert_eq!(f.seek(1 << 20).unwrap(), 8192);
        f.seek(8192 - 10).unwrap();
        let mut buf = vec![0u8; 100];
        assert_eq!(f.read(&mut buf).unwrap(), 10);
    }

    #[test]
    fn test_device_is_read_only() {
        let mut f = device_file(vec![0u8; 2048], 2048);
        assert!(matches!(f.write(b"x"), Err(FileError::Unsupported(_))));
        assert!(matches!(f.truncate(0), Err(FileError::Unsupported(_))));
        assert!(matches!(f.flush(), Err(FileError::Unsupported(_))));
        assert!(matches!(f.make_writable(), Err(FileError::Unsupported(_))));
    }

    #[test]
    fn test_failed_unlock_leaves_handle_locked() {
        let data = patterned(2048 * 2);
        let drive = MockDrive::new(data.clone(), 2048);
        let dev = BlockDevice::new(
            Box::new(CountingDisk::new(data.clone())),
            Box::new(drive),
            data.len() as u64,
            2048,
        )
        .unwrap();
        let mut f = RomFile::from_block_device("/dev/sr0", dev);

        let err = f.set_kreon_lock_state(KreonLockState::Xtreme).unwrap_err();
        assert!(err.is_scsi());
        assert!(f.last_error() > 0);
        assert!(!f.is_kreon_unlocked());

        let mut buf = [0u8; 32];
        assert_eq!(f.read(&mut buf).unwrap(), 32);
        assert_eq!(&buf[..], &data[..32]);
    }

    #[test]
    fn test_kreon_unlock_and_inquiry() {
        let data = patterned(2048 * 2);
        let mut drive = MockDrive::new(data.clone(), 2048);
        drive.set_identity(b"TSSTcorp", b"DVD-ROM TS-H943A", b"MS28");
        drive.kreon_features = Some(vec![0xA55A, 0x5AA5, 0x0100, 0x0101, 0xF000]);
        drive.reported_blocks = Some(4);
        let dev = BlockDevice::new(
            Box::new(CountingDisk::new(Vec::new())),
            Box::new(drive),
            2048,
            2048,
        )
        .unwrap();
        let mut f = RomFile::from_block_device("/dev/sr0", dev);

        assert!(f.is_kreon_drive_model());
        assert_eq!(f.scsi_inquiry().unwrap().product(), "DVD-ROM TS-H943A");
        assert_eq!(f.kreon_feature_list().unwrap().len(), 5);
        f.set_kreon_lock_state(KreonLockState::Wxripper).unwrap();
        assert!(f.is_kreon_unlocked());
        f.reread_device_size_scsi().unwrap();
        assert_eq!(f.device_size().unwrap(), 2048 * 4);

        // Reads now come from the drive, not the empty OS handle
        let mut buf = vec![0u8; 3000];
        assert_eq!(f.read(&mut buf).unwrap(), 3000);
        assert_eq!(buf, &data[..3000]);
    }

    #[test]
    fn test_std_io_traits() {
        let file = plain_file(b"0123456789");
        let mut f = open(file.path(), FileMode::Read);
        assert_eq!(Seek::seek(&mut f, SeekFrom::End(-3)).unwrap(), 7);
        let mut s = String::new();
        Read::read_to_string(&mut f, &mut s).unwrap();
        assert_eq!(s, "789");
        let err = Seek::seek(&mut f, SeekFrom::Current(-100)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
