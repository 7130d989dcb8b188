//! Targets without raw device support

use std::fs::File;
use std::path::{Path, PathBuf};

use crate::error::{FileError, Result};
use crate::scsi::{ScsiTransport, UnsupportedTransport};

pub const DEVICE_PATTERNS: &[&str] = &[];
pub const CHAR_DEVICES_ARE_DISKS: bool = false;

pub fn resolve_device_path(_path: &Path) -> Result<Option<PathBuf>> {
    Ok(None)
}

pub fn open_device(_path: &Path) -> Result<File> {
    Err(FileError::unsupported("raw devices are not supported on this platform"))
}

pub fn open_transport(_file: &File, _path: &Path) -> Result<Box<dyn ScsiTransport>> {
    Ok(Box::new(UnsupportedTransport))
}

pub fn query_device_size(_file: &File) -> Result<(u64, u32)> {
    Err(FileError::unsupported("device size query"))
}
