//! OS-specific device access
//!
//! Exactly one backend is compiled in. Each one provides the device path
//! patterns it accepts, a SCSI pass-through transport, and an OS capacity
//! query.

use std::fs::File;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::scsi::ScsiTransport;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
use linux as os;

#[cfg(any(target_os = "freebsd", target_os = "dragonfly"))]
mod freebsd;
#[cfg(any(target_os = "freebsd", target_os = "dragonfly"))]
use freebsd as os;

#[cfg(any(target_os = "netbsd", target_os = "openbsd"))]
mod openbsd;
#[cfg(any(target_os = "netbsd", target_os = "openbsd"))]
use openbsd as os;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use self::windows as os;

#[cfg(not(any(
    target_os = "linux",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "netbsd",
    target_os = "openbsd",
    windows
)))]
mod dummy;
#[cfg(not(any(
    target_os = "linux",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "netbsd",
    target_os = "openbsd",
    windows
)))]
use dummy as os;

/// Character devices are raw disks on this OS (BSD), not ttys
pub const CHAR_DEVICES_ARE_DISKS: bool = os::CHAR_DEVICES_ARE_DISKS;

/// Built-in device path prefixes
pub fn device_patterns() -> &'static [&'static str] {
    os::DEVICE_PATTERNS
}

/// Case-insensitive prefix match against the built-in and extra patterns
pub fn matches_device_pattern(path: &Path, extra: &[String]) -> bool {
    let path = path.to_string_lossy().to_ascii_lowercase();
    device_patterns()
        .iter()
        .copied()
        .chain(extra.iter().map(String::as_str))
        .any(|pattern| path.starts_with(&pattern.to_ascii_lowercase()))
}

/// Map a user-facing name to an OS device path.
///
/// Returns `Ok(None)` when the path is not a device alias and should be
/// classified normally.
pub fn resolve_device_path(path: &Path) -> Result<Option<PathBuf>> {
    os::resolve_device_path(path)
}

/// Open a device for reading, read-write when the OS allows it.
pub fn open_device(path: &Path) -> Result<File> {
    os::open_device(path)
}

/// Create the SCSI transport for an open device.
pub fn open_transport(file: &File, path: &Path) -> Result<Box<dyn ScsiTransport>> {
    os::open_transport(file, path)
}

/// Ask the OS for `(device size, sector size)`.
pub fn query_device_size(file: &File) -> Result<(u64, u32)> {
    os::query_device_size(file)
}
