//! Error type shared by every file backend
//!
//! Every failure carries a POSIX-style code (see [`FileError::code`]) so the
//! file handle can keep a `last_error` value that callers inspect after a
//! short read, in addition to the `Result` they get back.

use std::io;
use thiserror::Error;

/// POSIX error numbers used for `last_error` values.
///
/// These are the Linux numbers; they are only used as stable codes and
/// are never handed back to the OS.
pub mod errno {
    pub const EPERM: i32 = 1;
    pub const ENOENT: i32 = 2;
    pub const EIO: i32 = 5;
    pub const EBADF: i32 = 9;
    pub const EACCES: i32 = 13;
    pub const ENODEV: i32 = 19;
    pub const EISDIR: i32 = 21;
    pub const EINVAL: i32 = 22;
    pub const ENOSYS: i32 = 38;
    pub const ENOTSUP: i32 = 95;
}

/// Errors that can occur while accessing a file or device
#[derive(Error, Debug)]
pub enum FileError {
    #[error("File not found")]
    NotFound,

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Is a directory")]
    IsADirectory,

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    #[error("File is opened read-only")]
    ReadOnly,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Checksum mismatch: {0}")]
    Checksum(String),

    #[error("SCSI error: sense key {sense_key:#03x}, ASC {asc:#04x}, ASCQ {ascq:#04x}")]
    Scsi { sense_key: u8, asc: u8, ascq: u8 },

    #[error("Not a device")]
    NoDevice,

    #[error("File is not open")]
    NotOpen,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, FileError>;

impl FileError {
    /// Shorthand for [`FileError::Unsupported`].
    pub fn unsupported(what: impl Into<String>) -> Self {
        Self::Unsupported(what.into())
    }

    /// Generic I/O failure with a message and no OS error number.
    pub fn io_other(msg: impl Into<String>) -> Self {
        Self::Io(io::Error::new(io::ErrorKind::Other, msg.into()))
    }

    /// Map an OS error to the matching variant.
    ///
    /// `Io` is kept for everything that isn't one of the
    /// classification errors.
    pub fn classify(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound,
            io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            io::ErrorKind::Unsupported => Self::Unsupported(err.to_string()),
            _ => Self::Io(err),
        }
    }

    /// POSIX-style value stored as the handle's last error.
    ///
    /// SCSI errors use the packed sense encoding, which is always positive
    /// and at least 0x10000 for a non-zero sense key.
    pub fn code(&self) -> i32 {
        match self {
            Self::NotFound => errno::ENOENT,
            Self::PermissionDenied => errno::EACCES,
            Self::IsADirectory => errno::EISDIR,
            Self::Unsupported(_) => errno::ENOTSUP,
            Self::ReadOnly | Self::NotOpen => errno::EBADF,
            Self::Io(e) => os_code(e),
            Self::Checksum(_) => errno::EIO,
            Self::Scsi { sense_key, asc, ascq } => {
                ((*sense_key as i32 & 0x0F) << 16) | ((*asc as i32) << 8) | (*ascq as i32)
            }
            Self::NoDevice => errno::ENODEV,
            Self::InvalidArgument(_) => errno::EINVAL,
        }
    }

    /// Closest `std::io` error kind, used when bridging to `Read`/`Seek`.
    pub fn kind(&self) -> io::ErrorKind {
        match self {
            Self::NotFound => io::ErrorKind::NotFound,
            Self::PermissionDenied | Self::ReadOnly => io::ErrorKind::PermissionDenied,
            Self::Unsupported(_) | Self::NoDevice => io::ErrorKind::Unsupported,
            Self::Io(e) => e.kind(),
            Self::InvalidArgument(_) => io::ErrorKind::InvalidInput,
            Self::IsADirectory | Self::Checksum(_) | Self::Scsi { .. } | Self::NotOpen => {
                io::ErrorKind::Other
            }
        }
    }

    /// True if the device answered but rejected the command.
    pub fn is_scsi(&self) -> bool {
        matches!(self, Self::Scsi { .. })
    }
}

#[cfg(unix)]
fn os_code(e: &io::Error) -> i32 {
    e.raw_os_error().unwrap_or(errno::EIO)
}

#[cfg(not(unix))]
fn os_code(e: &io::Error) -> i32 {
    // Win32 error numbers are not POSIX codes.
    match e.kind() {
        io::ErrorKind::NotFound => errno::ENOENT,
        io::ErrorKind::PermissionDenied => errno::EACCES,
        io::ErrorKind::InvalidInput => errno::EINVAL,
        _ => errno::EIO,
    }
}

impl From<FileError> for io::Error {
    fn from(e: FileError) -> Self {
        match e {
            FileError::Io(inner) => inner,
            other => io::Error::new(other.kind(), other),
        }
    }
}
