//! romfile
//!
//! One read/seek/size interface over plain files, gzip-compressed files and
//! raw optical drives (SCSI pass-through, ATA IDENTIFY, Kreon unlocking),
//! for ROM and disc image parsers.

pub mod byteswap;
pub mod config;
pub mod error;
pub mod file;
pub mod keys;
mod platform;
pub mod scsi;

#[cfg(test)]
mod testing;

pub use error::{FileError, Result};
pub use file::{FileMode, RomFile};
