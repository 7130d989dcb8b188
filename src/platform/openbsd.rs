//! NetBSD and OpenBSD: SCIOCCOMMAND pass-through
//!
//! Neither exposes a portable media size ioctl for cd(4), so the capacity
//! query always defers to SCSI READ CAPACITY.

use std::fs::File;
use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use crate::error::{FileError, Result};
use crate::scsi::{decode_sense, ScsiData, ScsiTransport, SCSI_TIMEOUT_SECS};

pub const DEVICE_PATTERNS: &[&str] = &["/dev/cd", "/dev/rcd"];
pub const CHAR_DEVICES_ARE_DISKS: bool = true;

const SENSEBUFLEN: usize = 48;

const SCCMD_READ: libc::c_ulong = 0x0000_0001;
const SCCMD_WRITE: libc::c_ulong = 0x0000_0002;

const SCCMD_OK: u8 = 0x00;
const SCCMD_TIMEOUT: u8 = 0x01;
const SCCMD_BUSY: u8 = 0x02;
const SCCMD_SENSE: u8 = 0x03;

/// `scsireq_t` from <sys/scsiio.h>
#[repr(C)]
#[allow(dead_code)]
struct ScsiReq {
    flags: libc::c_ulong,
    timeout: libc::c_ulong,
    cmd: [u8; 16],
    cmdlen: u8,
    databuf: *mut libc::c_void,
    datalen: libc::c_ulong,
    datalen_used: libc::c_ulong,
    sense: [u8; SENSEBUFLEN],
    senselen: u8,
    senselen_used: u8,
    status: u8,
    retsts: u8,
    error: libc::c_int,
}

// _IOWR('Q', 1, scsireq_t)
const SCIOCCOMMAND: libc::c_ulong = 0xC000_0000
    | (((std::mem::size_of::<ScsiReq>() as libc::c_ulong) & 0x1FFF) << 16)
    | ((b'Q' as libc::c_ulong) << 8)
    | 1;

/// SCIOCCOMMAND transport on a duplicate of the device descriptor
pub struct ScioTransport {
    file: File,
}

impl ScsiTransport for ScioTransport {
    fn send_cdb(&mut self, cdb: &[u8], data: ScsiData<'_>) -> Result<()> {
        if cdb.is_empty() || cdb.len() > 16 {
            return Err(FileError::InvalidArgument(format!("CDB length {}", cdb.len())));
        }

        let (flags, ptr, len): (libc::c_ulong, *mut libc::c_void, usize) = match data {
            ScsiData::None => (0, std::ptr::null_mut(), 0),
            ScsiData::In(buf) => (SCCMD_READ, buf.as_mut_ptr().cast(), buf.len()),
            ScsiData::Out(buf) => (SCCMD_WRITE, buf.as_ptr() as *mut libc::c_void, buf.len()),
        };

        let mut req = ScsiReq {
            flags,
            timeout: libc::c_ulong::from(SCSI_TIMEOUT_SECS) * 1000,
            cmd: [0; 16],
            cmdlen: cdb.len() as u8,
            databuf: ptr,
            datalen: len as libc::c_ulong,
            datalen_used: 0,
            sense: [0; SENSEBUFLEN],
            senselen: SENSEBUFLEN as u8,
            senselen_used: 0,
            status: 0,
            retsts: 0,
            error: 0,
        };
        req.cmd[..cdb.len()].copy_from_slice(cdb);

        // SAFETY: req and the data buffer outlive the call.
        let ret = unsafe {
            libc::ioctl(self.file.as_raw_fd(), SCIOCCOMMAND as _, &mut req as *mut ScsiReq)
        };
        if ret < 0 {
            return Err(FileError::Io(io::Error::last_os_error()));
        }

        match req.retsts {
            SCCMD_OK => Ok(()),
            SCCMD_SENSE => {
                let used = usize::from(req.senselen_used).min(SENSEBUFLEN);
                let err = decode_sense(&req.sense[..used]);
                log::debug!("SCSI opcode {:#04x} rejected: {}", cdb[0], err);
                Err(err)
            }
            SCCMD_TIMEOUT => Err(FileError::Io(io::Error::from(io::ErrorKind::TimedOut))),
            SCCMD_BUSY => Err(FileError::io_other("device busy")),
            other => Err(FileError::io_other(format!(
                "SCIOCCOMMAND retsts {:#04x}, status {:#04x}",
                other, req.status
            ))),
        }
    }
}

pub fn resolve_device_path(_path: &Path) -> Result<Option<PathBuf>> {
    Ok(None)
}

pub fn open_device(path: &Path) -> Result<File> {
    // Pressed discs and DVD-ROM drives refuse write opens.
    File::open(path).map_err(FileError::classify)
}

pub fn open_transport(file: &File, _path: &Path) -> Result<Box<dyn ScsiTransport>> {
    Ok(Box::new(ScioTransport {
        file: file.try_clone()?,
    }))
}

pub fn query_device_size(_file: &File) -> Result<(u64, u32)> {
    Err(FileError::unsupported("no media size ioctl"))
}
