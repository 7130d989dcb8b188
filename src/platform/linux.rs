//! Linux: SG_IO pass-through and block device ioctls

use std::fs::File;
use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use crate::error::{FileError, Result};
use crate::scsi::{decode_sense, ScsiData, ScsiTransport, SCSI_TIMEOUT_SECS};

pub const DEVICE_PATTERNS: &[&str] = &["/dev/sr", "/dev/scd", "/dev/disk/", "/dev/block/"];
pub const CHAR_DEVICES_ARE_DISKS: bool = false;

const SG_IO: u32 = 0x2285;
const SG_DXFER_NONE: libc::c_int = -1;
const SG_DXFER_TO_DEV: libc::c_int = -2;
const SG_DXFER_FROM_DEV: libc::c_int = -3;
const SG_FLAG_DIRECT_IO: libc::c_uint = 1;
const SG_FLAG_LUN_INHIBIT: libc::c_uint = 2;
const SG_INFO_OK_MASK: libc::c_uint = 0x1;
const SENSE_LEN: usize = 64;

// _IOR(0x12, 114, size_t)
const BLKGETSIZE64: u32 =
    (2 << 30) | ((std::mem::size_of::<libc::size_t>() as u32) << 16) | (0x12 << 8) | 114;
// _IO(0x12, 104)
const BLKSSZGET: u32 = 0x1268;

/// `struct sg_io_hdr` from <scsi/sg.h>
#[repr(C)]
#[allow(dead_code)]
struct SgIoHdr {
    interface_id: libc::c_int,
    dxfer_direction: libc::c_int,
    cmd_len: libc::c_uchar,
    mx_sb_len: libc::c_uchar,
    iovec_count: libc::c_ushort,
    dxfer_len: libc::c_uint,
    dxferp: *mut libc::c_void,
    cmdp: *mut libc::c_uchar,
    sbp: *mut libc::c_uchar,
    timeout: libc::c_uint,
    flags: libc::c_uint,
    pack_id: libc::c_int,
    usr_ptr: *mut libc::c_void,
    status: libc::c_uchar,
    masked_status: libc::c_uchar,
    msg_status: libc::c_uchar,
    sb_len_wr: libc::c_uchar,
    host_status: libc::c_ushort,
    driver_status: libc::c_ushort,
    resid: libc::c_int,
    duration: libc::c_uint,
    info: libc::c_uint,
}

/// SG_IO transport on a duplicate of the device descriptor
pub struct SgTransport {
    file: File,
}

impl ScsiTransport for SgTransport {
    fn send_cdb(&mut self, cdb: &[u8], data: ScsiData<'_>) -> Result<()> {
        if cdb.is_empty() || cdb.len() > 16 {
            return Err(FileError::InvalidArgument(format!("CDB length {}", cdb.len())));
        }
        let mut cmd = [0u8; 16];
        cmd[..cdb.len()].copy_from_slice(cdb);
        let mut sense = [0u8; SENSE_LEN];

        let (direction, ptr, len): (libc::c_int, *mut libc::c_void, usize) = match data {
            ScsiData::None => (SG_DXFER_NONE, std::ptr::null_mut(), 0),
            ScsiData::In(buf) => (SG_DXFER_FROM_DEV, buf.as_mut_ptr().cast(), buf.len()),
            ScsiData::Out(buf) => (SG_DXFER_TO_DEV, buf.as_ptr() as *mut libc::c_void, buf.len()),
        };

        let mut hdr = SgIoHdr {
            interface_id: b'S' as libc::c_int,
            dxfer_direction: direction,
            cmd_len: cdb.len() as libc::c_uchar,
            mx_sb_len: SENSE_LEN as libc::c_uchar,
            iovec_count: 0,
            dxfer_len: len as libc::c_uint,
            dxferp: ptr,
            cmdp: cmd.as_mut_ptr(),
            sbp: sense.as_mut_ptr(),
            timeout: SCSI_TIMEOUT_SECS * 1000,
            flags: SG_FLAG_LUN_INHIBIT | SG_FLAG_DIRECT_IO,
            pack_id: 0,
            usr_ptr: std::ptr::null_mut(),
            status: 0,
            masked_status: 0,
            msg_status: 0,
            sb_len_wr: 0,
            host_status: 0,
            driver_status: 0,
            resid: 0,
            duration: 0,
            info: 0,
        };

        // SAFETY: hdr and every buffer it points to outlive the call.
        let ret = unsafe { libc::ioctl(self.file.as_raw_fd(), SG_IO as _, &mut hdr as *mut SgIoHdr) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            log::debug!("SG_IO opcode {:#04x} failed: {}", cdb[0], err);
            return Err(FileError::Io(err));
        }

        if hdr.info & SG_INFO_OK_MASK == 0 {
            return Ok(());
        }

        let sense_len = usize::from(hdr.sb_len_wr).min(SENSE_LEN);
        if sense_len > 0 {
            let err = decode_sense(&sense[..sense_len]);
            log::debug!("SCSI opcode {:#04x} rejected: {}", cdb[0], err);
            return Err(err);
        }
        Err(FileError::io_other(format!(
            "SCSI opcode {:#04x} failed: status {:#04x}, host {:#06x}, driver {:#06x}",
            cdb[0], hdr.status, hdr.host_status, hdr.driver_status
        )))
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
    Ok(Box::new(SgTransport {
        file: file.try_clone()?,
    }))
}

pub fn query_device_size(file: &File) -> Result<(u64, u32)> {
    let fd = file.as_raw_fd();

    let mut size: u64 = 0;
    // SAFETY: BLKGETSIZE64 writes one u64.
    if unsafe { libc::ioctl(fd, BLKGETSIZE64 as _, &mut size as *mut u64) } < 0 {
        return Err(FileError::Io(io::Error::last_os_error()));
    }

    let mut sector_size: libc::c_int = 0;
    // SAFETY: BLKSSZGET writes one int.
    if unsafe { libc::ioctl(fd, BLKSSZGET as _, &mut sector_size as *mut libc::c_int) } < 0 {
        return Err(FileError::Io(io::Error::last_os_error()));
    }

    let sector_size = u32::try_from(sector_size)
        .map_err(|_| FileError::io_other(format!("negative sector size {}", sector_size)))?;
    Ok((size, sector_size))
}
