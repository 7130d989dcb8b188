//! FreeBSD and DragonFly: CAM pass-through through libcam
//!
//! `cam_open_device` resolves the cd(4) peripheral to its pass(4) device
//! (CAMGETPASSTHRU). The session is opened on first use and kept until the
//! transport is dropped.

use std::ffi::CString;
use std::fs::File;
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use crate::error::{FileError, Result};
use crate::scsi::{decode_sense, ScsiData, ScsiTransport, SCSI_TIMEOUT_SECS};

pub const DEVICE_PATTERNS: &[&str] = &["/dev/cd", "/dev/rcd"];
pub const CHAR_DEVICES_ARE_DISKS: bool = true;

// _IOR('d', 129, off_t)
const DIOCGMEDIASIZE: libc::c_ulong = 0x4000_0000 | (8 << 16) | ((b'd' as libc::c_ulong) << 8) | 129;
// _IOR('d', 128, u_int)
const DIOCGSECTORSIZE: libc::c_ulong = 0x4000_0000 | (4 << 16) | ((b'd' as libc::c_ulong) << 8) | 128;

const XPT_SCSI_IO: u32 = 0x01;
const CAM_DIR_IN: u32 = 0x0000_0040;
const CAM_DIR_OUT: u32 = 0x0000_0080;
const CAM_DIR_NONE: u32 = 0x0000_00C0;
const CAM_DEV_QFRZDIS: u32 = 0x0000_0400;
const CAM_STATUS_MASK: u32 = 0x3F;
const CAM_REQ_CMP: u32 = 0x01;
const CAM_SCSI_STATUS_ERROR: u32 = 0x0C;
const CAM_AUTOSNS_VALID: u32 = 0x80;
const MSG_SIMPLE_Q_TAG: u8 = 0x20;
const SCSI_STATUS_CHECK_COND: u8 = 0x02;
const SSD_FULL_SIZE: usize = 252;

#[repr(C)]
struct CamDevice {
    _private: [u8; 0],
}

#[repr(C)]
struct CamqEntry {
    _links: [*mut libc::c_void; 2],
}

/// `struct ccb_hdr` (FreeBSD 13/14, LP64)
#[repr(C)]
#[allow(dead_code)]
struct CcbHdr {
    pinfo: [u32; 3],
    xpt_links: CamqEntry,
    sim_links: CamqEntry,
    periph_links: CamqEntry,
    retry_count: u16,
    alloc_flags: u16,
    cbfcnp: *mut libc::c_void,
    func_code: u32,
    status: u32,
    path: *mut libc::c_void,
    path_id: u32,
    target_id: u32,
    target_lun: u64,
    flags: u32,
    xflags: u32,
    periph_priv: [*mut libc::c_void; 2],
    sim_priv: [*mut libc::c_void; 2],
    qos: [u64; 2],
    timeout: u32,
    softtimeout: libc::timeval,
}

/// `struct ccb_scsiio`
#[repr(C)]
#[allow(dead_code)]
struct CcbScsiio {
    ccb_h: CcbHdr,
    next_ccb: *mut libc::c_void,
    req_map: *mut u8,
    data_ptr: *mut u8,
    dxfer_len: u32,
    sense_data: [u8; SSD_FULL_SIZE],
    sense_len: u8,
    cdb_len: u8,
    sglist_cnt: u16,
    scsi_status: u8,
    sense_resid: u8,
    resid: u32,
    cdb_io: [u8; 16],
    msg_ptr: *mut u8,
    msg_len: u16,
    tag_action: u8,
    priority: u8,
    tag_id: u32,
    init_id: u32,
}

#[link(name = "cam")]
extern "C" {
    fn cam_open_device(path: *const libc::c_char, flags: libc::c_int) -> *mut CamDevice;
    fn cam_close_device(dev: *mut CamDevice);
    fn cam_getccb(dev: *mut CamDevice) -> *mut CcbScsiio;
    fn cam_freeccb(ccb: *mut CcbScsiio);
    fn cam_send_ccb(dev: *mut CamDevice, ccb: *mut CcbScsiio) -> libc::c_int;
}

/// CAM transport with a lazily opened pass-through session
pub struct CamTransport {
    path: CString,
    device: *mut CamDevice,
}

// The session pointer is owned by this transport and only used through &mut self.
unsafe impl Send for CamTransport {}

impl CamTransport {
    fn session(&mut self) -> Result<*mut CamDevice> {
        if self.device.is_null() {
            // SAFETY: path is a valid C string.
            let device = unsafe { cam_open_device(self.path.as_ptr(), libc::O_RDWR) };
            if device.is_null() {
                let err = io::Error::last_os_error();
                log::debug!("cam_open_device({:?}) failed: {}", self.path, err);
                return Err(FileError::Io(err));
            }
            self.device = device;
        }
        Ok(self.device)
    }
}

impl ScsiTransport for CamTransport {
    fn send_cdb(&mut self, cdb: &[u8], data: ScsiData<'_>) -> Result<()> {
        if cdb.is_empty() || cdb.len() > 16 {
            return Err(FileError::InvalidArgument(format!("CDB length {}", cdb.len())));
        }
        let device = self.session()?;

        let (direction, ptr, len): (u32, *mut u8, usize) = match data {
            ScsiData::None => (CAM_DIR_NONE, std::ptr::null_mut(), 0),
            ScsiData::In(buf) => (CAM_DIR_IN, buf.as_mut_ptr(), buf.len()),
            ScsiData::Out(buf) => (CAM_DIR_OUT, buf.as_ptr() as *mut u8, buf.len()),
        };

        // SAFETY: device is an open session.
        let ccb = unsafe { cam_getccb(device) };
        if ccb.is_null() {
            return Err(FileError::io_other("cam_getccb failed"));
        }

        // SAFETY: cam_getccb returns a zeroed union ccb, which is larger than
        // ccb_scsiio; the data buffer outlives cam_send_ccb.
        let result = unsafe {
            let csio = &mut *ccb;
            csio.ccb_h.func_code = XPT_SCSI_IO;
            csio.ccb_h.flags = direction | CAM_DEV_QFRZDIS;
            csio.ccb_h.retry_count = 1;
            csio.ccb_h.timeout = SCSI_TIMEOUT_SECS * 1000;
            csio.data_ptr = ptr;
            csio.dxfer_len = len as u32;
            csio.sense_len = SSD_FULL_SIZE as u8;
            csio.cdb_len = cdb.len() as u8;
            csio.tag_action = MSG_SIMPLE_Q_TAG;
            csio.cdb_io[..cdb.len()].copy_from_slice(cdb);

            if cam_send_ccb(device, ccb) < 0 {
                Err(FileError::Io(io::Error::last_os_error()))
            } else {
                let status = csio.ccb_h.status;
                match status & CAM_STATUS_MASK {
                    CAM_REQ_CMP => Ok(()),
                    CAM_SCSI_STATUS_ERROR
                        if csio.scsi_status == SCSI_STATUS_CHECK_COND
                            && status & CAM_AUTOSNS_VALID != 0 =>
                    {
                        let valid = usize::from(csio.sense_len)
                            .saturating_sub(usize::from(csio.sense_resid))
                            .min(SSD_FULL_SIZE);
                        Err(decode_sense(&csio.sense_data[..valid]))
                    }
                    other => Err(FileError::io_other(format!(
                        "CAM status {:#04x}, SCSI status {:#04x}",
                        other, csio.scsi_status
                    ))),
                }
            }
        };

        // SAFETY: ccb came from cam_getccb.
        unsafe { cam_freeccb(ccb) };

        if let Err(e) = &result {
            log::debug!("SCSI opcode {:#04x} failed: {}", cdb[0], e);
        }
        result
    }
}

impl Drop for CamTransport {
    fn drop(&mut self) {
        if !self.device.is_null() {
            // SAFETY: device was returned by cam_open_device and not closed yet.
            unsafe { cam_close_device(self.device) };
            self.device = std::ptr::null_mut();
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

pub fn open_transport(_file: &File, path: &Path) -> Result<Box<dyn ScsiTransport>> {
    let path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| FileError::InvalidArgument("device path contains NUL".to_string()))?;
    Ok(Box::new(CamTransport {
        path,
        device: std::ptr::null_mut(),
    }))
}

pub fn query_device_size(file: &File) -> Result<(u64, u32)> {
    let fd = file.as_raw_fd();

    let mut size: libc::off_t = 0;
    // SAFETY: DIOCGMEDIASIZE writes one off_t.
    if unsafe { libc::ioctl(fd, DIOCGMEDIASIZE, &mut size as *mut libc::off_t) } < 0 {
        return Err(FileError::Io(io::Error::last_os_error()));
    }

    let mut sector_size: libc::c_uint = 0;
    // SAFETY: DIOCGSECTORSIZE writes one u_int.
    if unsafe { libc::ioctl(fd, DIOCGSECTORSIZE, &mut sector_size as *mut libc::c_uint) } < 0 {
        return Err(FileError::Io(io::Error::last_os_error()));
    }

    let size = u64::try_from(size)
        .map_err(|_| FileError::io_other(format!("negative media size {}", size)))?;
    Ok((size, sector_size))
}
