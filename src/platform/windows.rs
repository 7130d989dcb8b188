//! Windows: SCSI pass-through direct on `\\.\X:` volume handles

use std::ffi::{c_void, CString};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::windows::fs::OpenOptionsExt;
use std::os::windows::io::AsRawHandle;
use std::path::{Path, PathBuf};

use windows::core::PCSTR;
use windows::Win32::Foundation::HANDLE;
use windows::Win32::Storage::FileSystem::GetDriveTypeA;
use windows::Win32::System::IO::DeviceIoControl;

use crate::error::{FileError, Result};
use crate::scsi::{decode_sense, ScsiData, ScsiTransport, SCSI_TIMEOUT_SECS};

/// Only drive letters are accepted, see [`resolve_device_path`]
pub const DEVICE_PATTERNS: &[&str] = &[];
pub const CHAR_DEVICES_ARE_DISKS: bool = false;

const DRIVE_UNKNOWN: u32 = 0;
const DRIVE_NO_ROOT_DIR: u32 = 1;
const DRIVE_CDROM: u32 = 5;

const IOCTL_SCSI_PASS_THROUGH_DIRECT: u32 = 0x4D014;
const IOCTL_DISK_GET_DRIVE_GEOMETRY_EX: u32 = 0x700A0;

const SCSI_IOCTL_DATA_OUT: u8 = 0;
const SCSI_IOCTL_DATA_IN: u8 = 1;
const SCSI_IOCTL_DATA_UNSPECIFIED: u8 = 2;

const FILE_SHARE_READ_WRITE: u32 = 0x1 | 0x2;
const SENSE_LEN: usize = 32;

/// `SCSI_PASS_THROUGH_DIRECT` from ntddscsi.h
#[repr(C)]
#[allow(dead_code)]
struct ScsiPassThroughDirect {
    length: u16,
    scsi_status: u8,
    path_id: u8,
    target_id: u8,
    lun: u8,
    cdb_length: u8,
    sense_info_length: u8,
    data_in: u8,
    data_transfer_length: u32,
    timeout_value: u32,
    data_buffer: *mut c_void,
    sense_info_offset: u32,
    cdb: [u8; 16],
}

#[repr(C)]
struct SptdWithSense {
    sptd: ScsiPassThroughDirect,
    sense: [u8; SENSE_LEN],
}

/// `DISK_GEOMETRY_EX` without the trailing partition/detection data
#[repr(C)]
#[allow(dead_code)]
#[derive(Default)]
struct DiskGeometryEx {
    cylinders: i64,
    media_type: u32,
    tracks_per_cylinder: u32,
    sectors_per_track: u32,
    bytes_per_sector: u32,
    disk_size: i64,
    data: [u8; 8],
}

fn handle_of(file: &File) -> HANDLE {
    HANDLE(file.as_raw_handle() as _)
}

/// IOCTL_SCSI_PASS_THROUGH_DIRECT transport on a duplicate volume handle
pub struct SptdTransport {
    file: File,
}

impl ScsiTransport for SptdTransport {
    fn send_cdb(&mut self, cdb: &[u8], data: ScsiData<'_>) -> Result<()> {
        if cdb.is_empty() || cdb.len() > 16 {
            return Err(FileError::InvalidArgument(format!("CDB length {}", cdb.len())));
        }

        let (data_in, ptr, len): (u8, *mut c_void, usize) = match data {
            ScsiData::None => (SCSI_IOCTL_DATA_UNSPECIFIED, std::ptr::null_mut(), 0),
            ScsiData::In(buf) => (SCSI_IOCTL_DATA_IN, buf.as_mut_ptr().cast(), buf.len()),
            ScsiData::Out(buf) => (SCSI_IOCTL_DATA_OUT, buf.as_ptr() as *mut c_void, buf.len()),
        };

        let mut req = SptdWithSense {
            sptd: ScsiPassThroughDirect {
                length: std::mem::size_of::<ScsiPassThroughDirect>() as u16,
                scsi_status: 0,
                path_id: 0,
                target_id: 0,
                lun: 0,
                cdb_length: cdb.len() as u8,
                sense_info_length: SENSE_LEN as u8,
                data_in,
                data_transfer_length: len as u32,
                timeout_value: SCSI_TIMEOUT_SECS,
                data_buffer: ptr,
                sense_info_offset: std::mem::offset_of!(SptdWithSense, sense) as u32,
                cdb: [0; 16],
            },
            sense: [0; SENSE_LEN],
        };
        req.sptd.cdb[..cdb.len()].copy_from_slice(cdb);

        let size = std::mem::size_of::<SptdWithSense>() as u32;
        let req_ptr = &mut req as *mut SptdWithSense as *mut c_void;
        let mut returned = 0u32;
        // SAFETY: req and the data buffer outlive the call.
        let ok = unsafe {
            DeviceIoControl(
                handle_of(&self.file),
                IOCTL_SCSI_PASS_THROUGH_DIRECT,
                Some(req_ptr as *const c_void),
                size,
                Some(req_ptr),
                size,
                Some(&mut returned),
                None,
            )
        };
        if ok.is_err() {
            let err = io::Error::last_os_error();
            log::debug!("SCSI pass-through opcode {:#04x} failed: {}", cdb[0], err);
            return Err(FileError::Io(err));
        }

        if req.sptd.scsi_status == 0 {
            return Ok(());
        }
        let err = decode_sense(&req.sense[..usize::from(req.sptd.sense_info_length).min(SENSE_LEN)]);
        log::debug!("SCSI opcode {:#04x} rejected: {}", cdb[0], err);
        Err(err)
    }
}

/// Map `X:` or `X:\` to `\\.\X:` when the drive is a CD-ROM drive.
pub fn resolve_device_path(path: &Path) -> Result<Option<PathBuf>> {
    let text = path.to_string_lossy();
    let bytes = text.as_bytes();
    let is_drive_letter = matches!(bytes, [letter, b':'] | [letter, b':', b'\\'] if letter.is_ascii_alphabetic());
    if !is_drive_letter {
        return Ok(None);
    }

    let letter = bytes[0] as char;
    let root = CString::new(format!("{}:\\", letter))
        .map_err(|_| FileError::InvalidArgument(text.to_string()))?;
    // SAFETY: root is a valid NUL-terminated string.
    let drive_type = unsafe { GetDriveTypeA(PCSTR::from_raw(root.as_ptr() as *const u8)) };
    match drive_type {
        DRIVE_CDROM => Ok(Some(PathBuf::from(format!("\\\\.\\{}:", letter)))),
        DRIVE_UNKNOWN | DRIVE_NO_ROOT_DIR => Err(FileError::NoDevice),
        other => {
            log::debug!("Drive {}: has type {}, not a CD-ROM drive", letter, other);
            Err(FileError::unsupported("only CD-ROM drives can be opened directly"))
        }
    }
}

pub fn open_device(path: &Path) -> Result<File> {
    let rw = OpenOptions::new()
        .read(true)
        .write(true)
        .share_mode(FILE_SHARE_READ_WRITE)
        .open(path);
    match rw {
        Ok(file) => Ok(file),
        Err(e) => {
            log::debug!("Opening {} read-only: {}", path.display(), e);
            OpenOptions::new()
                .read(true)
                .share_mode(FILE_SHARE_READ_WRITE)
                .open(path)
                .map_err(FileError::classify)
        }
    }
}

pub fn open_transport(file: &File, _path: &Path) -> Result<Box<dyn ScsiTransport>> {
    Ok(Box::new(SptdTransport {
        file: file.try_clone()?,
    }))
}

pub fn query_device_size(file: &File) -> Result<(u64, u32)> {
    let mut geometry = DiskGeometryEx::default();
    let mut returned = 0u32;
    // SAFETY: geometry is large enough for DISK_GEOMETRY_EX with one data byte.
    let ok = unsafe {
        DeviceIoControl(
            handle_of(file),
            IOCTL_DISK_GET_DRIVE_GEOMETRY_EX,
            None,
            0,
            Some(&mut geometry as *mut DiskGeometryEx as *mut c_void),
            std::mem::size_of::<DiskGeometryEx>() as u32,
            Some(&mut returned),
            None,
        )
    };
    if ok.is_err() {
        return Err(FileError::Io(io::Error::last_os_error()));
    }

    let size = u64::try_from(geometry.disk_size)
        .map_err(|_| FileError::io_other(format!("negative disk size {}", geometry.disk_size)))?;
    Ok((size, geometry.bytes_per_sector))
}
