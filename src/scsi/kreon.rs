//! Kreon drive firmware commands
//!
//! Kreon is custom firmware for a handful of Xbox and Xbox 360 DVD drives.
//! Unlocking it exposes the whole disc, after which reads must go through
//! SCSI READ(10) instead of the OS block layer.

use super::{inquiry, ScsiData, ScsiTransport};
use crate::byteswap::be16;
use crate::error::Result;

/// Feature list header word 0
pub const FEATURE_HEADER0: u16 = 0xA55A;
/// Feature list header word 1
pub const FEATURE_HEADER1: u16 = 0x5AA5;

/// Feature list response size (13 entries)
pub const FEATURE_LIST_LEN: usize = 26;

const CDB_GET_FEATURE_LIST: [u8; 6] = [0xFF, 0x08, 0x01, 0x10, 0x00, 0x00];
const CMD_SET_LOCK_STATE: u8 = 0x11;
const CMD_SET_ERROR_SKIP: u8 = 0x15;

/// Drive models known to run Kreon firmware, by INQUIRY vendor id
const KREON_DRIVES: &[(&[u8; 8], &[&[u8; 16]])] = &[
    (
        b"TSSTcorp",
        &[
            b"DVD-ROM SH-D162C",
            b"DVD-ROM TS-H353A",
            b"DVD-ROM SH-D163B",
            b"DVD-ROM TS-H943A",
        ],
    ),
    (b"PBDS    ", &[b"VAD6038         ", b"VAD6038-64930C  "]),
    (b"HL-DT-ST", &[b"DVD-ROM GDR3120L"]),
];

/// Kreon lock state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KreonLockState {
    /// Normal drive behavior
    Locked = 0,
    /// Unlock state 1 ("xtreme")
    Xtreme = 1,
    /// Unlock state 2 ("wxripper")
    Wxripper = 2,
}

impl KreonLockState {
    pub fn is_unlocked(self) -> bool {
        self != KreonLockState::Locked
    }
}

/// Kreon feature codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KreonFeature {
    Header0,
    Header1,
    Xbox360Unlock1,
    Xbox360Unlock2,
    Xbox360Unlock1a,
    Xbox360FullChallenge,
    XboxUnlock1,
    XboxUnlock2,
    XboxUnlock1a,
    XboxFullChallenge,
    LockCommand,
    ErrorSkipping,
    Unknown(u16),
}

impl KreonFeature {
    pub fn from_code(code: u16) -> Self {
        match code {
            FEATURE_HEADER0 => Self::Header0,
            FEATURE_HEADER1 => Self::Header1,
            0x0100 => Self::Xbox360Unlock1,
            0x0101 => Self::Xbox360Unlock2,
            0x0120 => Self::Xbox360Unlock1a,
            0x0121 => Self::Xbox360FullChallenge,
            0x0200 => Self::XboxUnlock1,
            0x0201 => Self::XboxUnlock2,
            0x0220 => Self::XboxUnlock1a,
            0x0221 => Self::XboxFullChallenge,
            0xF000 => Self::LockCommand,
            0xF001 => Self::ErrorSkipping,
            other => Self::Unknown(other),
        }
    }

    /// Human-readable feature name
    pub fn name(&self) -> String {
        match self {
            Self::Header0 | Self::Header1 => "Header".to_string(),
            Self::Xbox360Unlock1 => "Xbox 360: Unlock 1 (xtreme)".to_string(),
            Self::Xbox360Unlock2 => "Xbox 360: Unlock 2 (wxripper)".to_string(),
            Self::Xbox360Unlock1a => "Xbox 360: Unlock 1a".to_string(),
            Self::Xbox360FullChallenge => "Xbox 360: Full Challenge".to_string(),
            Self::XboxUnlock1 => "Xbox: Unlock 1 (xtreme)".to_string(),
            Self::XboxUnlock2 => "Xbox: Unlock 2 (wxripper)".to_string(),
            Self::XboxUnlock1a => "Xbox: Unlock 1a".to_string(),
            Self::XboxFullChallenge => "Xbox: Full Challenge".to_string(),
            Self::LockCommand => "Lock Command".to_string(),
            Self::ErrorSkipping => "Error Skipping".to_string(),
            Self::Unknown(code) => format!("Unknown ({:#06x})", code),
        }
    }
}

/// Check INQUIRY data against the known Kreon drive models.
///
/// Any SCSI failure counts as "not a Kreon drive".
pub fn is_kreon_drive_model(transport: &mut dyn ScsiTransport) -> bool {
    let inq = match inquiry(transport) {
        Ok(inq) => inq,
        Err(e) => {
            log::debug!("INQUIRY failed while probing for Kreon: {}", e);
            return false;
        }
    };
    if !inq.is_cdrom() {
        return false;
    }

    KREON_DRIVES
        .iter()
        .find(|(vendor, _)| **vendor == inq.vendor_raw)
        .map(|(_, models)| models.iter().any(|model| **model == inq.product_raw))
        .unwrap_or(false)
}

/// Parse a raw feature list response.
///
/// Entries are big-endian words up to the first zero. The list is only
/// returned (headers included) when it starts with the two header words.
pub fn parse_feature_list(buf: &[u8]) -> Vec<u16> {
    let features: Vec<u16> = (0..buf.len() / 2)
        .map(|i| be16(buf, i * 2))
        .take_while(|&code| code != 0)
        .collect();

    if features.len() < 2 || features[0] != FEATURE_HEADER0 || features[1] != FEATURE_HEADER1 {
        return Vec::new();
    }
    features
}

/// Get the drive's Kreon feature list.
///
/// Fails if the command is rejected; an empty list means the response
/// was not a Kreon feature list.
pub fn feature_list(transport: &mut dyn ScsiTransport) -> Result<Vec<u16>> {
    let mut buf = [0u8; FEATURE_LIST_LEN];
    transport.send_cdb(&CDB_GET_FEATURE_LIST, ScsiData::In(&mut buf))?;
    Ok(parse_feature_list(&buf))
}

/// Enable or disable error skipping.
pub fn set_error_skip_state(transport: &mut dyn ScsiTransport, skip: bool) -> Result<()> {
    let cdb = [0xFF, 0x08, 0x01, CMD_SET_ERROR_SKIP, u8::from(skip), 0x00];
    transport.send_cdb(&cdb, ScsiData::None)
}

/// Change the lock state.
pub fn set_lock_state(transport: &mut dyn ScsiTransport, state: KreonLockState) -> Result<()> {
    let cdb = [0xFF, 0x08, 0x01, CMD_SET_LOCK_STATE, state as u8, 0x00];
    transport.send_cdb(&cdb, ScsiData::None)
}
