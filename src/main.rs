//! romfile
//!
//! Command-line probe for files, gzip images and optical drives.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;

use romfile::scsi::kreon::{KreonFeature, KreonLockState};
use romfile::{FileMode, Result, RomFile};

#[derive(Parser)]
#[command(name = "romfile", version, about = "Inspect ROM images and optical drives")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show how a path is classified and its size
    Info {
        path: PathBuf,
        /// Decompress gzip files transparently
        #[arg(long)]
        gz: bool,
    },
    /// Hex dump a byte range
    Dump {
        path: PathBuf,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        #[arg(long, default_value_t = 256)]
        length: usize,
        #[arg(long)]
        gz: bool,
    },
    /// SCSI INQUIRY
    Inquiry { device: PathBuf },
    /// ATA IDENTIFY (PACKET) DEVICE
    Identify {
        device: PathBuf,
        #[arg(long)]
        packet: bool,
    },
    /// Kreon drive model, features and lock state
    Kreon {
        device: PathBuf,
        /// Unlock with state 1 (xtreme) or 2 (wxripper)
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=2), conflicts_with = "lock")]
        unlock: Option<u8>,
        #[arg(long)]
        lock: bool,
        #[arg(long, value_enum)]
        skip_errors: Option<Toggle>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

fn read_mode(gz: bool) -> FileMode {
    if gz {
        FileMode::ReadGz
    } else {
        FileMode::Read
    }
}

fn info(path: PathBuf, gz: bool) -> Result<()> {
    let mut file = RomFile::open(&path, read_mode(gz))?;
    let kind = if file.is_device() {
        "block device"
    } else if file.is_compressed() {
        "gzip compressed"
    } else {
        "plain file"
    };
    println!("{}: {}", file.filename().display(), kind);
    println!("  size: {} bytes", file.size()?);
    if file.is_device() {
        println!("  sector size: {} bytes", file.sector_size()?);
    }
    Ok(())
}

fn dump(path: PathBuf, offset: u64, length: usize, gz: bool) -> Result<()> {
    let mut file = RomFile::open(&path, read_mode(gz))?;
    file.seek(offset)?;
    let mut buf = vec![0u8; length];
    let n = file.read(&mut buf)?;
    if n < length && file.last_error() != 0 {
        log::warn!("Short read: {} of {} bytes (error {})", n, length, file.last_error());
    }
    for (i, line) in buf[..n].chunks(16).enumerate() {
        let ascii: String = line
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
            .collect();
        println!("{:08x}  {:<32}  {}", offset + (i * 16) as u64, hex::encode(line), ascii);
    }
    Ok(())
}

fn inquiry(device: PathBuf) -> Result<()> {
    let mut file = RomFile::open(&device, FileMode::Read)?;
    let inq = file.scsi_inquiry()?;
    println!("Peripheral type: {:#04x}", inq.peripheral_type);
    println!("Vendor:          {}", inq.vendor());
    println!("Product:         {}", inq.product());
    println!("Revision:        {}", inq.revision());
    Ok(())
}

fn identify(device: PathBuf, packet: bool) -> Result<()> {
    let mut file = RomFile::open(&device, FileMode::Read)?;
    let id = if packet {
        file.ata_identify_packet_device()?
    } else {
        file.ata_identify_device()?
    };
    println!("Model:        {}", id.model_number);
    println!("Serial:       {}", id.serial_number);
    println!("Firmware:     {}", id.firmware_revision);
    if !id.media_serial_number.is_empty() {
        println!("Media serial: {}", id.media_serial_number);
    }
    println!("ATAPI:        {}", id.is_atapi());
    Ok(())
}

fn kreon(device: PathBuf, unlock: Option<u8>, lock: bool, skip_errors: Option<Toggle>) -> Result<()> {
    let mut file = RomFile::open(&device, FileMode::Read)?;

    println!("Kreon drive model: {}", file.is_kreon_drive_model());
    let features = file.kreon_feature_list()?;
    if features.is_empty() {
        println!("No Kreon feature list");
    }
    for code in features {
        println!("  {:#06x}  {}", code, KreonFeature::from_code(code).name());
    }

    if let Some(toggle) = skip_errors {
        file.set_kreon_error_skip_state(matches!(toggle, Toggle::On))?;
    }

    let state = match (unlock, lock) {
        (Some(1), _) => Some(KreonLockState::Xtreme),
        (Some(_), _) => Some(KreonLockState::Wxripper),
        (None, true) => Some(KreonLockState::Locked),
        (None, false) => None,
    };
    if let Some(state) = state {
        file.set_kreon_lock_state(state)?;
        // The readable area changes with the lock state
        file.reread_device_size_scsi()?;
        println!("Lock state: {:?}", state);
        println!(
            "Device size: {} bytes ({}-byte sectors)",
            file.device_size()?,
            file.sector_size()?
        );
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Info { path, gz } => info(path, gz),
        Command::Dump { path, offset, length, gz } => dump(path, offset, length, gz),
        Command::Inquiry { device } => inquiry(device),
        Command::Identify { device, packet } => identify(device, packet),
        Command::Kreon { device, unlock, lock, skip_errors } => kreon(device, unlock, lock, skip_errors),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
