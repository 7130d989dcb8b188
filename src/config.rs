//! Library configuration
//!
//! Handles loading and managing configuration from romfile.json

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

/// Configuration file name searched in the working and executable directories
pub const CONFIG_FILE_NAME: &str = "romfile.json";

/// Global configuration
static APP_CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Get the global configuration
pub fn get_config() -> &'static AppConfig {
    APP_CONFIG.get_or_init(AppConfig::load)
}

/// Root configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub devices: DeviceConfig,
    #[serde(default)]
    pub gzip: GzipConfig,
    #[serde(default)]
    pub keys: KeysConfig,
}

/// Raw device access
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DeviceConfig {
    /// Allow opening block devices at all
    #[serde(default = "default_allow_raw_devices")]
    pub allow_raw_devices: bool,
    /// Device path prefixes accepted in addition to the built-in list
    #[serde(default)]
    pub extra_patterns: Vec<String>,
}

fn default_allow_raw_devices() -> bool {
    true
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            allow_raw_devices: default_allow_raw_devices(),
            extra_patterns: Vec::new(),
        }
    }
}

/// Transparent decompression
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct GzipConfig {
    /// Treat plain read-only opens as gzip-probing opens
    #[serde(default)]
    pub transparent_by_default: bool,
}

/// Key material location
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct KeysConfig {
    /// Explicit key store file; searched like the config file when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl AppConfig {
    /// Load configuration from romfile.json
    pub fn load() -> Self {
        // Try to load from current directory first
        if let Ok(config) = Self::load_from_path(CONFIG_FILE_NAME) {
            log::info!("Loaded config from ./{}", CONFIG_FILE_NAME);
            return config;
        }

        // Try to load from executable directory
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                let config_path = exe_dir.join(CONFIG_FILE_NAME);
                if let Ok(config) = Self::load_from_path(&config_path) {
                    log::info!("Loaded config from {}", config_path.display());
                    return config;
                }
            }
        }

        log::debug!("No {} found, using defaults", CONFIG_FILE_NAME);
        Self::default()
    }

    /// Load configuration from an explicit path
    pub fn load_from_path(path: impl Into<PathBuf>) -> Result<Self, Box<dyn std::error::Error>> {
        let path = path.into();
        let content = fs::read_to_string(&path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }
}
