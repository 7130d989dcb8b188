//! Vendor key material store
//!
//! Decryption helpers built on top of the file layer need console keys
//! that live in a user-supplied keys.json. The store is loaded once per
//! process; concurrent first use from several threads only loads it once.

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::config;

/// Key store file name searched in the working and executable directories
pub const KEYS_FILE_NAME: &str = "keys.json";

/// Process-wide key store
static KEY_STORE: LazyKeyStore = LazyKeyStore::new(KeyStore::load);

/// Get the process-wide key store (loaded at first access)
pub fn key_store() -> &'static KeyStore {
    KEY_STORE.get()
}

/// On-disk format: `{ "keys": { "name": "hex bytes", ... } }`
#[derive(Debug, Deserialize, Default)]
struct KeyFile {
    #[serde(default)]
    keys: BTreeMap<String, String>,
}

/// Result of checking a single key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    /// Key is present and has the expected length
    Ok,
    /// Key is not in the store
    Missing,
    /// Key decoded but has the wrong length
    WrongLength,
    /// Key value is not valid hex
    BadEncoding,
}

/// Decoded key material
#[derive(Debug, Default, Clone)]
pub struct KeyStore {
    keys: BTreeMap<String, Vec<u8>>,
    bad_encoding: BTreeSet<String>,
}

impl KeyStore {
    /// Load the key store from the configured path, ./keys.json or the
    /// executable directory. Falls back to an empty store.
    pub fn load() -> Self {
        if let Some(path) = &config::get_config().keys.path {
            match Self::load_from_path(path) {
                Ok(store) => {
                    log::info!("Loaded {} keys from {}", store.len(), path.display());
                    return store;
                }
                Err(e) => {
                    log::warn!("Failed to load keys from {}: {}", path.display(), e);
                    return Self::default();
                }
            }
        }

        let mut candidates = vec![PathBuf::from(KEYS_FILE_NAME)];
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                candidates.push(exe_dir.join(KEYS_FILE_NAME));
            }
        }

        for path in candidates {
            if let Ok(store) = Self::load_from_path(&path) {
                log::info!("Loaded {} keys from {}", store.len(), path.display());
                return store;
            }
        }

        log::debug!("No {} found, key store is empty", KEYS_FILE_NAME);
        Self::default()
    }

    /// Load a key store from an explicit path
    pub fn load_from_path(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse a key store from its JSON text
    pub fn from_json(content: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let file: KeyFile = serde_json::from_str(content)?;
        let mut store = Self::default();
        for (name, value) in file.keys {
            let cleaned: String = value.chars().filter(|c| !c.is_whitespace()).collect();
            match hex::decode(&cleaned) {
                Ok(bytes) => {
                    store.keys.insert(name, bytes);
                }
                Err(e) => {
                    log::warn!("Key '{}' is not valid hex: {}", name, e);
                    store.bad_encoding.insert(name);
                }
            }
        }
        Ok(store)
    }

    /// Get a key by name
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.keys.get(name).map(Vec::as_slice)
    }

    /// Check a key's presence and length
    pub fn verify(&self, name: &str, expected_len: usize) -> KeyStatus {
        if self.bad_encoding.contains(name) {
            return KeyStatus::BadEncoding;
        }
        match self.keys.get(name) {
            None => KeyStatus::Missing,
            Some(key) if key.len() != expected_len => KeyStatus::WrongLength,
            Some(_) => KeyStatus::Ok,
        }
    }

    /// Number of successfully decoded keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True if no keys were decoded
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Lazily-initialized key store with init-once semantics
///
/// `OnceLock` checks the cell without locking first and only takes its
/// internal lock, re-checking under it, when the store is still unset.
pub struct LazyKeyStore {
    cell: OnceLock<KeyStore>,
    loader: fn() -> KeyStore,
}

impl LazyKeyStore {
    /// Create an empty cell that will be filled by `loader`
    pub const fn new(loader: fn() -> KeyStore) -> Self {
        Self {
            cell: OnceLock::new(),
            loader,
        }
    }

    /// Get the store, loading it on first access
    pub fn get(&self) -> &KeyStore {
        self.cell.get_or_init(self.loader)
    }

    /// True once the loader has run
    pub fn is_loaded(&self) -> bool {
        self.cell.get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    const SAMPLE: &str = r#"{
        "keys": {
            "twl-scrambler": "00112233445566778899AABBCCDDEEFF",
            "ctr-short": "0011",
            "bad": "zz"
        }
    }"#;

    #[test]
    fn test_from_json() {
        let store = KeyStore::from_json(SAMPLE).unwrap();
        assert_eq!(store.len(), 2);
        let key = store.get("twl-scrambler").unwrap();
        assert_eq!(key.len(), 16);
        assert_eq!(key[0], 0x00);
        assert_eq!(key[15], 0xFF);
    }

    #[test]
    fn test_verify() {
        let store = KeyStore::from_json(SAMPLE).unwrap();
        assert_eq!(store.verify("twl-scrambler", 16), KeyStatus::Ok);
        assert_eq!(store.verify("ctr-short", 16), KeyStatus::WrongLength);
        assert_eq!(store.verify("bad", 16), KeyStatus::BadEncoding);
        assert_eq!(store.verify("absent", 16), KeyStatus::Missing);
    }

    #[test]
    fn test_whitespace_in_hex_is_ignored() {
        let store = KeyStore::from_json(r#"{ "keys": { "k": "01 02\n03" } }"#).unwrap();
        assert_eq!(store.get("k"), Some(&[1u8, 2, 3][..]));
    }

    static LOADS: AtomicUsize = AtomicUsize::new(0);

    fn counting_loader() -> KeyStore {
        LOADS.fetch_add(1, Ordering::SeqCst);
        thread::sleep(std::time::Duration::from_millis(20));
        KeyStore::from_json(SAMPLE).unwrap()
    }

    static SHARED: LazyKeyStore = LazyKeyStore::new(counting_loader);

    #[test]
    fn test_concurrent_first_use_loads_once() {
        assert!(!SHARED.is_loaded());
        let handles: Vec<_> = (0..8)
            .map(|_| thread::spawn(|| SHARED.get().len()))
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 2);
        }
        assert!(SHARED.is_loaded());
        assert_eq!(LOADS.load(Ordering::SeqCst), 1);
    }
}
