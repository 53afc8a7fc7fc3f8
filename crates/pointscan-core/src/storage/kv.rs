use std::path::PathBuf;

use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::config::{Settings, SETTINGS_KEY};
use crate::error::{Error, Result};

use super::write_atomic;

/// Key of the last-sync marker (milliseconds since epoch)
pub const LAST_SYNC_KEY: &str = "last_sync";

/// Key-value entries stored as `<key>.json` in one directory.
///
/// Clone is cheap: only the directory path is copied.
#[derive(Debug, Clone)]
pub struct LocalStore {
    dir: PathBuf,
}

impl LocalStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            Error::storage(format!("failed to create {}: {e}", dir.display()))
        })?;
        Ok(Self { dir })
    }

    fn entry_path(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        if !valid {
            return Err(Error::storage(format!("invalid storage key: {key:?}")));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let path = self.entry_path(key)?;
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::storage(format!("failed to read {key}: {e}"))),
        };
        let value = serde_json::from_str(&contents)
            .map_err(|e| Error::storage(format!("failed to parse {key}: {e}")))?;
        Ok(Some(value))
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let path = self.entry_path(key)?;
        let contents = serde_json::to_vec_pretty(value)
            .map_err(|e| Error::storage(format!("failed to serialize {key}: {e}")))?;
        write_atomic(&path, &contents)
            .map_err(|e| Error::storage(format!("failed to write {key}: {e}")))?;
        debug!(key, "Stored local entry");
        Ok(())
    }

    /// Remove an entry. Returns whether it existed.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let path = self.entry_path(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::storage(format!("failed to remove {key}: {e}"))),
        }
    }

    // ===== Settings =====

    pub fn load_settings(&self) -> Result<Settings> {
        Ok(self.get(SETTINGS_KEY)?.unwrap_or_default())
    }

    pub fn save_settings(&self, settings: &Settings) -> Result<()> {
        self.set(SETTINGS_KEY, settings)
    }

    // ===== Last-Sync Marker =====

    pub fn last_sync_ms(&self) -> Result<Option<i64>> {
        self.get(LAST_SYNC_KEY)
    }

    pub fn set_last_sync_ms(&self, millis: i64) -> Result<()> {
        self.set(LAST_SYNC_KEY, &millis)
    }
}
