//! Remote settings and data directory layout.
//!
//! Settings hold the endpoint address, store identifier and point value the
//! remote accounting service needs. They are persisted as the `settings`
//! entry of the [`LocalStore`](crate::storage::LocalStore) and handed to the
//! ingestor and coordinator when those are built.
//!
//! The data directory defaults to `~/.local/share/pointscan` (platform
//! equivalent) and holds three independent areas: `state/`, `queue/` and
//! `assets/`.

use std::path::{Path, PathBuf};

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Application name used for the data directory path
pub const APP_NAME: &str = "pointscan";

/// Environment variable overriding the data directory
pub const DATA_DIR_ENV: &str = "POINTSCAN_DATA_DIR";

/// Executable endpoints are deployed under this path suffix
pub const ENDPOINT_SUFFIX: &str = "/exec";

/// Key of the settings entry in the local store
pub const SETTINGS_KEY: &str = "settings";

const STATE_DIR: &str = "state";
const QUEUE_DIR: &str = "queue";
const ASSETS_DIR: &str = "assets";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Settings {
    pub endpoint_url: Option<String>,
    pub store_id: Option<String>,
    pub point_value: Option<u32>,
}

/// Validated view of [`Settings`], borrowed for the duration of one scan or
/// sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTarget<'a> {
    pub endpoint_url: &'a str,
    pub store_id: &'a str,
    pub point_value: u32,
}

impl Settings {
    /// Validate every field, naming the first one that is missing or invalid.
    pub fn target(&self) -> Result<SyncTarget<'_>> {
        let endpoint_url = self
            .endpoint_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::config("endpoint address is not set"))?;
        Self::check_endpoint(endpoint_url)?;

        let store_id = self
            .store_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::config("store identifier is not set"))?;

        let point_value = match self.point_value {
            Some(0) => return Err(Error::config("point value must be greater than zero")),
            Some(v) => v,
            None => return Err(Error::config("point value is not set")),
        };

        Ok(SyncTarget {
            endpoint_url,
            store_id,
            point_value,
        })
    }

    pub fn is_complete(&self) -> bool {
        self.target().is_ok()
    }

    fn check_endpoint(endpoint: &str) -> Result<()> {
        let url = Url::parse(endpoint)
            .map_err(|e| Error::config(format!("endpoint address is not a URL: {e}")))?;
        if url.scheme() != "https" && url.scheme() != "http" {
            return Err(Error::config(format!(
                "endpoint address must use http or https, got {}",
                url.scheme()
            )));
        }
        if !url.path().ends_with(ENDPOINT_SUFFIX) {
            return Err(Error::config(format!(
                "endpoint address must end with {ENDPOINT_SUFFIX}"
            )));
        }
        Ok(())
    }

    /// Overlay the fields that are `Some` in `other` onto `self`.
    pub fn merged(&self, other: &Settings) -> Settings {
        Settings {
            endpoint_url: other.endpoint_url.clone().or_else(|| self.endpoint_url.clone()),
            store_id: other.store_id.clone().or_else(|| self.store_id.clone()),
            point_value: other.point_value.or(self.point_value),
        }
    }
}

/// On-disk layout under one data directory.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve the data directory: explicit path, then `POINTSCAN_DATA_DIR`,
    /// then the platform's local data directory.
    pub fn resolve(explicit: Option<PathBuf>) -> Result<Self> {
        if let Some(path) = explicit {
            return Ok(Self::new(path));
        }
        if let Some(path) = std::env::var_os(DATA_DIR_ENV) {
            return Ok(Self::new(path));
        }
        let base = dirs::data_local_dir()
            .ok_or_else(|| Error::storage("could not find local data directory"))?;
        Ok(Self::new(base.join(APP_NAME)))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    pub fn queue_dir(&self) -> PathBuf {
        self.root.join(QUEUE_DIR)
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.root.join(ASSETS_DIR)
    }
}
