use std::path::{Path, PathBuf};

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::error::Error;

use super::{AssetError, AssetFetcher};

/// Name prefix of every asset cache; the crate version completes it.
const CACHE_PREFIX: &str = "pointscan-shell-v";

/// Staging directories are renamed into place once an install completes.
const STAGING_PREFIX: &str = ".staging-";

/// A replaced install waits here until its successor is in place.
const RETIRED_PREFIX: &str = ".retired-";

/// Maximum concurrent asset fetches during install.
const MAX_CONCURRENT_FETCHES: usize = 4;

/// Every static resource the app shell needs to start without a network.
pub const APP_SHELL: &[&str] = &[
    "/",
    "/index.html",
    "/app.js",
    "/manifest.json",
    "/icons/icon-192.png",
    "/icons/icon-512.png",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Cache,
    Network,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Served {
    pub body: Vec<u8>,
    pub source: Source,
}

/// One named, versioned set of cached assets under a shared root.
#[derive(Debug, Clone)]
pub struct AssetCache {
    root: PathBuf,
    name: String,
}

impl AssetCache {
    pub fn new(root: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            name: name.into(),
        }
    }

    /// The cache for the running version.
    pub fn current(root: impl Into<PathBuf>) -> Self {
        Self::new(root, Self::current_name())
    }

    pub fn current_name() -> String {
        format!("{}{}", CACHE_PREFIX, env!("CARGO_PKG_VERSION"))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn dir(&self) -> PathBuf {
        self.root.join(&self.name)
    }

    fn retired_dir(&self) -> PathBuf {
        self.root.join(format!("{}{}", RETIRED_PREFIX, self.name))
    }

    /// Request paths become hex file names: no separators, no collisions.
    fn entry_name(path: &str) -> String {
        path.bytes().map(|b| format!("{:02x}", b)).collect()
    }

    fn entry_path(dir: &Path, path: &str) -> PathBuf {
        dir.join(Self::entry_name(path))
    }

    pub async fn is_installed(&self) -> bool {
        tokio::fs::metadata(self.dir())
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Pre-fetch every path in `manifest` and store them as this cache.
    ///
    /// All-or-nothing: if any fetch fails, nothing is stored and a previous
    /// install of the same cache stays as it was.
    pub async fn install<F: AssetFetcher>(
        &self,
        fetcher: &F,
        manifest: &[&str],
    ) -> Result<usize, AssetError> {
        info!(cache = %self.name, assets = manifest.len(), "Installing asset cache");

        let fetched: Vec<(&str, _)> = stream::iter(manifest.iter().copied())
            .map(|path| async move { (path, fetcher.fetch(path).await) })
            .buffer_unordered(MAX_CONCURRENT_FETCHES)
            .collect()
            .await;

        let mut assets = Vec::with_capacity(fetched.len());
        for (path, result) in fetched {
            match result {
                Ok(body) => assets.push((path, body)),
                Err(source) => {
                    warn!(path, error = %source, "Asset fetch failed, install aborted");
                    return Err(AssetError::Fetch {
                        path: path.to_string(),
                        source,
                    });
                }
            }
        }

        let staging = self.root.join(format!("{}{}", STAGING_PREFIX, self.name));
        self.write_staging(&staging, &assets).await?;
        self.commit(&staging).await?;

        info!(cache = %self.name, stored = assets.len(), "Asset cache installed");
        Ok(assets.len())
    }

    async fn write_staging(&self, staging: &Path, assets: &[(&str, Vec<u8>)]) -> Result<(), Error> {
        if tokio::fs::metadata(staging).await.is_ok() {
            tokio::fs::remove_dir_all(staging)
                .await
                .map_err(|e| Error::storage(format!("failed to clear staging cache: {e}")))?;
        }
        tokio::fs::create_dir_all(staging)
            .await
            .map_err(|e| Error::storage(format!("failed to create staging cache: {e}")))?;

        for (path, body) in assets {
            tokio::fs::write(Self::entry_path(staging, path), body)
                .await
                .map_err(|e| Error::storage(format!("failed to store {path}: {e}")))?;
        }
        Ok(())
    }

    /// Swap `staging` in as this cache. The previous install is moved aside
    /// first and only deleted once the new one is in place.
    async fn commit(&self, staging: &Path) -> Result<(), Error> {
        let dir = self.dir();
        let retired = self.retired_dir();

        if tokio::fs::metadata(&retired).await.is_ok() {
            if self.is_installed().await {
                tokio::fs::remove_dir_all(&retired).await.map_err(|e| {
                    Error::storage(format!("failed to clear retired cache {}: {e}", self.name))
                })?;
            } else {
                // Interrupted swap: the retired copy is the last good install
                tokio::fs::rename(&retired, &dir).await.map_err(|e| {
                    Error::storage(format!("failed to restore cache {}: {e}", self.name))
                })?;
            }
        }

        let replacing = self.is_installed().await;
        if replacing {
            tokio::fs::rename(&dir, &retired)
                .await
                .map_err(|e| Error::storage(format!("failed to replace cache {}: {e}", self.name)))?;
        }

        if let Err(e) = tokio::fs::rename(staging, &dir).await {
            if replacing {
                if let Err(restore) = tokio::fs::rename(&retired, &dir).await {
                    warn!(cache = %self.name, error = %restore, "Failed to restore previous cache");
                }
            }
            return Err(Error::storage(format!("failed to commit cache {}: {e}", self.name)));
        }

        if replacing {
            if let Err(e) = tokio::fs::remove_dir_all(&retired).await {
                warn!(cache = %self.name, error = %e, "Failed to delete replaced cache");
            }
        }
        Ok(())
    }

    /// Cached body for `path`, if this cache holds it. While an install is
    /// being swapped in, the replaced copy answers.
    pub async fn lookup(&self, path: &str) -> Result<Option<Vec<u8>>, Error> {
        let dir = if self.is_installed().await {
            self.dir()
        } else {
            self.retired_dir()
        };
        match tokio::fs::read(Self::entry_path(&dir, path)).await {
            Ok(body) => Ok(Some(body)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::storage(format!("failed to read cached {path}: {e}"))),
        }
    }

    /// Answer a request: cached copy first, otherwise the network. Network
    /// results are passed through and never stored.
    pub async fn serve<F: AssetFetcher>(&self, fetcher: &F, path: &str) -> Result<Served, AssetError> {
        if let Some(body) = self.lookup(path).await? {
            debug!(path, "Served from cache");
            return Ok(Served {
                body,
                source: Source::Cache,
            });
        }

        debug!(path, "Cache miss, fetching from network");
        let body = fetcher.fetch(path).await.map_err(|source| AssetError::Fetch {
            path: path.to_string(),
            source,
        })?;
        Ok(Served {
            body,
            source: Source::Network,
        })
    }

    /// Delete every cache under the root except this one. Returns the names
    /// of the deleted caches.
    pub async fn activate(&self) -> Result<Vec<String>, Error> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::storage(format!("failed to list caches: {e}"))),
        };

        let mut deleted = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::storage(format!("failed to list caches: {e}")))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == self.name {
                continue;
            }
            let path = entry.path();
            let removed = if path.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            removed.map_err(|e| Error::storage(format!("failed to delete cache {name}: {e}")))?;
            info!(cache = %name, "Deleted stale asset cache");
            deleted.push(name);
        }

        deleted.sort();
        Ok(deleted)
    }
}
