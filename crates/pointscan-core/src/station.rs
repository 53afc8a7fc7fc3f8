//! A scanning station: every component wired over one data directory.
//!
//! `Station` is what a front end talks to. It owns the stores, builds the
//! ingestor and coordinator from the current settings, and keeps at most one
//! sync in flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::assets::AssetCache;
use crate::config::{DataDir, Settings, SETTINGS_KEY};
use crate::error::{Error, Result};
use crate::identity::DeviceIdentity;
use crate::ingest::ScanIngestor;
use crate::models::QueueRecord;
use crate::storage::kv::LAST_SYNC_KEY;
use crate::storage::{LocalStore, QueueStore};
use crate::sync::{BackgroundTasks, HttpRemote, Remote, SyncCoordinator, SyncOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub pending: usize,
    pub device_id: String,
    pub last_sync_ms: Option<i64>,
    pub settings: Settings,
    pub configured: bool,
}

/// Clears the in-flight flag when a sync finishes, however it finishes.
struct SyncGuard(Arc<AtomicBool>);

impl SyncGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for SyncGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Station<R = HttpRemote> {
    data_dir: DataDir,
    store: LocalStore,
    queue: QueueStore,
    identity: DeviceIdentity,
    remote: R,
    settings: Arc<Settings>,
    ingestor: ScanIngestor,
    coordinator: SyncCoordinator<R>,
    background: BackgroundTasks,
    syncing: Arc<AtomicBool>,
}

impl Station<HttpRemote> {
    /// Open a station that syncs over HTTP.
    pub async fn open(data_dir: DataDir) -> Result<Self> {
        let remote = HttpRemote::new()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;
        Self::with_remote(data_dir, remote).await
    }
}

impl<R: Remote> Station<R> {
    pub async fn with_remote(data_dir: DataDir, remote: R) -> Result<Self> {
        let store = LocalStore::open(data_dir.state_dir())?;
        let queue = QueueStore::open(data_dir.queue_dir()).await?;
        let identity = DeviceIdentity::new(store.clone());

        let settings = match store.load_settings() {
            Ok(settings) => settings,
            Err(e) => {
                warn!(error = %e, "Failed to load settings, using defaults");
                Settings::default()
            }
        };
        let settings = Arc::new(settings);

        let device_id = identity.get_or_create()?;
        info!(device_id = %device_id, data_dir = %data_dir.root().display(), "Station opened");

        let background = BackgroundTasks::default();
        let ingestor = ScanIngestor::new(queue.clone(), identity.clone(), Arc::clone(&settings));
        let coordinator = SyncCoordinator::new(
            queue.clone(),
            identity.clone(),
            store.clone(),
            Arc::clone(&settings),
            remote.clone(),
        )
        .with_background(background.clone());

        Ok(Self {
            data_dir,
            store,
            queue,
            identity,
            remote,
            settings,
            ingestor,
            coordinator,
            background,
            syncing: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn device_id(&self) -> Result<String> {
        self.identity.get_or_create()
    }

    pub fn last_sync_ms(&self) -> Result<Option<i64>> {
        self.store.last_sync_ms()
    }

    pub async fn submit_scan(&self, raw: &str) -> Result<QueueRecord> {
        self.ingestor.submit_scan(raw).await
    }

    /// Run one sync, refusing to start while another is in flight.
    pub async fn sync(&self) -> Result<SyncOutcome> {
        let Some(_guard) = SyncGuard::acquire(&self.syncing) else {
            warn!("Sync requested while another is in flight");
            return Err(Error::SyncInProgress);
        };
        self.coordinator.sync().await
    }

    /// Wait up to `limit` for background work started by earlier syncs.
    /// Front ends call this before shutting the runtime down; returns
    /// `false` (after logging) if work had to be abandoned.
    pub async fn flush_background(&self, limit: Duration) -> bool {
        self.background.flush(limit).await
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    pub async fn pending(&self) -> Result<Vec<QueueRecord>> {
        self.queue.list_all().await
    }

    pub async fn status(&self) -> Result<Status> {
        Ok(Status {
            pending: self.queue.count().await?,
            device_id: self.identity.get_or_create()?,
            last_sync_ms: self.store.last_sync_ms()?,
            settings: (*self.settings).clone(),
            configured: self.settings.is_complete(),
        })
    }

    /// Validate, persist and apply new settings.
    pub fn update_settings(&mut self, settings: Settings) -> Result<()> {
        settings.target()?;
        self.store.save_settings(&settings)?;
        info!("Settings updated");
        self.apply_settings(settings);
        Ok(())
    }

    fn apply_settings(&mut self, settings: Settings) {
        self.settings = Arc::new(settings);
        self.ingestor = ScanIngestor::new(
            self.queue.clone(),
            self.identity.clone(),
            Arc::clone(&self.settings),
        );
        self.coordinator = SyncCoordinator::new(
            self.queue.clone(),
            self.identity.clone(),
            self.store.clone(),
            Arc::clone(&self.settings),
            self.remote.clone(),
        )
        .with_background(self.background.clone());
    }

    /// Full device reset: discard the settings, the last-sync marker and the
    /// queue, then issue a new device identifier. Callers must have the
    /// operator confirm first; unsynced scans are lost.
    ///
    /// Settings go first, so a reset that fails part way leaves a station
    /// that accepts no scans and cannot sync. Every step is idempotent and a
    /// failed reset can simply be run again.
    pub async fn reset_device(&mut self) -> Result<String> {
        if self.is_syncing() {
            return Err(Error::SyncInProgress);
        }

        self.store.remove(SETTINGS_KEY)?;
        self.apply_settings(Settings::default());
        self.store.remove(LAST_SYNC_KEY)?;
        let discarded = self.queue.clear().await?;
        let device_id = self.identity.reset()?;

        warn!(discarded, device_id = %device_id, "Device reset");
        Ok(device_id)
    }

    /// The install/offline cache for this version of the app shell.
    pub fn asset_cache(&self) -> AssetCache {
        AssetCache::current(self.data_dir.assets_dir())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LastSyncNotice, RemoteReply, SyncBatch};
    use crate::sync::TransportError;
    use std::future::Future;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    /// Holds every batch until released, so a sync can be kept in flight.
    #[derive(Clone, Default)]
    struct GatedRemote {
        received: Arc<Notify>,
        release: Arc<Notify>,
    }

    impl Remote for GatedRemote {
        fn submit_batch(
            &self,
            _endpoint: &str,
            _batch: &SyncBatch,
        ) -> impl Future<Output = std::result::Result<RemoteReply, TransportError>> + Send {
            let received = Arc::clone(&self.received);
            let release = Arc::clone(&self.release);
            async move {
                received.notify_one();
                release.notified().await;
                Ok(RemoteReply {
                    status: 200,
                    message: Some("ok".to_string()),
                })
            }
        }

        fn notify_last_sync(
            &self,
            _endpoint: &str,
            _notice: &LastSyncNotice,
        ) -> impl Future<Output = std::result::Result<(), TransportError>> + Send {
            async { Ok(()) }
        }
    }

    fn settings() -> Settings {
        Settings {
            endpoint_url: Some("https://example.com/macros/s/x/exec".to_string()),
            store_id: Some("store-1".to_string()),
            point_value: Some(2),
        }
    }

    async fn station(dir: &TempDir) -> Station<GatedRemote> {
        Station::with_remote(DataDir::new(dir.path()), GatedRemote::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_fresh_station_is_unconfigured() {
        let dir = TempDir::new().unwrap();
        let station = station(&dir).await;

        let status = station.status().await.unwrap();
        assert_eq!(status.pending, 0);
        assert!(!status.configured);
        assert_eq!(status.last_sync_ms, None);
        assert!(!status.device_id.is_empty());

        assert!(matches!(
            station.submit_scan("12345678901234").await,
            Err(Error::ConfigurationMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_update_settings_applies_and_persists() {
        let dir = TempDir::new().unwrap();
        let mut station = station(&dir).await;

        station.update_settings(settings()).unwrap();
        station.submit_scan("12345678901234").await.unwrap();
        assert_eq!(station.settings(), &settings());

        let reopened = Station::with_remote(DataDir::new(dir.path()), GatedRemote::default())
            .await
            .unwrap();
        assert_eq!(reopened.settings(), &settings());
        assert_eq!(reopened.pending().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_settings_rejects_invalid() {
        let dir = TempDir::new().unwrap();
        let mut station = station(&dir).await;
        station.update_settings(settings()).unwrap();

        let mut bad = settings();
        bad.endpoint_url = Some("https://example.com/not-executable".to_string());
        assert!(matches!(
            station.update_settings(bad),
            Err(Error::ConfigurationMissing(_))
        ));
        assert_eq!(station.settings(), &settings());
    }

    #[tokio::test]
    async fn test_overlapping_sync_is_refused() {
        let dir = TempDir::new().unwrap();
        let mut station = station(&dir).await;
        station.update_settings(settings()).unwrap();
        station.submit_scan("12345678901234").await.unwrap();

        let remote = station.remote.clone();
        let station = Arc::new(station);
        let first = {
            let station = Arc::clone(&station);
            tokio::spawn(async move { station.sync().await })
        };

        tokio::time::timeout(Duration::from_secs(5), remote.received.notified())
            .await
            .unwrap();
        assert!(station.is_syncing());
        assert_eq!(station.sync().await, Err(Error::SyncInProgress));

        remote.release.notify_one();
        let outcome = first.await.unwrap().unwrap();
        assert_eq!(outcome, SyncOutcome::Success("ok".to_string()));
        assert!(!station.is_syncing());

        // The guard is released; an empty queue syncs to nothing
        assert_eq!(station.sync().await, Ok(SyncOutcome::NothingToSync));
    }

    #[tokio::test]
    async fn test_reset_device_discards_everything() {
        let dir = TempDir::new().unwrap();
        let mut station = station(&dir).await;
        station.update_settings(settings()).unwrap();
        station.submit_scan("12345678901234").await.unwrap();
        station.store.set_last_sync_ms(1_700_000_000_000).unwrap();
        let before = station.device_id().unwrap();

        let after = station.reset_device().await.unwrap();

        assert_ne!(before, after);
        let status = station.status().await.unwrap();
        assert_eq!(status.pending, 0);
        assert_eq!(status.device_id, after);
        assert_eq!(status.last_sync_ms, None);
        assert_eq!(status.settings, Settings::default());
        assert!(matches!(
            station.submit_scan("12345678901234").await,
            Err(Error::ConfigurationMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_reset_can_be_run_again() {
        let dir = TempDir::new().unwrap();
        let mut station = station(&dir).await;
        station.update_settings(settings()).unwrap();
        station.submit_scan("12345678901234").await.unwrap();
        let before = station.device_id().unwrap();

        let squat = DataDir::new(dir.path()).queue_dir().join("queue.json.tmp");
        std::fs::create_dir(&squat).unwrap();
        assert!(matches!(station.reset_device().await, Err(Error::Storage(_))));

        // Half-reset: no longer configured, nothing else lost yet
        assert!(!station.status().await.unwrap().configured);
        assert!(matches!(
            station.submit_scan("12345678901234").await,
            Err(Error::ConfigurationMissing(_))
        ));
        assert_eq!(station.device_id().unwrap(), before);

        std::fs::remove_dir(&squat).unwrap();
        let after = station.reset_device().await.unwrap();
        assert_ne!(after, before);
        assert_eq!(station.status().await.unwrap().pending, 0);

        let reopened = Station::with_remote(DataDir::new(dir.path()), GatedRemote::default())
            .await
            .unwrap();
        assert_eq!(reopened.settings(), &Settings::default());
        assert_eq!(reopened.device_id().unwrap(), after);
        assert!(reopened.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_flush_background_without_syncs() {
        let dir = TempDir::new().unwrap();
        let station = station(&dir).await;
        assert!(station.flush_background(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_asset_cache_lives_under_data_dir() {
        let dir = TempDir::new().unwrap();
        let station = station(&dir).await;
        let cache = station.asset_cache();
        assert_eq!(cache.name(), AssetCache::current_name());
        assert!(!cache.is_installed().await);
    }
}
