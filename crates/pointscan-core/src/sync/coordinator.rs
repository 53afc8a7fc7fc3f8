use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::error::Result;
use crate::identity::DeviceIdentity;
use crate::models::{LastSyncNotice, SyncBatch};
use crate::storage::{LocalStore, QueueStore};

use super::Remote;

/// Result of one sync attempt that got as far as deciding what to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Queue was empty; no request was made.
    NothingToSync,
    /// Endpoint accepted the batch; the queue was drained.
    Success(String),
    /// Endpoint answered but declined the batch; the queue is untouched.
    RemoteRejected(String),
    /// No well-formed answer; the queue is untouched.
    TransportError(String),
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::Success(_))
    }
}

/// Last-sync notices still being sent. Clones share the same set.
///
/// The runtime aborts unfinished tasks when it shuts down, so a front end
/// that exits right after a sync must [`flush`](Self::flush) first.
#[derive(Debug, Clone, Default)]
pub struct BackgroundTasks {
    tasks: Arc<Mutex<JoinSet<()>>>,
}

impl BackgroundTasks {
    fn spawn<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        // Reap finished notices so a long session does not accumulate them
        while tasks.try_join_next().is_some() {}
        tasks.spawn(task);
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait up to `limit` for every pending task. Returns `false` if some
    /// were still running; those are abandoned.
    pub async fn flush(&self, limit: Duration) -> bool {
        let mut tasks = {
            let mut shared = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *shared)
        };
        if tasks.is_empty() {
            return true;
        }

        let drained = tokio::time::timeout(limit, async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    warn!(error = %e, "Background task failed");
                }
            }
        })
        .await
        .is_ok();

        if !drained {
            warn!(
                abandoned = tasks.len(),
                timeout_ms = limit.as_millis() as u64,
                "Background tasks still running at shutdown"
            );
        }
        drained
    }
}

/// Drains the queue into one batch and submits it.
///
/// The coordinator does not serialize overlapping calls itself; callers
/// must not run two `sync`s over the same queue at once (see
/// [`Station::sync`](crate::Station::sync)).
#[derive(Debug, Clone)]
pub struct SyncCoordinator<R> {
    queue: QueueStore,
    identity: DeviceIdentity,
    store: LocalStore,
    settings: Arc<Settings>,
    remote: R,
    background: BackgroundTasks,
}

impl<R: Remote> SyncCoordinator<R> {
    pub fn new(
        queue: QueueStore,
        identity: DeviceIdentity,
        store: LocalStore,
        settings: Arc<Settings>,
        remote: R,
    ) -> Self {
        Self {
            queue,
            identity,
            store,
            settings,
            remote,
            background: BackgroundTasks::default(),
        }
    }

    /// Track notices in `background` instead of a set of its own.
    pub fn with_background(mut self, background: BackgroundTasks) -> Self {
        self.background = background;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Notices started by this coordinator that may still be in flight.
    pub fn background(&self) -> &BackgroundTasks {
        &self.background
    }

    /// Run one sync.
    ///
    /// Returns `Err` only when the sync could not be attempted or its result
    /// could not be committed locally (missing settings, storage faults).
    /// Remote rejections and transport failures are `Ok` outcomes that leave
    /// every queued record in place.
    pub async fn sync(&self) -> Result<SyncOutcome> {
        let target = self.settings.target()?;

        let records = self.queue.list_all().await?;
        let Some(last_id) = records.last().map(|r| r.id) else {
            debug!("Queue empty, nothing to sync");
            return Ok(SyncOutcome::NothingToSync);
        };

        let device_id = self.identity.get_or_create()?;
        let batch = SyncBatch::build(&target, &records, &device_id);
        info!(records = batch.len(), device_id = %device_id, "Starting sync");

        let reply = match self.remote.submit_batch(target.endpoint_url, &batch).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, pending = records.len(), "Sync failed, queue kept");
                return Ok(SyncOutcome::TransportError(e.to_string()));
            }
        };

        if !reply.is_success() {
            let message = reply
                .message
                .unwrap_or_else(|| format!("endpoint returned status {}", reply.status));
            warn!(status = reply.status, message = %message, "Batch rejected, queue kept");
            return Ok(SyncOutcome::RemoteRejected(message));
        }

        // Scans queued while the request was in flight stay for the next sync
        self.queue.remove_through(last_id).await.inspect_err(|e| {
            error!(error = %e, "Batch accepted but queue could not be cleared");
        })?;

        if let Err(e) = self.store.set_last_sync_ms(Utc::now().timestamp_millis()) {
            warn!(error = %e, "Failed to record last sync time");
        }

        self.spawn_last_sync_notice(target.endpoint_url, &device_id);

        let message = reply.message.unwrap_or_default();
        info!(records = records.len(), message = %message, "Sync complete");
        Ok(SyncOutcome::Success(message))
    }

    /// Best-effort notice, not awaited by `sync`. Its failure is only logged.
    fn spawn_last_sync_notice(&self, endpoint: &str, device_id: &str) {
        let remote = self.remote.clone();
        let endpoint = endpoint.to_string();
        let notice = LastSyncNotice::new(device_id);

        self.background.spawn(async move {
            match remote.notify_last_sync(&endpoint, &notice).await {
                Ok(()) => debug!(device_id = %notice.device_id, "Last sync notice sent"),
                Err(e) => warn!(error = %e, "Failed to send last sync notice"),
            }
        });
    }
}
