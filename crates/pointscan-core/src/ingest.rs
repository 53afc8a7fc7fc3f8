//! Scan ingestion: validate scanner input and queue it locally.
//!
//! Ingestion never touches the network, so scans keep being accepted while
//! the device is offline. A scan is reported as accepted only after the
//! queue write is durable.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::Result;
use crate::identity::DeviceIdentity;
use crate::models::{MemberId, NewRecord, QueueRecord};
use crate::storage::QueueStore;

#[derive(Debug, Clone)]
pub struct ScanIngestor {
    queue: QueueStore,
    identity: DeviceIdentity,
    settings: Arc<Settings>,
}

impl ScanIngestor {
    pub fn new(queue: QueueStore, identity: DeviceIdentity, settings: Arc<Settings>) -> Self {
        Self {
            queue,
            identity,
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Queue one scan.
    ///
    /// Fails with `ConfigurationMissing` before anything else if the remote
    /// settings are incomplete, with `InvalidMemberId` if the input is not
    /// 14 ASCII digits, and with `Storage` if the append could not be
    /// committed. In every failure case nothing is queued.
    pub async fn submit_scan(&self, raw: &str) -> Result<QueueRecord> {
        self.settings.target()?;

        let member_id = MemberId::parse(raw).inspect_err(|e| {
            debug!(error = %e, "Scan rejected");
        })?;

        let device_id = self.identity.get_or_create()?;
        let record = NewRecord::new(member_id, Utc::now(), device_id);

        self.queue.append(record).await.inspect_err(|e| {
            warn!(error = %e, "Failed to queue scan");
        })
    }
}
