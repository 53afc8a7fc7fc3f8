//! Device identity management
//!
//! Each device carries a random identifier, generated once and persisted in
//! the local store. It tags every queued scan and every sync batch so the
//! remote side can tell scanning devices apart.

use std::sync::{Arc, Mutex};

use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::storage::LocalStore;

/// Key of the device identifier entry in the local store
pub const DEVICE_ID_KEY: &str = "device_id";

/// Persistent device identifier. Clones share the in-memory copy.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    store: LocalStore,
    cached: Arc<Mutex<Option<String>>>,
}

impl DeviceIdentity {
    pub fn new(store: LocalStore) -> Self {
        Self {
            store,
            cached: Arc::new(Mutex::new(None)),
        }
    }

    /// Return the persisted identifier, generating and persisting one on the
    /// first call for this device.
    pub fn get_or_create(&self) -> Result<String> {
        let mut cached = self.lock()?;
        if let Some(ref id) = *cached {
            return Ok(id.clone());
        }

        let id = match self.store.get::<String>(DEVICE_ID_KEY)? {
            Some(id) if !id.trim().is_empty() => {
                debug!(device_id = %id, "Loaded existing device identity");
                id
            }
            _ => {
                let id = Self::generate();
                self.store.set(DEVICE_ID_KEY, &id)?;
                info!(device_id = %id, "Generated new device identity");
                id
            }
        };

        *cached = Some(id.clone());
        Ok(id)
    }

    /// Discard the current identifier and persist a fresh one. Only part of
    /// a full device reset.
    pub fn reset(&self) -> Result<String> {
        let mut cached = self.lock()?;
        let id = Self::generate();
        self.store.set(DEVICE_ID_KEY, &id)?;
        info!(device_id = %id, "Device identity reset");
        *cached = Some(id.clone());
        Ok(id)
    }

    fn generate() -> String {
        Uuid::new_v4().to_string()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<String>>> {
        self.cached
            .lock()
            .map_err(|_| Error::storage("device identity lock poisoned"))
    }
}
