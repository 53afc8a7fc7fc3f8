//! Pointscan core library.
//!
//! Offline-first scanning for point-of-sale loyalty credits: scanned member
//! identifiers are queued durably on the device and later submitted to a
//! remote accounting endpoint in one batch.
//!
//! - [`storage`]: the durable scan queue and the key-value local store
//! - [`identity`]: the per-device random identifier
//! - [`ingest`]: validating and queueing scans
//! - [`sync`]: batch submission and queue draining
//! - [`assets`]: install/offline cache for the app shell
//! - [`Station`]: all of the above over one data directory

pub mod assets;
pub mod config;
pub mod error;
pub mod identity;
pub mod ingest;
pub mod models;
pub mod station;
pub mod storage;
pub mod sync;
pub mod utils;

pub use config::{DataDir, Settings, SyncTarget};
pub use error::{Error, Result};
pub use identity::DeviceIdentity;
pub use ingest::ScanIngestor;
pub use models::{MemberId, QueueRecord, SyncBatch};
pub use station::{Station, Status};
pub use storage::{LocalStore, QueueStore};
pub use sync::{
    BackgroundTasks, HttpRemote, Remote, SyncCoordinator, SyncOutcome, TransportError,
};
