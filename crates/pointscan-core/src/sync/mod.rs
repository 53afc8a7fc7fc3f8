//! Batch synchronization with the remote accounting endpoint.
//!
//! The `SyncCoordinator` drains the whole queue into one `SyncBatch`,
//! submits it through a `Remote`, and removes the submitted records only
//! when the endpoint confirms acceptance. The follow-up last-sync notice
//! runs in the background; `BackgroundTasks::flush` waits for it. `HttpRemote` is the production `Remote`;
//! tests substitute their own.
//!
//! Delivery is at-least-once: if the endpoint accepts a batch but the reply
//! is lost, the same records are submitted again on the next sync.

pub mod coordinator;
pub mod error;
pub mod remote;

pub use coordinator::{BackgroundTasks, SyncCoordinator, SyncOutcome};
pub use error::TransportError;
pub use remote::{HttpRemote, Remote};
