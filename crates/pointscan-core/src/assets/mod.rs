//! Install/offline cache for the application's own static assets.
//!
//! On install the app shell is pre-fetched into a versioned cache; at run
//! time requests are answered from that cache and fall through to the
//! network otherwise. Activating a new version deletes every older cache.
//! Nothing here touches the scan queue or the sync path.

pub mod cache;
pub mod fetch;

pub use cache::{AssetCache, Served, Source, APP_SHELL};
pub use fetch::{AssetFetcher, HttpFetcher};

use thiserror::Error;

use crate::error::Error;
use crate::sync::TransportError;

#[derive(Error, Debug)]
pub enum AssetError {
    #[error("failed to fetch {path}: {source}")]
    Fetch {
        path: String,
        #[source]
        source: TransportError,
    },

    #[error(transparent)]
    Local(#[from] Error),
}
