//! Error types for pointscan.
//!
//! [`enum@Error`] covers everything that stops a scan from being queued or a
//! sync from running: a malformed member identifier, missing remote
//! settings, local storage faults, and an overlapping sync attempt.
//!
//! A remote rejection or a transport failure is *not* an error here. Those
//! come back as [`SyncOutcome`](crate::sync::SyncOutcome) variants because
//! they leave the queue intact and are expected during normal offline use.

use std::sync::Arc;

use thiserror::Error;

/// Result type alias for pointscan operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Scanned input is not a 14-digit member identifier
    #[error("invalid member identifier: {0}")]
    InvalidMemberId(Arc<str>),

    /// Endpoint, store identifier or point value is absent or invalid
    #[error("configuration missing: {0}")]
    ConfigurationMissing(Arc<str>),

    /// Device-local storage could not be read or written
    #[error("storage fault: {0}")]
    Storage(Arc<str>),

    /// Another sync is still draining the queue
    #[error("a sync is already in progress")]
    SyncInProgress,
}

impl Error {
    #[inline]
    pub fn invalid_member_id(msg: impl Into<String>) -> Self {
        Self::InvalidMemberId(Arc::from(msg.into()))
    }

    #[inline]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigurationMissing(Arc::from(msg.into()))
    }

    #[inline]
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(Arc::from(msg.into()))
    }

    /// True for faults that leave the operator able to simply try again
    /// (as opposed to fixing the input or the settings first).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Storage(_) | Error::SyncInProgress)
    }
}
