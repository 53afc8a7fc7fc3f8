//! HTTP client for the remote accounting endpoint.

use std::future::Future;
use std::time::Duration;

use reqwest::{header, Client, StatusCode};
use tracing::debug;

use crate::models::{LastSyncNotice, RemoteReply, SyncBatch};

use super::TransportError;

/// HTTP request timeout in seconds.
/// 30s allows for slow endpoint cold starts while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// The remote side of a sync.
///
/// Futures are `Send` so the coordinator can hand the last-sync notice to a
/// detached task.
pub trait Remote: Clone + Send + Sync + 'static {
    /// Submit one batch and return the endpoint's parsed reply.
    fn submit_batch(
        &self,
        endpoint: &str,
        batch: &SyncBatch,
    ) -> impl Future<Output = Result<RemoteReply, TransportError>> + Send;

    /// Tell the endpoint this device just synced. The reply body is ignored.
    fn notify_last_sync(
        &self,
        endpoint: &str,
        notice: &LastSyncNotice,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// `Remote` over HTTPS POST with JSON bodies.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
}

impl HttpRemote {
    pub fn new() -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client })
    }

    /// Use a preconfigured client (proxy, TLS or timeout settings).
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Interpret an HTTP status and body as an endpoint reply.
    ///
    /// Non-2xx statuses and bodies that are not `{status, message?}` JSON are
    /// transport failures. A parsed body is returned as-is; whether its
    /// `status` means success is the caller's decision.
    pub fn interpret_reply(status: StatusCode, body: &str) -> Result<RemoteReply, TransportError> {
        if !status.is_success() {
            return Err(TransportError::from_status(status, body));
        }
        serde_json::from_str(body).map_err(|e| TransportError::invalid_response(body, e))
    }
}

impl Remote for HttpRemote {
    fn submit_batch(
        &self,
        endpoint: &str,
        batch: &SyncBatch,
    ) -> impl Future<Output = Result<RemoteReply, TransportError>> + Send {
        debug!(endpoint, records = batch.len(), "Submitting batch");
        let request = self
            .client
            .post(endpoint)
            .header(header::ACCEPT, "application/json")
            .json(batch);

        async move {
            let response = request.send().await?;
            let status = response.status();
            let body = response.text().await?;
            Self::interpret_reply(status, &body)
        }
    }

    fn notify_last_sync(
        &self,
        endpoint: &str,
        notice: &LastSyncNotice,
    ) -> impl Future<Output = Result<(), TransportError>> + Send {
        let request = self.client.post(endpoint).json(notice);

        async move {
            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(TransportError::from_status(status, &body));
            }
            Ok(())
        }
    }
}
