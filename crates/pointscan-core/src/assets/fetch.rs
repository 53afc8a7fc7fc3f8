use std::future::Future;
use std::time::Duration;

use reqwest::{Client, Url};

use crate::error::{Error, Result};
use crate::sync::TransportError;

/// Asset requests are small; fail quickly when the network is gone.
const FETCH_TIMEOUT_SECS: u64 = 15;

/// Source of asset bytes when the cache cannot answer.
pub trait AssetFetcher: Send + Sync {
    fn fetch(&self, path: &str) -> impl Future<Output = std::result::Result<Vec<u8>, TransportError>> + Send;
}

/// Fetches assets over HTTP relative to the application's origin.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    origin: Url,
}

impl HttpFetcher {
    pub fn new(origin: &str) -> Result<Self> {
        let mut origin = Url::parse(origin)
            .map_err(|e| Error::config(format!("asset origin is not a URL: {e}")))?;
        // Keep relative joins inside the app's base path
        if !origin.path().ends_with('/') {
            let path = format!("{}/", origin.path());
            origin.set_path(&path);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, origin })
    }

    pub fn url_for(&self, path: &str) -> std::result::Result<Url, TransportError> {
        self.origin
            .join(path.trim_start_matches('/'))
            .map_err(|e| TransportError::InvalidResponse(format!("bad asset path {path:?}: {e}")))
    }
}

impl AssetFetcher for HttpFetcher {
    fn fetch(&self, path: &str) -> impl Future<Output = std::result::Result<Vec<u8>, TransportError>> + Send {
        let request = self.url_for(path).map(|url| self.client.get(url));

        async move {
            let response = request?.send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(TransportError::from_status(status, &body));
            }
            Ok(response.bytes().await?.to_vec())
        }
    }
}
