use crate::types::{SyncError, SyncResult};
use async_trait::async_trait;
use cr_certs::{ApiKey, ArtifactType, RenewalState};
use std::time::Duration;
use tracing::debug;

/// Where the sync engine gets renewal state and artifacts from.
#[async_trait]
pub trait CertSource: Send + Sync {
    async fn fetch_state(&self, domain: &str) -> SyncResult<RenewalState>;

    async fn fetch_artifact(
        &self,
        domain: &str,
        kind: ArtifactType,
        key: Option<&ApiKey>,
    ) -> SyncResult<Vec<u8>>;
}

/// Distribution server reached over HTTP(S)
pub struct HttpCertSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCertSource {
    /// Every request, body included, must finish within `timeout`.
    pub fn new(base_url: &str, timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(concat!("certrelay-cli/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get(&self, url: &str, key: Option<&ApiKey>) -> SyncResult<reqwest::Response> {
        let mut request = self.client.get(url);
        if let Some(key) = key {
            request = request.bearer_auth(key.encode());
        }

        let response = request.send().await.map_err(network_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        // Error bodies are `{"error": "..."}`; fall back to the status text
        let message = response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string());

        Err(SyncError::Server {
            status: status.as_u16(),
            message,
        })
    }
}

fn network_error(e: reqwest::Error) -> SyncError {
    if e.is_timeout() {
        SyncError::Network(format!("request timed out: {e}"))
    } else {
        SyncError::Network(e.to_string())
    }
}

#[async_trait]
impl CertSource for HttpCertSource {
    async fn fetch_state(&self, domain: &str) -> SyncResult<RenewalState> {
        let url = format!("{}/cert/{}", self.base_url, domain);
        debug!(url, "Fetching renewal state");
        let body = self.get(&url, None).await?.bytes().await.map_err(network_error)?;
        let state: RenewalState =
            serde_json::from_slice(&body).map_err(|e| SyncError::Malformed(e.to_string()))?;
        if state.serial.is_empty() {
            return Err(SyncError::Malformed("empty serial".to_string()));
        }
        Ok(state)
    }

    async fn fetch_artifact(
        &self,
        domain: &str,
        kind: ArtifactType,
        key: Option<&ApiKey>,
    ) -> SyncResult<Vec<u8>> {
        let url = format!("{}/cert/{}/{}", self.base_url, domain, kind.tag());
        debug!(url, "Fetching artifact");
        let body = self.get(&url, key).await?.bytes().await.map_err(network_error)?;
        Ok(body.to_vec())
    }
}
