use cr_certs::ApiKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Client configuration stored as `<client_dir>/config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the distribution server, e.g. "https://certs.lan:8080"
    pub server: String,
    /// Upper bound for each HTTP request
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub domains: BTreeMap<String, DomainSettings>,
}

fn default_timeout() -> u64 {
    30
}

/// Per-domain client settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainSettings {
    /// Key for the private key download. Without one only the
    /// certificate and chain are pulled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<ApiKey>,
    /// Command (program and arguments) run after new artifacts are written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reload_command: Option<Vec<String>>,
}

impl ClientConfig {
    pub fn new(server: &str) -> Self {
        Self {
            server: server.trim_end_matches('/').to_string(),
            timeout_secs: default_timeout(),
            domains: BTreeMap::new(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}
