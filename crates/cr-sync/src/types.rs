use cr_certs::RenewalState;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Local bookkeeping for one tracked domain (`<client_dir>/<domain>/state.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRecord {
    pub domain: String,
    /// Serial of the artifacts currently on disk. Empty until the first
    /// successful pull.
    #[serde(default)]
    pub last_known_serial: String,
    #[serde(default)]
    pub last_state: Option<RenewalState>,
}

impl DomainRecord {
    pub fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            last_known_serial: String::new(),
            last_state: None,
        }
    }
}

/// Result of one sync cycle for one domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Serial changed (or forced): artifacts re-pulled
    Updated {
        previous: Option<String>,
        serial: String,
    },
    /// Same serial, but the renewal timestamps moved
    StateRefreshed,
    /// Nothing written
    Unchanged,
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("network failure: {0}")]
    Network(String),

    #[error("server returned {status}: {message}")]
    Server { status: u16, message: String },

    #[error("malformed renewal state: {0}")]
    Malformed(String),

    #[error("persist failure: {0}")]
    Persist(#[from] std::io::Error),

    #[error("corrupt local state: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("invalid domain: {0}")]
    InvalidDomain(String),

    #[error("domain not tracked: {0}")]
    UnknownDomain(String),

    #[error("domain already tracked: {0}")]
    DomainExists(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Whether a later attempt may succeed without operator action
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
