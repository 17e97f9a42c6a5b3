use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Renewal bookkeeping for one domain, as reported by the issuing ACME client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenewalState {
    /// When the current certificate was issued
    #[serde(rename = "StartDate")]
    pub created: DateTime<Utc>,
    /// When the issuer plans to renew it
    #[serde(rename = "NextRenewTime")]
    pub next_renewal: DateTime<Utc>,
    /// Certificate serial, taken from the issuer's certificate link
    #[serde(rename = "Serial")]
    pub serial: String,
}

impl RenewalState {
    /// Check if the issuer's planned renewal time has passed
    pub fn renewal_due(&self) -> bool {
        self.next_renewal <= Utc::now()
    }
}

/// An artifact read from the repository together with its file metadata.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub data: Vec<u8>,
    pub modified: DateTime<Utc>,
    pub size: u64,
}

#[derive(Error, Debug)]
pub enum CertError {
    #[error("invalid API key encoding")]
    InvalidKeyEncoding,

    #[error("unauthorized")]
    Unauthorized,

    #[error("domain not found: {0}")]
    DomainNotFound(String),

    #[error("artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("unknown artifact type: {0}")]
    UnknownArtifactType(String),

    #[error("malformed renewal state: {0}")]
    MalformedRenewalState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CertResult<T> = Result<T, CertError>;
