//! Certificate repository and access control for certrelay
//!
//! Maps `(domain, artifact type)` requests onto an acme.sh certificate home,
//! gates private key material behind a per-domain API key, and exposes the
//! issuer's renewal bookkeeping so clients can tell when to re-fetch.

pub mod apikey;
pub mod catalog;
pub mod renewal;
pub mod repository;
pub mod types;

pub use apikey::ApiKey;
pub use catalog::{ArtifactDescriptor, ArtifactType};
pub use repository::{AccessPolicy, CertBackend, FsRepository, is_valid_domain};
pub use types::{Artifact, CertError, CertResult, RenewalState};
