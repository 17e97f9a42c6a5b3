//! certrelay sync client
//!
//! Tracks a set of domains on a consuming host, polls the distribution
//! server for each domain's renewal state, and re-pulls the certificate
//! artifacts whenever the issuer's serial changes.

pub mod config;
pub mod engine;
pub mod source;
pub mod store;
pub mod types;

pub use config::{ClientConfig, DomainSettings};
pub use engine::{DomainReport, SyncEngine};
pub use source::{CertSource, HttpCertSource};
pub use store::DomainStore;
pub use types::{DomainRecord, SyncError, SyncOutcome, SyncResult};
