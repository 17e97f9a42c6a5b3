use crate::types::{CertError, CertResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of certificate artifact that can be distributed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactType {
    /// Private key (PEM)
    Key,
    /// Leaf certificate (PEM)
    Certificate,
    /// Leaf certificate followed by the issuer chain (PEM)
    CertificateChain,
    /// Key and leaf certificate bundle
    Pkcs12,
    /// Key and full chain bundle
    Pkcs12Chain,
}

/// Static description of an artifact type, shared by server and client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactDescriptor {
    pub kind: ArtifactType,
    /// Path segment used in `/cert/{domain}/{tag}`
    pub tag: &'static str,
    /// Name used in `Content-Disposition` and on the client's disk
    pub filename: &'static str,
    pub content_type: &'static str,
}

const PEM: &str = "application/x-pem-file";
const PKCS12: &str = "application/x-pkcs12";

/// Indexed by `ArtifactType as usize`.
pub const CATALOG: [ArtifactDescriptor; 5] = [
    ArtifactDescriptor {
        kind: ArtifactType::Key,
        tag: "key",
        filename: "certificate.key",
        content_type: PEM,
    },
    ArtifactDescriptor {
        kind: ArtifactType::Certificate,
        tag: "certificate",
        filename: "certificate.crt",
        content_type: PEM,
    },
    ArtifactDescriptor {
        kind: ArtifactType::CertificateChain,
        tag: "certificate-chain",
        filename: "certificate-chain.crt",
        content_type: PEM,
    },
    ArtifactDescriptor {
        kind: ArtifactType::Pkcs12,
        tag: "pkcs12",
        filename: "certificate.pfx",
        content_type: PKCS12,
    },
    ArtifactDescriptor {
        kind: ArtifactType::Pkcs12Chain,
        tag: "pkcs12-chain",
        filename: "certificate-chain.pfx",
        content_type: PKCS12,
    },
];

impl ArtifactType {
    pub const ALL: [ArtifactType; 5] = [
        Self::Key,
        Self::Certificate,
        Self::CertificateChain,
        Self::Pkcs12,
        Self::Pkcs12Chain,
    ];

    pub fn descriptor(self) -> &'static ArtifactDescriptor {
        &CATALOG[self as usize]
    }

    pub fn tag(self) -> &'static str {
        self.descriptor().tag
    }

    pub fn filename(self) -> &'static str {
        self.descriptor().filename
    }

    pub fn content_type(self) -> &'static str {
        self.descriptor().content_type
    }

    /// Whether the artifact contains private key material
    pub fn is_secret(self) -> bool {
        matches!(self, Self::Key | Self::Pkcs12 | Self::Pkcs12Chain)
    }
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for ArtifactType {
    type Err = CertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        lookup(s).map(|d| d.kind)
    }
}

/// Resolve an artifact tag to its descriptor.
pub fn lookup(tag: &str) -> CertResult<&'static ArtifactDescriptor> {
    CATALOG
        .iter()
        .find(|d| d.tag == tag)
        .ok_or_else(|| CertError::UnknownArtifactType(tag.to_string()))
}
