use crate::apikey::ApiKey;
use crate::catalog::ArtifactType;
use crate::renewal;
use crate::types::{Artifact, CertError, CertResult, RenewalState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Storage backend the distribution service reads from.
///
/// Implementations must never return a partially resolved result: either
/// the full artifact (or renewal state) or an error.
#[async_trait]
pub trait CertBackend: Send + Sync {
    /// Fetch one artifact for a domain. `key` is the credential presented by
    /// the caller, if any; protected artifact types require it to match.
    async fn resolve_artifact(
        &self,
        domain: &str,
        kind: ArtifactType,
        key: Option<&ApiKey>,
    ) -> CertResult<Artifact>;

    /// Read the issuer's current renewal bookkeeping for a domain.
    async fn resolve_renewal_state(&self, domain: &str) -> CertResult<RenewalState>;
}

/// Who may download what.
///
/// The private key always requires the domain's secret. Other artifact
/// types are served without a key only if listed in `public`.
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    default_key: Option<ApiKey>,
    domain_keys: HashMap<String, ApiKey>,
    public: HashSet<ArtifactType>,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self {
            default_key: None,
            domain_keys: HashMap::new(),
            public: [ArtifactType::Certificate, ArtifactType::CertificateChain]
                .into_iter()
                .collect(),
        }
    }
}

impl AccessPolicy {
    pub fn new(
        default_key: Option<ApiKey>,
        domain_keys: HashMap<String, ApiKey>,
        public: impl IntoIterator<Item = ArtifactType>,
    ) -> Self {
        let public = public
            .into_iter()
            .filter(|kind| *kind != ArtifactType::Key)
            .collect();
        Self {
            default_key,
            domain_keys,
            public,
        }
    }

    pub fn with_default_key(mut self, key: ApiKey) -> Self {
        self.default_key = Some(key);
        self
    }

    pub fn with_domain_key(mut self, domain: &str, key: ApiKey) -> Self {
        self.domain_keys.insert(domain.to_string(), key);
        self
    }

    pub fn requires_key(&self, kind: ArtifactType) -> bool {
        kind == ArtifactType::Key || !self.public.contains(&kind)
    }

    fn expected_key(&self, domain: &str) -> Option<&ApiKey> {
        self.domain_keys.get(domain).or(self.default_key.as_ref())
    }

    /// Check the presented credential. Does not look at the filesystem, so
    /// the outcome says nothing about whether the domain exists.
    pub fn authorize(
        &self,
        domain: &str,
        kind: ArtifactType,
        presented: Option<&ApiKey>,
    ) -> CertResult<()> {
        if !self.requires_key(kind) {
            return Ok(());
        }
        match (self.expected_key(domain), presented) {
            (Some(expected), Some(presented)) if expected.ct_eq(presented) => Ok(()),
            _ => Err(CertError::Unauthorized),
        }
    }
}

/// Repository over an acme.sh certificate home: one directory per domain.
pub struct FsRepository {
    root: PathBuf,
    policy: AccessPolicy,
}

impl FsRepository {
    pub fn new<P: AsRef<Path>>(root: P, policy: AccessPolicy) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            policy,
        }
    }

    /// Name of the file acme.sh writes for an artifact type
    pub fn source_filename(domain: &str, kind: ArtifactType) -> String {
        match kind {
            ArtifactType::Key => format!("{}.key", domain),
            ArtifactType::Certificate => format!("{}.cer", domain),
            ArtifactType::CertificateChain => "fullchain.cer".to_string(),
            ArtifactType::Pkcs12 => format!("{}.pfx", domain),
            ArtifactType::Pkcs12Chain => "fullchain.pfx".to_string(),
        }
    }

    pub fn conf_filename(domain: &str) -> String {
        format!("{}.conf", domain)
    }

    /// Resolve the directory of a known domain. The domain is validated
    /// before it is joined onto the root.
    async fn domain_dir(&self, domain: &str) -> CertResult<PathBuf> {
        if !is_valid_domain(domain) {
            debug!(domain, "Rejected invalid domain name");
            return Err(CertError::DomainNotFound(domain.to_string()));
        }

        let dir = self.root.join(domain);
        let conf = dir.join(Self::conf_filename(domain));
        match fs::metadata(&conf).await {
            Ok(meta) if meta.is_file() => Ok(dir),
            Ok(_) => Err(CertError::DomainNotFound(domain.to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(CertError::DomainNotFound(domain.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read_state(&self, dir: &Path, domain: &str) -> CertResult<RenewalState> {
        let content = match fs::read(dir.join(Self::conf_filename(domain))).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CertError::DomainNotFound(domain.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        renewal::parse(&content)
    }
}

#[async_trait]
impl CertBackend for FsRepository {
    async fn resolve_artifact(
        &self,
        domain: &str,
        kind: ArtifactType,
        key: Option<&ApiKey>,
    ) -> CertResult<Artifact> {
        self.policy.authorize(domain, kind, key)?;

        let dir = self.domain_dir(domain).await?;
        // No artifacts for a domain whose bookkeeping cannot be read
        if let Err(e) = self.read_state(&dir, domain).await {
            return Err(match e {
                CertError::MalformedRenewalState(reason) => {
                    debug!(domain, %reason, "Refusing artifact for malformed domain");
                    CertError::DomainNotFound(domain.to_string())
                }
                other => other,
            });
        }

        let path = dir.join(Self::source_filename(domain, kind));
        let not_found = || CertError::ArtifactNotFound(format!("{}/{}", domain, kind));

        let meta = match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return Err(not_found()),
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(e.into()),
        };

        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(e.into()),
        };

        let modified = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        Ok(Artifact {
            size: data.len() as u64,
            data,
            modified,
        })
    }

    async fn resolve_renewal_state(&self, domain: &str) -> CertResult<RenewalState> {
        let dir = self.domain_dir(domain).await?;
        self.read_state(&dir, domain).await
    }
}

/// Accepts DNS names (optionally with a leading `*.`) made of ASCII
/// letters, digits and hyphens. Anything that could escape the root
/// directory fails here.
pub fn is_valid_domain(domain: &str) -> bool {
    if domain.is_empty() || domain.len() > 253 {
        return false;
    }

    if let Some(rest) = domain.strip_prefix("*.") {
        if rest.is_empty() {
            return false;
        }
        return is_valid_domain_part(rest);
    }

    is_valid_domain_part(domain)
}

fn is_valid_domain_part(domain: &str) -> bool {
    domain.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            && !label.starts_with('-')
            && !label.ends_with('-')
    })
}
