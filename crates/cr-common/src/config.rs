use crate::error::AppError;
use cr_certs::{AccessPolicy, ApiKey, ArtifactType, is_valid_domain, renewal};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/certrelay/config.json";

/// Distribution server configuration, loaded from a JSON file and
/// overridable through environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Instance identifier reported by `/ping`
    pub id: Uuid,
    /// acme.sh certificate home (one subdirectory per domain)
    pub cert_home: PathBuf,
    /// Listen address, e.g. "0.0.0.0:8080"
    pub listen: String,
    /// Key accepted for any domain without its own entry in `domain_keys`
    pub default_key: Option<ApiKey>,
    /// Per-domain keys
    pub domain_keys: HashMap<String, ApiKey>,
    /// Artifact types served without a key. `key` is ignored here.
    pub public_artifacts: Vec<ArtifactType>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            cert_home: PathBuf::from("/var/lib/certrelay/acme"),
            listen: "0.0.0.0:8080".to_string(),
            default_key: None,
            domain_keys: HashMap::new(),
            public_artifacts: vec![ArtifactType::Certificate, ArtifactType::CertificateChain],
        }
    }
}

impl ServerConfig {
    /// Load `.env`, then the JSON config, then environment overrides.
    ///
    /// An explicitly requested file must exist; the default path may be
    /// absent, in which case defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let dotenv = load_dotenv_candidates();
        let lookup = |name: &str| std::env::var(name).ok().or_else(|| dotenv.get(name).cloned());

        let env_path = lookup("CERTRELAY_CONFIG").map(PathBuf::from);
        let explicit = path.map(Path::to_path_buf).or(env_path);

        let mut config = match &explicit {
            Some(p) => Self::from_file(p)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::from_file(default)?
                } else {
                    info!("No config file at {}, using defaults", default.display());
                    Self::default()
                }
            }
        };

        config.apply_env(lookup);
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Overrides from the process environment or `.env`
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("CERTRELAY_LISTEN") {
            self.listen = v;
        }
        if let Some(v) = lookup("CERTRELAY_CERT_HOME") {
            self.cert_home = PathBuf::from(v);
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        for domain in self.domain_keys.keys() {
            if !is_valid_domain(domain) {
                return Err(AppError::Config(format!(
                    "Invalid domain in domain_keys: {}",
                    domain
                )));
            }
        }
        if self.listen.trim().is_empty() {
            return Err(AppError::Config("listen address is empty".to_string()));
        }
        Ok(())
    }

    pub fn access_policy(&self) -> AccessPolicy {
        AccessPolicy::new(
            self.default_key,
            self.domain_keys.clone(),
            self.public_artifacts.iter().copied(),
        )
    }
}

/// First `.env` found. Its values only fill in variables the process
/// environment does not set; the environment itself is never modified.
fn load_dotenv_candidates() -> HashMap<String, String> {
    ["/etc/certrelay/.env", ".env"]
        .iter()
        .map(Path::new)
        .find(|candidate| candidate.exists())
        .map(load_dotenv)
        .unwrap_or_default()
}

fn load_dotenv(path: &Path) -> HashMap<String, String> {
    match std::fs::read_to_string(path) {
        Ok(content) => renewal::assignments(&content)
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        Err(e) => {
            warn!("Failed to read {}: {}", path.display(), e);
            HashMap::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let key = "ab".repeat(32);
        let json = format!(
            r#"{{
                "id": "6f1c9a52-1d3b-4c1e-9a8e-0a1b2c3d4e5f",
                "cert_home": "/srv/acme",
                "listen": "127.0.0.1:9000",
                "default_key": "{key}",
                "domain_keys": {{ "example.com": "{key}" }},
                "public_artifacts": ["certificate"]
            }}"#
        );
        let config: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.cert_home, PathBuf::from("/srv/acme"));
        assert_eq!(config.listen, "127.0.0.1:9000");
        assert!(config.default_key.is_some());
        assert_eq!(config.public_artifacts, vec![ArtifactType::Certificate]);
        assert!(config.validate().is_ok());

        let policy = config.access_policy();
        assert!(!policy.requires_key(ArtifactType::Certificate));
        assert!(policy.requires_key(ArtifactType::CertificateChain));
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: ServerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.listen, "0.0.0.0:8080");
        assert!(config.default_key.is_none());
        assert_eq!(config.public_artifacts.len(), 2);
    }

    #[test]
    fn test_bad_key_rejected() {
        let json = r#"{ "default_key": "not-hex" }"#;
        assert!(serde_json::from_str::<ServerConfig>(json).is_err());
    }

    #[test]
    fn test_invalid_domain_key_rejected() {
        let mut config = ServerConfig::default();
        config
            .domain_keys
            .insert("../etc".to_string(), ApiKey::from_bytes([1; 32]));
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = ServerConfig::from_file(&dir.path().join("nope.json"));
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "cert_home": "/tmp/acme" }"#).unwrap();
        let config = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.cert_home, PathBuf::from("/tmp/acme"));
    }

    #[test]
    fn test_dotenv_fills_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(
            &path,
            "# server\nCERTRELAY_LISTEN='127.0.0.1:7000'\nCERTRELAY_CERT_HOME=\"/srv/acme\"\n",
        )
        .unwrap();
        let dotenv = load_dotenv(&path);

        let mut config = ServerConfig::default();
        config.apply_env(|name| dotenv.get(name).cloned());
        assert_eq!(config.listen, "127.0.0.1:7000");
        assert_eq!(config.cert_home, PathBuf::from("/srv/acme"));
    }
}
