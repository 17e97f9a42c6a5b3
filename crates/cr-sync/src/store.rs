use crate::config::ClientConfig;
use crate::types::{DomainRecord, SyncError, SyncResult};
use cr_certs::{ArtifactType, is_valid_domain};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

const CONFIG_FILE: &str = "config.json";
const STATE_FILE: &str = "state.json";

/// On-disk layout of the client:
///
/// ```text
/// <dir>/config.json
/// <dir>/<domain>/state.json
/// <dir>/<domain>/certificate.crt, certificate-chain.crt, certificate.key
/// ```
///
/// Every file is replaced atomically (temporary file, then rename).
pub struct DomainStore {
    base_path: PathBuf,
}

impl DomainStore {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.base_path.join(CONFIG_FILE)
    }

    pub fn domain_dir(&self, domain: &str) -> SyncResult<PathBuf> {
        if !is_valid_domain(domain) {
            return Err(SyncError::InvalidDomain(domain.to_string()));
        }
        Ok(self.base_path.join(domain))
    }

    pub fn state_path(&self, domain: &str) -> SyncResult<PathBuf> {
        Ok(self.domain_dir(domain)?.join(STATE_FILE))
    }

    pub fn artifact_path(&self, domain: &str, kind: ArtifactType) -> SyncResult<PathBuf> {
        Ok(self.domain_dir(domain)?.join(kind.filename()))
    }

    pub async fn config_exists(&self) -> bool {
        fs::try_exists(self.config_path()).await.unwrap_or(false)
    }

    pub async fn load_config(&self) -> SyncResult<ClientConfig> {
        let path = self.config_path();
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SyncError::Config(format!(
                    "no client config at {}",
                    path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&content)?)
    }

    pub async fn save_config(&self, config: &ClientConfig) -> SyncResult<()> {
        fs::create_dir_all(&self.base_path).await?;
        let content = serde_json::to_vec_pretty(config)?;
        write_atomic(&self.config_path(), &content, 0o600).await?;
        Ok(())
    }

    /// Load a domain's record; `None` if it was never synced.
    pub async fn load_record(&self, domain: &str) -> SyncResult<Option<DomainRecord>> {
        let path = self.state_path(domain)?;
        match fs::read(&path).await {
            Ok(content) => Ok(Some(serde_json::from_slice(&content)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save_record(&self, record: &DomainRecord) -> SyncResult<()> {
        let dir = self.domain_dir(&record.domain)?;
        fs::create_dir_all(&dir).await?;
        let content = serde_json::to_vec_pretty(record)?;
        write_atomic(&dir.join(STATE_FILE), &content, 0o644).await?;
        Ok(())
    }

    /// Replace a domain's artifacts as one unit.
    ///
    /// Every artifact is staged in a temporary file and the current files
    /// are copied aside before the first rename. If any step fails, staged
    /// files are discarded and already renamed artifacts are restored, so
    /// the directory never holds a mix of two serials.
    pub async fn write_artifacts(
        &self,
        domain: &str,
        artifacts: &[(ArtifactType, Vec<u8>)],
    ) -> SyncResult<()> {
        let dir = self.domain_dir(domain)?;
        fs::create_dir_all(&dir).await?;

        let mut staged = Vec::with_capacity(artifacts.len());
        for (kind, data) in artifacts {
            let target = dir.join(kind.filename());
            let mode = if kind.is_secret() { 0o600 } else { 0o644 };
            match write_temp(&target, data, mode).await {
                Ok(temp) => staged.push(Staged {
                    temp,
                    target,
                    backup: None,
                }),
                Err(e) => {
                    discard(&staged).await;
                    return Err(e.into());
                }
            }
        }

        for i in 0..staged.len() {
            let result = back_up(&staged[i].target).await;
            match result {
                Ok(backup) => staged[i].backup = backup,
                Err(e) => {
                    discard(&staged).await;
                    return Err(e.into());
                }
            }
        }

        for i in 0..staged.len() {
            if let Err(e) = fs::rename(&staged[i].temp, &staged[i].target).await {
                warn!(domain, "Artifact commit failed, restoring previous files: {}", e);
                restore(&staged[..i]).await;
                discard(&staged).await;
                return Err(e.into());
            }
        }

        for entry in &staged {
            if let Some(backup) = &entry.backup {
                let _ = fs::remove_file(backup).await;
            }
        }
        Ok(())
    }

    pub async fn read_artifact(&self, domain: &str, kind: ArtifactType) -> SyncResult<Option<Vec<u8>>> {
        match fs::read(self.artifact_path(domain, kind)?).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a domain's state and artifact cache
    pub async fn remove_domain(&self, domain: &str) -> SyncResult<()> {
        let dir = self.domain_dir(domain)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// An artifact written to its temporary file but not yet renamed
struct Staged {
    temp: PathBuf,
    target: PathBuf,
    backup: Option<PathBuf>,
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}", file_name, suffix))
}

/// Write `data` to a sibling temporary file and flush it to disk.
async fn write_temp(path: &Path, data: &[u8], mode: u32) -> std::io::Result<PathBuf> {
    let temp_path = sibling(path, "tmp");

    // A stale temp file from a crash may carry the wrong mode
    let _ = fs::remove_file(&temp_path).await;

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(mode);
    #[cfg(not(unix))]
    let _ = mode;

    let mut file = options.open(&temp_path).await?;
    let result = async {
        file.write_all(data).await?;
        file.sync_all().await
    }
    .await;
    drop(file);

    if let Err(e) = result {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e);
    }
    Ok(temp_path)
}

/// Replace `path` in one rename. Readers see either the old or the new
/// content, never a mix.
async fn write_atomic(path: &Path, data: &[u8], mode: u32) -> std::io::Result<()> {
    let temp_path = write_temp(path, data, mode).await?;
    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e);
    }
    Ok(())
}

/// Copy the current file aside; `None` if there is nothing to keep.
async fn back_up(target: &Path) -> std::io::Result<Option<PathBuf>> {
    match fs::symlink_metadata(target).await {
        Ok(meta) if meta.is_file() => {
            let backup = sibling(target, "bak");
            fs::copy(target, &backup).await?;
            Ok(Some(backup))
        }
        Ok(_) => Err(std::io::Error::other(format!(
            "{} is not a regular file",
            target.display()
        ))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Undo renames that already happened
async fn restore(committed: &[Staged]) {
    for entry in committed.iter().rev() {
        let result = match &entry.backup {
            Some(backup) => fs::rename(backup, &entry.target).await,
            None => fs::remove_file(&entry.target).await,
        };
        if let Err(e) = result {
            warn!("Failed to restore {}: {}", entry.target.display(), e);
        }
    }
}

async fn discard(staged: &[Staged]) {
    for entry in staged {
        let _ = fs::remove_file(&entry.temp).await;
        if let Some(backup) = &entry.backup {
            let _ = fs::remove_file(backup).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cr_certs::RenewalState;

    #[tokio::test]
    async fn test_record_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = DomainStore::new(dir.path());

        assert!(store.load_record("example.com").await.unwrap().is_none());

        let record = DomainRecord {
            domain: "example.com".to_string(),
            last_known_serial: "ABC".to_string(),
            last_state: Some(RenewalState {
                created: chrono::DateTime::from_timestamp(1, 0).unwrap(),
                next_renewal: chrono::DateTime::from_timestamp(2, 0).unwrap(),
                serial: "ABC".to_string(),
            }),
        };
        store.save_record(&record).await.unwrap();
        assert_eq!(store.load_record("example.com").await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_write_artifact_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = DomainStore::new(dir.path());

        for data in ["one", "two"] {
            store
                .write_artifacts(
                    "example.com",
                    &[(ArtifactType::Certificate, data.as_bytes().to_vec())],
                )
                .await
                .unwrap();
        }

        let data = store
            .read_artifact("example.com", ArtifactType::Certificate)
            .await
            .unwrap();
        assert_eq!(data.as_deref(), Some(&b"two"[..]));

        let names: Vec<String> = std::fs::read_dir(dir.path().join("example.com"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["certificate.crt".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_private_key_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = DomainStore::new(dir.path());
        store
            .write_artifacts("example.com", &[(ArtifactType::Key, b"secret".to_vec())])
            .await
            .unwrap();
        let meta = std::fs::metadata(dir.path().join("example.com/certificate.key")).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_invalid_domain_never_touches_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = DomainStore::new(dir.path().join("client"));
        let err = store
            .write_artifacts("../escape", &[(ArtifactType::Certificate, b"x".to_vec())])
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidDomain(_)));
        assert!(!dir.path().join("escape").exists());
        assert!(matches!(
            store.remove_domain("..").await,
            Err(SyncError::InvalidDomain(_))
        ));
    }

    #[tokio::test]
    async fn test_config_missing_then_saved() {
        let dir = tempfile::tempdir().unwrap();
        let store = DomainStore::new(dir.path().join("nested"));
        assert!(!store.config_exists().await);
        assert!(matches!(store.load_config().await, Err(SyncError::Config(_))));

        store.save_config(&ClientConfig::new("http://x")).await.unwrap();
        assert!(store.config_exists().await);
        assert_eq!(store.load_config().await.unwrap().server, "http://x");
    }

    #[tokio::test]
    async fn test_remove_domain() {
        let dir = tempfile::tempdir().unwrap();
        let store = DomainStore::new(dir.path());
        store.save_record(&DomainRecord::new("example.com")).await.unwrap();
        store.remove_domain("example.com").await.unwrap();
        assert!(!dir.path().join("example.com").exists());
        // Removing twice is fine
        store.remove_domain("example.com").await.unwrap();
    }

    fn serial_set(serial: &str) -> Vec<(ArtifactType, Vec<u8>)> {
        [
            ArtifactType::CertificateChain,
            ArtifactType::Certificate,
            ArtifactType::Key,
        ]
        .into_iter()
        .map(|kind| (kind, format!("{} {}", kind, serial).into_bytes()))
        .collect()
    }

    fn dir_names(path: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(path)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_failed_staging_keeps_previous_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let store = DomainStore::new(dir.path());
        store.write_artifacts("example.com", &serial_set("A")).await.unwrap();

        // Something in the way of the second artifact's temporary file
        let blocker = dir.path().join("example.com/.certificate.crt.tmp");
        std::fs::create_dir_all(blocker.join("inner")).unwrap();

        let err = store
            .write_artifacts("example.com", &serial_set("B"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Persist(_)));

        for kind in [ArtifactType::CertificateChain, ArtifactType::Certificate, ArtifactType::Key] {
            let data = store.read_artifact("example.com", kind).await.unwrap().unwrap();
            assert_eq!(data, format!("{} A", kind).into_bytes());
        }

        std::fs::remove_dir_all(&blocker).unwrap();
        assert_eq!(
            dir_names(&dir.path().join("example.com")),
            vec!["certificate-chain.crt", "certificate.crt", "certificate.key"]
        );
    }

    #[tokio::test]
    async fn test_failed_commit_keeps_previous_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let store = DomainStore::new(dir.path());
        store
            .write_artifacts("example.com", &serial_set("A")[..1])
            .await
            .unwrap();

        // The certificate's place is taken by a directory
        let cert = dir.path().join("example.com/certificate.crt");
        std::fs::create_dir_all(cert.join("inner")).unwrap();

        let err = store
            .write_artifacts("example.com", &serial_set("B"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Persist(_)));

        let chain = store
            .read_artifact("example.com", ArtifactType::CertificateChain)
            .await
            .unwrap();
        assert_eq!(chain, Some(b"certificate-chain A".to_vec()));
        assert!(
            store
                .read_artifact("example.com", ArtifactType::Key)
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(
            dir_names(&dir.path().join("example.com")),
            vec!["certificate-chain.crt", "certificate.crt"]
        );
    }
}
