use crate::config::{ClientConfig, DomainSettings};
use crate::source::CertSource;
use crate::store::DomainStore;
use crate::types::{DomainRecord, SyncError, SyncOutcome, SyncResult};
use cr_certs::{ArtifactType, is_valid_domain};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

const RELOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Outcome of syncing one domain as part of [`SyncEngine::sync_all`]
#[derive(Debug)]
pub struct DomainReport {
    pub domain: String,
    pub result: SyncResult<SyncOutcome>,
}

/// Drives the per-domain sync cycle.
///
/// Domains sync independently and may run in parallel. For a single
/// domain the fetch, compare and persist steps run under a per-domain lock
/// so a state record is never written next to another cycle's artifacts.
pub struct SyncEngine<S> {
    store: Arc<DomainStore>,
    source: Arc<S>,
    domain_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
    config_lock: Arc<Mutex<()>>,
}

impl<S> Clone for SyncEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            source: Arc::clone(&self.source),
            domain_locks: Arc::clone(&self.domain_locks),
            config_lock: Arc::clone(&self.config_lock),
        }
    }
}

impl<S: CertSource + 'static> SyncEngine<S> {
    pub fn new(store: DomainStore, source: S) -> Self {
        Self {
            store: Arc::new(store),
            source: Arc::new(source),
            domain_locks: Arc::new(Mutex::new(HashMap::new())),
            config_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn store(&self) -> &DomainStore {
        &self.store
    }

    async fn domain_lock(&self, domain: &str) -> Arc<Mutex<()>> {
        let mut locks = self.domain_locks.lock().await;
        Arc::clone(locks.entry(domain.to_string()).or_default())
    }

    /// Run one sync cycle for a domain.
    ///
    /// Artifacts are pulled when the server's serial differs from the
    /// last known one, or when `force` is set. All artifacts are fetched
    /// before anything is written; the state record is written last. On any
    /// error the previous local state stays in place.
    pub async fn sync_domain(
        &self,
        domain: &str,
        settings: &DomainSettings,
        force: bool,
    ) -> SyncResult<SyncOutcome> {
        if !is_valid_domain(domain) {
            return Err(SyncError::InvalidDomain(domain.to_string()));
        }

        let lock = self.domain_lock(domain).await;
        let _guard = lock.lock().await;

        let record = self.store.load_record(domain).await?;
        let last_serial = record
            .as_ref()
            .map(|r| r.last_known_serial.as_str())
            .unwrap_or("");

        let state = self.source.fetch_state(domain).await?;

        if force || state.serial != last_serial {
            let mut kinds = vec![ArtifactType::CertificateChain, ArtifactType::Certificate];
            if settings.api_key.is_some() {
                kinds.push(ArtifactType::Key);
            }

            let mut fetched = Vec::with_capacity(kinds.len());
            for kind in kinds {
                let data = self
                    .source
                    .fetch_artifact(domain, kind, settings.api_key.as_ref())
                    .await?;
                fetched.push((kind, data));
            }

            self.store.write_artifacts(domain, &fetched).await?;

            let previous = record
                .as_ref()
                .map(|r| r.last_known_serial.clone())
                .filter(|s| !s.is_empty());
            let serial = state.serial.clone();
            self.store
                .save_record(&DomainRecord {
                    domain: domain.to_string(),
                    last_known_serial: serial.clone(),
                    last_state: Some(state),
                })
                .await?;

            info!(domain, serial = %serial, previous = ?previous, "Certificate artifacts updated");

            if let Some(command) = &settings.reload_command {
                run_reload(domain, command).await;
            }

            return Ok(SyncOutcome::Updated { previous, serial });
        }

        // Same serial: only the renewal bookkeeping may have moved
        let mut record = record.unwrap_or_else(|| DomainRecord::new(domain));
        if record.last_state.as_ref() == Some(&state) {
            return Ok(SyncOutcome::Unchanged);
        }

        record.last_state = Some(state);
        self.store.save_record(&record).await?;
        info!(domain, "Renewal state refreshed");
        Ok(SyncOutcome::StateRefreshed)
    }

    /// Sync one tracked domain using its stored settings
    pub async fn sync_one(&self, domain: &str, force: bool) -> SyncResult<SyncOutcome> {
        let config = self.store.load_config().await?;
        let settings = config
            .domains
            .get(domain)
            .ok_or_else(|| SyncError::UnknownDomain(domain.to_string()))?;
        self.sync_domain(domain, settings, force).await
    }

    /// Sync every tracked domain concurrently
    pub async fn sync_all(&self, force: bool) -> SyncResult<Vec<DomainReport>> {
        let config = self.store.load_config().await?;
        let mut tasks = JoinSet::new();

        for (domain, settings) in config.domains {
            let engine = self.clone();
            tasks.spawn(async move {
                let result = engine.sync_domain(&domain, &settings, force).await;
                DomainReport { domain, result }
            });
        }

        let mut reports = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => {
                    if let Err(e) = &report.result {
                        warn!(
                            domain = %report.domain,
                            retryable = e.is_retryable(),
                            "Sync failed: {}",
                            e
                        );
                    }
                    reports.push(report);
                }
                Err(e) => error!("Sync task panicked: {}", e),
            }
        }

        reports.sort_by(|a, b| a.domain.cmp(&b.domain));
        Ok(reports)
    }

    /// Start tracking a domain and run its first sync.
    ///
    /// The domain stays registered if the first sync fails; the next
    /// cycle retries it.
    pub async fn onboard(&self, domain: &str, settings: DomainSettings) -> SyncResult<SyncOutcome> {
        if !is_valid_domain(domain) {
            return Err(SyncError::InvalidDomain(domain.to_string()));
        }

        {
            let _guard = self.config_lock.lock().await;
            let mut config = self.store.load_config().await?;
            if config.domains.contains_key(domain) {
                return Err(SyncError::DomainExists(domain.to_string()));
            }
            config.domains.insert(domain.to_string(), settings.clone());
            self.store.save_config(&config).await?;
        }
        info!(domain, "Domain registered");

        self.sync_domain(domain, &settings, false).await
    }

    /// Stop tracking a domain and delete its local state and artifacts
    pub async fn deregister(&self, domain: &str) -> SyncResult<()> {
        let _guard = self.config_lock.lock().await;
        let mut config = self.store.load_config().await?;
        if config.domains.remove(domain).is_none() {
            return Err(SyncError::UnknownDomain(domain.to_string()));
        }

        let lock = self.domain_lock(domain).await;
        let _domain_guard = lock.lock().await;

        self.store.remove_domain(domain).await?;
        self.store.save_config(&config).await?;
        self.domain_locks.lock().await.remove(domain);

        info!(domain, "Domain removed");
        Ok(())
    }

    /// Tracked domains with their last persisted record
    pub async fn status(&self) -> SyncResult<Vec<(String, Option<DomainRecord>)>> {
        let config: ClientConfig = self.store.load_config().await?;
        let mut out = Vec::with_capacity(config.domains.len());
        for domain in config.domains.keys() {
            out.push((domain.clone(), self.store.load_record(domain).await?));
        }
        Ok(out)
    }
}

async fn run_reload(domain: &str, command: &[String]) {
    let Some((program, args)) = command.split_first() else {
        return;
    };

    let output = tokio::time::timeout(
        RELOAD_TIMEOUT,
        tokio::process::Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output(),
    )
    .await;

    match output {
        Ok(Ok(out)) if out.status.success() => {
            info!(domain, program = %program, "Reload command succeeded");
        }
        Ok(Ok(out)) => {
            warn!(
                domain,
                program = %program,
                status = %out.status,
                stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                "Reload command failed"
            );
        }
        Ok(Err(e)) => warn!(domain, program = %program, "Reload command could not start: {}", e),
        Err(_) => warn!(domain, program = %program, "Reload command timed out"),
    }
}
