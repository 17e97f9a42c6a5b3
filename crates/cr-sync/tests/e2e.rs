use cr_api::{build_router, state::ApiState};
use cr_certs::{AccessPolicy, ApiKey, ArtifactType, FsRepository};
use cr_sync::{
    CertSource, ClientConfig, DomainSettings, DomainStore, HttpCertSource, SyncEngine, SyncError,
    SyncOutcome,
};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

fn write_issuer_files(home: &Path, serial: &str, next_renew: i64) {
    let d = home.join("example.com");
    std::fs::create_dir_all(&d).unwrap();
    std::fs::write(
        d.join("example.com.conf"),
        format!(
            "Le_Domain='example.com'\nLe_LinkCert='https://acme-v02.api.letsencrypt.org/acme/cert/{serial}'\nLe_CertCreateTime='1700000000'\nLe_NextRenewTime='{next_renew}'\n"
        ),
    )
    .unwrap();
    std::fs::write(d.join("example.com.key"), format!("KEY {serial}")).unwrap();
    std::fs::write(d.join("example.com.cer"), format!("CERT {serial}")).unwrap();
    std::fs::write(d.join("fullchain.cer"), format!("CHAIN {serial}")).unwrap();
}

async fn start_server(home: &Path, key: ApiKey) -> SocketAddr {
    let policy = AccessPolicy::default().with_domain_key("example.com", key);
    let repo = FsRepository::new(home, policy);
    let app = build_router(ApiState::new(Arc::new(repo), Uuid::new_v4()));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

struct Fixture {
    server_home: TempDir,
    client_dir: TempDir,
    engine: SyncEngine<HttpCertSource>,
}

async fn fixture() -> Fixture {
    let key = ApiKey::from_passphrase("pass");
    let server_home = tempfile::tempdir().unwrap();
    write_issuer_files(server_home.path(), "SERIAL-A", 1_705_097_600);
    let addr = start_server(server_home.path(), key).await;

    let client_dir = tempfile::tempdir().unwrap();
    let store = DomainStore::new(client_dir.path());
    let config = ClientConfig::new(&format!("http://{}", addr));
    store.save_config(&config).await.unwrap();

    let source = HttpCertSource::new(&config.server, config.timeout()).unwrap();
    Fixture {
        server_home,
        client_dir,
        engine: SyncEngine::new(store, source),
    }
}

fn read(dir: &TempDir, name: &str) -> String {
    std::fs::read_to_string(dir.path().join("example.com").join(name)).unwrap()
}

#[tokio::test]
async fn test_onboard_pulls_artifacts_over_http() {
    let f = fixture().await;
    let settings = DomainSettings {
        api_key: Some(ApiKey::from_passphrase("pass")),
        reload_command: None,
    };

    let outcome = f.engine.onboard("example.com", settings).await.unwrap();
    assert_eq!(
        outcome,
        SyncOutcome::Updated {
            previous: None,
            serial: "SERIAL-A".to_string()
        }
    );
    assert_eq!(read(&f.client_dir, ArtifactType::Key.filename()), "KEY SERIAL-A");
    assert_eq!(read(&f.client_dir, "certificate.crt"), "CERT SERIAL-A");
    assert_eq!(read(&f.client_dir, "certificate-chain.crt"), "CHAIN SERIAL-A");

    // Nothing changed on the server
    assert_eq!(
        f.engine.sync_one("example.com", false).await.unwrap(),
        SyncOutcome::Unchanged
    );

    // Issuer renewed the certificate
    write_issuer_files(f.server_home.path(), "SERIAL-B", 1_710_000_000);
    let outcome = f.engine.sync_one("example.com", false).await.unwrap();
    assert_eq!(
        outcome,
        SyncOutcome::Updated {
            previous: Some("SERIAL-A".to_string()),
            serial: "SERIAL-B".to_string()
        }
    );
    assert_eq!(read(&f.client_dir, "certificate.key"), "KEY SERIAL-B");

    let record = f.engine.store().load_record("example.com").await.unwrap().unwrap();
    assert_eq!(record.last_known_serial, "SERIAL-B");
    assert_eq!(
        record.last_state.unwrap().next_renewal.timestamp(),
        1_710_000_000
    );
}

#[tokio::test]
async fn test_wrong_key_leaves_no_artifacts() {
    let f = fixture().await;
    let settings = DomainSettings {
        api_key: Some(ApiKey::from_passphrase("guess")),
        reload_command: None,
    };

    let err = f.engine.onboard("example.com", settings).await.unwrap_err();
    assert!(matches!(err, SyncError::Server { status: 401, .. }), "{err}");
    assert!(!f.client_dir.path().join("example.com/certificate.crt").exists());
    assert!(f.engine.store().load_record("example.com").await.unwrap().is_none());

    // Still registered, so the next cycle retries it
    let config = f.engine.store().load_config().await.unwrap();
    assert!(config.domains.contains_key("example.com"));
}

#[tokio::test]
async fn test_unknown_domain_on_server() {
    let f = fixture().await;
    let source = HttpCertSource::new(
        &f.engine.store().load_config().await.unwrap().server,
        Duration::from_secs(5),
    )
    .unwrap();
    let err = source.fetch_state("missing.example.com").await.unwrap_err();
    match err {
        SyncError::Server { status, message } => {
            assert_eq!(status, 404);
            assert_eq!(message, "not found");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_unreachable_server_is_retryable() {
    // Bind then drop to get a port nothing listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let source = HttpCertSource::new(&format!("http://{}", addr), Duration::from_secs(2)).unwrap();
    let err = source.fetch_state("example.com").await.unwrap_err();
    assert!(matches!(err, SyncError::Network(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_stalled_server_times_out() {
    // Accepts connections but never writes a response
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let source = HttpCertSource::new(&format!("http://{}", addr), Duration::from_secs(1)).unwrap();
    let started = std::time::Instant::now();
    let err = source.fetch_state("example.com").await.unwrap_err();

    assert!(matches!(err, SyncError::Network(_)), "{err}");
    assert!(err.is_retryable());
    assert!(started.elapsed() < Duration::from_secs(5));
}
