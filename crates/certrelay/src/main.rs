use anyhow::Context;
use clap::Parser;
use cr_api::{build_router, state::ApiState};
use cr_certs::FsRepository;
use cr_common::{logging, ServerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Serve acme.sh certificates to consuming hosts
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// JSON config file (default /etc/certrelay/config.json)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the listen address from the config
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init("info,certrelay=debug,cr_api=debug");

    let args = Args::parse();
    let mut config = ServerConfig::load(args.config.as_deref()).context("Failed to load config")?;
    if let Some(listen) = args.listen {
        config.listen = listen;
    }

    info!(
        id = %config.id,
        cert_home = %config.cert_home.display(),
        "certrelay starting"
    );
    if config.default_key.is_none() && config.domain_keys.is_empty() {
        warn!("No API keys configured: private keys and bundles will not be served");
    }
    if !config.cert_home.is_dir() {
        warn!("Certificate home {} does not exist", config.cert_home.display());
    }

    let repo = FsRepository::new(&config.cert_home, config.access_policy());
    let app = build_router(ApiState::new(Arc::new(repo), config.id));

    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("certrelay stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
