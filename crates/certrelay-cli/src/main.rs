use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use cr_certs::ApiKey;
use cr_common::logging;
use cr_sync::{
    ClientConfig, DomainSettings, DomainStore, HttpCertSource, SyncEngine, SyncOutcome,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

/// sysexits EX_TEMPFAIL: every failure was retryable
const EXIT_TEMPFAIL: u8 = 75;

/// Keep local copies of certificates from a certrelay server up to date
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Client state directory
    #[arg(
        short,
        long,
        env = "CERTRELAY_CLIENT_DIR",
        default_value = "/var/lib/certrelay-cli"
    )]
    dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the client config
    Init {
        /// Distribution server base URL
        #[arg(long, value_name = "URL")]
        server: String,

        /// HTTP timeout in seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
    /// Track a domain and fetch its certificate
    Add {
        domain: String,

        /// API key as 64 hex characters (takes precedence over --passphrase)
        #[arg(long)]
        key: Option<String>,

        /// Passphrase the API key is derived from
        #[arg(long, env = "CERTRELAY_PASSPHRASE", hide_env_values = true)]
        passphrase: Option<String>,

        /// Command run after new artifacts are written, e.g. "systemctl reload nginx"
        #[arg(long, value_name = "CMD")]
        reload: Option<String>,
    },
    /// Stop tracking a domain and delete its local files
    Remove { domain: String },
    /// Check tracked domains and pull renewed certificates
    Sync {
        /// Only this domain
        domain: Option<String>,

        /// Re-pull artifacts even if the serial did not change
        #[arg(short, long)]
        force: bool,
    },
    /// Show tracked domains
    List,
    /// Print the API key derived from a passphrase
    Keygen { passphrase: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init("info,certrelay_cli=debug,cr_sync=debug");

    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let store = DomainStore::new(&cli.dir);

    match cli.command {
        Command::Keygen { passphrase } => {
            println!("{}", ApiKey::from_passphrase(&passphrase).encode());
            Ok(ExitCode::SUCCESS)
        }
        Command::Init { server, timeout } => {
            if store.config_exists().await {
                bail!("{} already exists", store.config_path().display());
            }
            let mut config = ClientConfig::new(&server);
            config.timeout_secs = timeout;
            store.save_config(&config).await?;
            info!(server = %config.server, "Client initialized in {}", cli.dir.display());
            Ok(ExitCode::SUCCESS)
        }
        Command::Add {
            domain,
            key,
            passphrase,
            reload,
        } => {
            let api_key = match (key, passphrase) {
                (Some(hex), _) => Some(ApiKey::decode(&hex).context("Invalid --key")?),
                (None, Some(pass)) => Some(ApiKey::from_passphrase(&pass)),
                (None, None) => None,
            };
            let reload_command = reload
                .map(|cmd| cmd.split_whitespace().map(str::to_string).collect::<Vec<_>>())
                .filter(|argv| !argv.is_empty());

            let engine = engine(store).await?;
            let outcome = engine
                .onboard(
                    &domain,
                    DomainSettings {
                        api_key,
                        reload_command,
                    },
                )
                .await
                .with_context(|| format!("{} registered but first sync failed", domain))?;
            print_outcome(&domain, &outcome);
            Ok(ExitCode::SUCCESS)
        }
        Command::Remove { domain } => {
            let engine = engine(store).await?;
            engine.deregister(&domain).await?;
            println!("{}: removed", domain);
            Ok(ExitCode::SUCCESS)
        }
        Command::Sync { domain, force } => {
            let engine = engine(store).await?;
            if let Some(domain) = domain {
                return match engine.sync_one(&domain, force).await {
                    Ok(outcome) => {
                        print_outcome(&domain, &outcome);
                        Ok(ExitCode::SUCCESS)
                    }
                    Err(e) => {
                        eprintln!("{}: {}", domain, e);
                        Ok(failure_code(e.is_retryable()))
                    }
                };
            }

            let reports = engine.sync_all(force).await?;
            let mut failed = 0;
            let mut all_retryable = true;
            for report in &reports {
                match &report.result {
                    Ok(outcome) => print_outcome(&report.domain, outcome),
                    Err(e) => {
                        failed += 1;
                        all_retryable &= e.is_retryable();
                        eprintln!("{}: {}", report.domain, e);
                    }
                }
            }
            if failed == 0 {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(failure_code(all_retryable))
            }
        }
        Command::List => {
            let engine = engine(store).await?;
            for (domain, record) in engine.status().await? {
                match record.and_then(|r| r.last_state.map(|s| (r.last_known_serial, s))) {
                    Some((serial, state)) => {
                        let due = if state.renewal_due() { " (renewal due)" } else { "" };
                        println!(
                            "{}\tserial={}\tnext_renewal={}{}",
                            domain,
                            serial,
                            state.next_renewal.to_rfc3339(),
                            due
                        );
                    }
                    None => println!("{}\tnever synced", domain),
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn engine(store: DomainStore) -> anyhow::Result<SyncEngine<HttpCertSource>> {
    let config = store.load_config().await?;
    let source = HttpCertSource::new(&config.server, config.timeout())?;
    Ok(SyncEngine::new(store, source))
}

fn failure_code(retryable: bool) -> ExitCode {
    if retryable {
        ExitCode::from(EXIT_TEMPFAIL)
    } else {
        ExitCode::FAILURE
    }
}

fn print_outcome(domain: &str, outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::Updated {
            previous: Some(previous),
            serial,
        } => println!("{}: updated {} -> {}", domain, previous, serial),
        SyncOutcome::Updated {
            previous: None,
            serial,
        } => println!("{}: fetched {}", domain, serial),
        SyncOutcome::StateRefreshed => println!("{}: renewal state refreshed", domain),
        SyncOutcome::Unchanged => println!("{}: up to date", domain),
    }
}
