//! setlist-curator - playlist curation CLI
//!
//! Loads the TOML configuration, then reconciles (or estimates) the
//! configured collections against the remote collection API.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use setlist_common::config::{load_config, resolve_config_path, LoggingConfig, TomlConfig};
use setlist_common::events::{CurationEvent, EventBus};
use setlist_curator::credentials::{JsonFileCredentialStore, OAuthTokenRefresher};
use setlist_curator::remote::HttpCollectionClient;
use setlist_curator::suggest::HttpSuggestionClient;
use setlist_curator::Curator;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "setlist-curator", version, about = "Curate remote playlists")]
struct Cli {
    /// Configuration file (falls back to SETLIST_CONFIG, then the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Append every curation event as a JSON line to this file
    #[arg(long, global = true)]
    events_log: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Reconcile collections against the remote API
    Run {
        /// Collection id to process (repeatable; default: all)
        #[arg(long)]
        collection: Vec<String>,

        /// Compute and report every change without mutating anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Predict filter-stage changes without mutating anything
    Estimate {
        #[arg(long)]
        collection: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = resolve_config_path(cli.config.as_deref());
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;

    init_tracing(&config.logging)?;
    info!("Starting setlist-curator");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Configuration: {}", config_path.display());

    let events = EventBus::default();
    let writer = cli
        .events_log
        .clone()
        .map(|path| spawn_event_writer(&events, path));

    let curator = build_curator(config, events.clone())?;
    let outcome = execute(&curator, cli.command).await;

    // Closing every sender lets the writer drain and exit
    drop(curator);
    drop(events);
    if let Some(handle) = writer {
        if let Err(e) = handle.await {
            warn!(error = %e, "Event log writer stopped abnormally");
        }
    }

    outcome
}

async fn execute(curator: &Curator, command: Command) -> Result<()> {
    match command {
        Command::Run { collection, dry_run } => {
            let report = if collection.is_empty() {
                curator.run_all(dry_run).await
            } else {
                curator.run_collections(&collection, dry_run).await
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.failed() > 0 {
                return Err(anyhow!(
                    "{} of {} collection(s) failed",
                    report.failed(),
                    report.outcomes.len()
                ));
            }
            Ok(())
        }
        Command::Estimate { collection } => {
            let ids: Vec<String> = if collection.is_empty() {
                curator.config().collections.iter().map(|c| c.id.clone()).collect()
            } else {
                collection
            };

            let mut failed = 0;
            for id in &ids {
                match curator.estimate(id).await {
                    Ok(estimate) => println!("{}", serde_json::to_string_pretty(&estimate)?),
                    Err(e) => {
                        failed += 1;
                        eprintln!("{}: {}", id, e);
                    }
                }
            }
            if failed > 0 {
                return Err(anyhow!("{} of {} estimate(s) failed", failed, ids.len()));
            }
            Ok(())
        }
    }
}

fn build_curator(config: TomlConfig, events: EventBus) -> Result<Curator> {
    let timeout = config.remote.request_timeout();
    let api = HttpCollectionClient::from_config(&config.remote)?;
    let store = JsonFileCredentialStore::new(config.auth.credential_path());
    let refresher = OAuthTokenRefresher::new(
        config.auth.token_url.clone(),
        config.auth.client_id.clone(),
        config.auth.client_secret.clone(),
        timeout,
    )?;

    let suggestions = if config.suggestions.endpoint.trim().is_empty() {
        info!("No suggestion endpoint configured; gap filling disabled");
        None
    } else {
        Some(HttpSuggestionClient::from_config(&config.suggestions, timeout)?)
    };

    let mut curator = Curator::new(config, Arc::new(api), Arc::new(store), Arc::new(refresher))
        .with_event_bus(events);
    if let Some(service) = suggestions {
        curator = curator.with_suggestions(Arc::new(service));
    }
    Ok(curator)
}

/// Initialise tracing from `[logging]`; `RUST_LOG` takes precedence
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .context("Invalid log level")?;

    match &logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .try_init()
                .map_err(|e| anyhow!(e))?;
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init()
                .map_err(|e| anyhow!(e))?;
        }
    }
    Ok(())
}

/// Append events as JSON lines until every sender is dropped
fn spawn_event_writer(events: &EventBus, path: PathBuf) -> JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        let mut file = match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
        {
            Ok(f) => f,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot open events log");
                return;
            }
        };

        loop {
            let event: CurationEvent = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Events log writer lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let mut line = match serde_json::to_string(&event) {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "Cannot serialize event");
                    continue;
                }
            };
            line.push('\n');
            if let Err(e) = file.write_all(line.as_bytes()).await {
                warn!(error = %e, "Cannot write events log");
                break;
            }
        }
        let _ = file.flush().await;
    })
}
