//! Tethersync CLI - operator tool for the offline-first sync engine.
//!
//! Runs one sync against the configured backend, reports connection health
//! and lists the tables the engine knows about.

mod keys;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use tethersync_common::TableName;
use tethersync_crypto::{FieldCipher, KdfParams};
use tethersync_remote::{RemoteBackend, RestBackend, RestConfig};
use tethersync_store::{LocalStore, SqliteStore};
use tethersync_sync::{
    CancellationToken, ConnectionMonitor, OfflineQueue, SyncConfig, SyncOrchestrator,
    SyncOutcome, SyncRunResult, TableRegistry,
};

#[derive(Parser)]
#[command(name = "tethersync")]
#[command(about = "Tethersync - Offline-first sync between a hosted backend and a local store")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (JSON). Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Local database file.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe the backend and run one sync.
    Sync {
        /// Only sync these tables (repeatable).
        #[arg(short, long = "table")]
        tables: Vec<String>,

        /// If the backend is offline, keep retrying until the queued run has replayed.
        #[arg(short, long)]
        wait: bool,

        /// KDF strength for a new key file: "interactive", "moderate", or "sensitive".
        #[arg(long, default_value = "moderate")]
        kdf: String,
    },

    /// Probe the backend and print the connection state.
    Status,

    /// List configured tables and remote tables that are not configured.
    Tables,

    /// Generate shell completions.
    Completions {
        /// Target shell.
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")?;

    match cli.command {
        Commands::Sync { tables, wait, kdf } => {
            cmd_sync(cli.config.as_deref(), cli.db, &tables, wait, &kdf).await
        }
        Commands::Status => cmd_status(cli.config.as_deref()).await,
        Commands::Tables => cmd_tables(cli.config.as_deref()).await,
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "tethersync", &mut std::io::stdout());
            Ok(())
        }
    }
}

/// Load the configuration file (if any) and apply environment overrides.
fn load_config(path: Option<&Path>) -> Result<SyncConfig> {
    let config = match path {
        Some(path) => SyncConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => SyncConfig::default(),
    };
    let config = config.with_env_overrides();
    config
        .validate_remote()
        .context("Remote backend is not configured")?;
    Ok(config)
}

fn build_backend(config: &SyncConfig) -> Result<Arc<dyn RemoteBackend>> {
    let rest = RestConfig::new(&config.remote_url, &config.remote_key)
        .with_timeout(config.request_timeout());
    let backend = RestBackend::new(rest).context("Failed to create REST backend")?;
    if !backend.is_secure() {
        warn!("Remote backend is not using https");
    }
    Ok(Arc::new(backend))
}

fn default_db_path() -> Result<PathBuf> {
    let dir = dirs::data_dir().context("No platform data directory; pass --db")?;
    Ok(dir.join("tethersync").join("tethersync.db"))
}

fn open_store(path: &Path) -> Result<Arc<dyn LocalStore>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let store = SqliteStore::open(path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    Ok(Arc::new(store))
}

fn build_cipher(
    config: &SyncConfig,
    db_path: &Path,
    kdf: &str,
) -> Result<Option<Arc<dyn FieldCipher>>> {
    if !config.enable_encryption {
        return Ok(None);
    }
    let params = KdfParams::from_strength(kdf).context("Invalid KDF strength")?;
    let passphrase = zeroize::Zeroizing::new(keys::read_passphrase()?);
    if passphrase.is_empty() {
        anyhow::bail!("Passphrase cannot be empty");
    }
    let cipher = keys::load_or_create_cipher(db_path, &config.key_id, &passphrase, params)?;
    Ok(Some(cipher))
}

/// Run one sync.
async fn cmd_sync(
    config_path: Option<&Path>,
    db: Option<PathBuf>,
    tables: &[String],
    wait: bool,
    kdf: &str,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if !tables.is_empty() {
        let names = tables
            .iter()
            .map(|t| TableName::new(t.as_str()))
            .collect::<tethersync_common::Result<Vec<_>>>()
            .context("Invalid table name")?;
        config = config.restrict_to(&names)?;
    }

    let db_path = match db {
        Some(path) => path,
        None => default_db_path()?,
    };
    info!("Using database {}", db_path.display());

    let store = open_store(&db_path)?;
    let cipher = build_cipher(&config, &db_path, kdf)?;
    let backend = build_backend(&config)?;
    let orchestrator = SyncOrchestrator::new(config, backend, store, cipher)
        .context("Failed to create sync orchestrator")?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted; cancelling sync");
            on_interrupt.cancel();
        }
    });

    let outcome = orchestrator.start(&cancel).await.context("Sync failed")?;
    match &outcome {
        SyncOutcome::Completed(results) => {
            print_results(results);
        }
        SyncOutcome::Cancelled(results) => {
            print_results(results);
            println!("Sync cancelled.");
        }
        SyncOutcome::AlreadyRunning => println!("A sync is already running."),
        SyncOutcome::Deferred => {
            let state = orchestrator.monitor().state();
            println!(
                "Backend unreachable: {}",
                state.last_error.as_deref().unwrap_or("unknown error")
            );
            if wait {
                println!("Waiting for the backend to come back (Ctrl-C to stop)...");
                wait_for_replay(&orchestrator, &cancel).await;
            } else {
                println!("Sync queued; run again once the backend is reachable.");
            }
        }
    }

    orchestrator.shutdown();
    Ok(())
}

/// Block until the offline queue is empty or the user interrupts.
async fn wait_for_replay(orchestrator: &SyncOrchestrator, cancel: &CancellationToken) {
    let interval = orchestrator.config().retry_delay();
    while !orchestrator.queue().is_empty() {
        tokio::select! {
            _ = cancel.cancelled() => {
                println!(
                    "Stopped waiting; {} operation(s) still queued.",
                    orchestrator.queue().len()
                );
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }
        orchestrator.probe().await;
        if let Some(report) = orchestrator.monitor().wait_for_drain().await {
            info!(
                "Replayed {} queued operation(s), {} remaining",
                report.replayed, report.remaining
            );
        }
    }
    println!("Queued sync replayed.");
}

fn print_results(results: &[SyncRunResult]) {
    println!(
        "{:<24} {:>8} {:>8} {:>8} {:>8} {:>8}",
        "TABLE", "LOADED", "SKIPPED", "FAILED", "PUSHED", "MS"
    );
    for result in results {
        let mut name = result.table_name.clone();
        if result.deferred {
            name.push_str(" (deferred)");
        }
        println!(
            "{:<24} {:>8} {:>8} {:>8} {:>8} {:>8}",
            name,
            result.records_loaded,
            result.records_skipped,
            result.records_failed,
            result.records_pushed,
            result.elapsed_ms
        );
        for error in &result.errors {
            println!("    {}", error);
        }
    }
}

/// Probe the backend and print the connection state.
async fn cmd_status(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let backend = build_backend(&config)?;
    let monitor = ConnectionMonitor::new(
        backend,
        Arc::new(OfflineQueue::default()),
        config.retry_delay(),
    );

    let state = monitor.probe().await;
    monitor.shutdown();

    println!("Backend: {}", config.remote_url);
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

/// List configured tables and newly detected remote tables.
async fn cmd_tables(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let backend = build_backend(&config)?;
    let registry = TableRegistry::from_config(&config);

    println!("Configured tables:");
    for target in registry.targets() {
        println!(
            "  {:<24} {:?} (batch {})",
            target.table,
            target.direction,
            target.page_size()
        );
    }

    let discovered = registry
        .detect_new_tables(backend.as_ref())
        .await
        .context("Failed to list remote tables")?;
    if discovered.is_empty() {
        println!("No unconfigured remote tables.");
    } else {
        println!("Unconfigured remote tables:");
        for table in discovered {
            println!("  {}", table);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_sync_tables() {
        let cli = Cli::try_parse_from([
            "tethersync",
            "--db",
            "/tmp/t.db",
            "sync",
            "--table",
            "messages",
            "--table",
            "conversations",
        ])
        .unwrap();
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/t.db")));
        match cli.command {
            Commands::Sync { tables, wait, kdf } => {
                assert_eq!(tables, vec!["messages", "conversations"]);
                assert!(!wait);
                assert_eq!(kdf, "moderate");
            }
            _ => panic!("expected sync"),
        }
    }

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_open_store_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sync.db");
        open_store(&path).unwrap();
        assert!(path.exists());
    }
}
