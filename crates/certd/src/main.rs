//! Sentinel certd - Main entry point
//!
//! Clustered ACME HTTP-01 certificate issuance and renewal coordinator.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, info, warn};

use sentinel_certd::acme::DiskStorage;
use sentinel_certd::{CertdApp, LocalRecordStore};
use sentinel_config::{CertdConfig, DEFAULT_CONFIG_PATH};

/// Sentinel certd - clustered ACME certificate coordinator
#[derive(Parser, Debug)]
#[command(name = "sentinel-certd")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(
        short = 'c',
        long = "config",
        env = "SENTINEL_CERTD_CONFIG",
        default_value = DEFAULT_CONFIG_PATH,
        global = true
    )]
    config: PathBuf,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// Override the configured node hostname
    #[arg(long = "hostname", env = "SENTINEL_HOSTNAME", global = true)]
    hostname: Option<String>,

    /// Override the configured worker id
    #[arg(long = "worker-id", env = "SENTINEL_WORKER_ID", global = true)]
    worker_id: Option<u32>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the coordinator (default)
    Run,
    /// Validate configuration file and exit
    Test,
    /// Print stored domain records and exit
    Status,
    /// Register domains for issuance and exit
    ///
    /// Records are written to storage; a coordinator started afterwards
    /// issues them during its catch-up scan.
    Register {
        /// Domain names to register
        #[arg(required = true)]
        domains: Vec<String>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum LogFormat {
    Text,
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);

    let config = CertdConfig::from_file(&cli.config)
        .with_context(|| format!("Failed to load configuration file {}", cli.config.display()))?
        .with_node_overrides(cli.hostname, cli.worker_id);

    match cli.command {
        Some(Commands::Test) => test_config(&cli.config, &config),
        Some(Commands::Status) => print_status(&config),
        Some(Commands::Register { domains }) => register_domains(&config, &domains),
        Some(Commands::Run) | None => run(config),
    }
}

fn init_logging(verbose: bool, format: LogFormat) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

/// Validate configuration and print a summary
fn test_config(path: &std::path::Path, config: &CertdConfig) -> Result<()> {
    let warnings = config.check().context("Configuration validation failed")?;

    for warning in &warnings {
        warn!("{}", warning);
    }

    info!("Configuration test successful:");
    info!("  - hostname {} (worker {})", config.node.hostname, config.node.worker_id);
    info!("  - {} cluster member(s)", config.cluster.members.len());
    info!("  - ACME directory {}", config.acme.directory.url());
    info!("  - storage {}", config.acme.storage.display());

    println!(
        "sentinel-certd: configuration file {} test is successful",
        path.display()
    );
    Ok(())
}

/// Print every stored record with its lifecycle state
fn print_status(config: &CertdConfig) -> Result<()> {
    let storage = open_storage(config)?;
    let records = storage
        .load_records()
        .context("Failed to load domain records")?;

    let now = Utc::now();
    println!(
        "{:<40} {:<12} {:<25} {:<25} CERTIFICATE",
        "DOMAIN", "STATE", "ISSUED", "RENEWAL"
    );
    for record in &records {
        let date = |d: Option<chrono::DateTime<Utc>>| {
            d.map(|d| d.to_rfc3339()).unwrap_or_else(|| "-".to_string())
        };
        let installed = storage
            .certificate_paths(&record.domain)
            .map(|(cert, _)| cert.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<40} {:<12} {:<25} {:<25} {}",
            record.domain,
            record.status(now).to_string(),
            date(record.issue_date),
            date(record.renewal_date),
            installed
        );
    }
    println!("{} domain(s)", records.len());
    Ok(())
}

/// Write an empty record for each new domain
fn register_domains(config: &CertdConfig, domains: &[String]) -> Result<()> {
    let storage = Arc::new(open_storage(config)?);
    let store =
        LocalRecordStore::persistent(storage).context("Failed to load domain records")?;

    for domain in domains {
        let added = store
            .register(domain)
            .with_context(|| format!("Failed to register {}", domain))?;
        if added {
            println!("{}: registered", domain);
        } else {
            println!("{}: already registered", domain);
        }
    }
    Ok(())
}

fn open_storage(config: &CertdConfig) -> Result<DiskStorage> {
    DiskStorage::new(&config.acme.storage).with_context(|| {
        format!(
            "Failed to open storage at {}",
            config.acme.storage.display()
        )
    })
}

/// Run the coordinator until SIGINT or SIGTERM
fn run(config: CertdConfig) -> Result<()> {
    for warning in config.check().context("Configuration validation failed")? {
        warn!("{}", warning);
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;

    runtime.block_on(async move {
        let app = CertdApp::from_config(&config)?;
        let handle = app.start();

        info!("Sentinel certd running");
        wait_for_shutdown().await?;
        info!("Shutdown signal received");

        if let Some(handle) = handle {
            handle.shutdown();
        }

        match app.metrics.gather_text() {
            Ok(text) => debug!(metrics = %text, "Final metrics"),
            Err(e) => warn!(error = %e, "Failed to encode metrics"),
        }
        Ok(())
    })
}

#[cfg(unix)]
async fn wait_for_shutdown() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for SIGINT")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")
}
