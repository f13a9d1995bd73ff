// src/main.rs
//! Transaction risk monitor entry point
//! Streams JSON-lines transaction events through the monitoring engine.
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use txn_risk_monitor::monitoring::storage::MemoryStore;
use txn_risk_monitor::monitoring::{MonitoringConfig, TransactionEvent, TransactionMonitoringEngine};

#[derive(Parser)]
#[command(name = "risk-monitor")]
#[command(about = "Real-time transaction risk monitor")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate transaction events, one JSON object per line
    Run {
        /// Input file, or `-` for stdin
        #[arg(long, default_value = "-")]
        input: String,
        /// Configuration file (TOML or JSON); falls back to CONFIG_PATH
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Validate a configuration file
    CheckConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the default configuration as TOML
    DefaultConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging()?;

    match args.command {
        Commands::Run { input, config } => {
            let config = load_config(config.as_deref())?;
            run(&input, config).await?;
        }
        Commands::CheckConfig { config } => {
            let config = load_config(config.as_deref())?;
            config.validate()?;
            println!(
                "configuration ok: {} patterns, {} rules",
                config.patterns.len(),
                config.rules.len()
            );
        }
        Commands::DefaultConfig => {
            print!("{}", MonitoringConfig::default().to_toml_string()?);
        }
    }

    Ok(())
}

fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // stdout carries results, logs go to stderr
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Explicit path, then CONFIG_PATH, then defaults; env overrides apply last
fn load_config(path: Option<&Path>) -> Result<MonitoringConfig> {
    let path = path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var("CONFIG_PATH").ok().map(PathBuf::from));

    let mut config = match path {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            MonitoringConfig::from_file(&path)
                .with_context(|| format!("failed to load {}", path.display()))?
        }
        None => MonitoringConfig::default(),
    };
    config.apply_env_overrides();
    Ok(config)
}

async fn run(input: &str, config: MonitoringConfig) -> Result<()> {
    let reader: Box<dyn BufRead> = if input == "-" {
        Box::new(BufReader::new(io::stdin()))
    } else {
        let file = File::open(input).with_context(|| format!("failed to open {}", input))?;
        Box::new(BufReader::new(file))
    };

    let engine = TransactionMonitoringEngine::new(config, Arc::new(MemoryStore::new()))?;
    engine.start_monitoring()?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut skipped = 0usize;
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event: TransactionEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                warn!(line = index + 1, error = %e, "Skipping malformed transaction event");
                skipped += 1;
                continue;
            }
        };
        match engine.monitor_transaction(&event) {
            Ok(result) => writeln!(out, "{}", serde_json::to_string(&result)?)?,
            Err(e) => {
                warn!(line = index + 1, transaction_id = %event.id, error = %e, "Transaction rejected");
                skipped += 1;
            }
        }
    }
    out.flush()?;

    engine.stop_monitoring().await?;
    engine.flush_persistence()?;

    let metrics = engine.get_metrics();
    info!(
        processed = metrics.total_transactions,
        suspicious = metrics.suspicious_count,
        blocked = metrics.blocked_count,
        skipped,
        "Run complete"
    );
    Ok(())
}
