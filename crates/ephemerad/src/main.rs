use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ephemera_server::store::{self, Backend};
use tracing_subscriber::EnvFilter;

// ── CLI definition ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "ephemerad",
    about = "Ephemerad: burn-after-reading secret sharing daemon",
    version
)]
struct Cli {
    /// Log level: error, warn, info, debug, verbose (default: $EPHEMERA_LOG_LEVEL or warn)
    #[arg(long, global = true, env = "EPHEMERA_LOG_LEVEL")]
    log_level: Option<String>,

    /// Directory holding ephemera.db (default: platform data dir)
    #[arg(long, global = true, env = "EPHEMERA_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to listen on
        #[arg(long, env = "EPHEMERA_PORT", default_value = "8080")]
        port: u16,
        /// Host to bind
        #[arg(long, env = "EPHEMERA_HOST", default_value = "0.0.0.0")]
        host: String,
        /// Storage backend: redb or memory
        #[arg(long, env = "EPHEMERA_BACKEND", default_value = "redb")]
        backend: Backend,
        /// How often to evict dead records, e.g. "5m" or "30s"
        #[arg(long, env = "EPHEMERA_SWEEP_INTERVAL", default_value = "5m", value_parser = parse_interval)]
        sweep_interval: Duration,
        /// Comma-separated list of allowed CORS origins (default: any)
        #[arg(long, env = "EPHEMERA_CORS_ORIGINS")]
        cors_origins: Option<String>,
    },
    /// Remove expired and exhausted records from the on-disk store, then exit.
    Prune,
}

fn parse_interval(raw: &str) -> Result<Duration, String> {
    let interval = humantime::parse_duration(raw).map_err(|e| e.to_string())?;
    if interval.is_zero() {
        return Err("sweep interval must be non-zero".into());
    }
    Ok(interval)
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let raw = cli.log_level.clone().unwrap_or_else(|| "warn".into());
    let effective_log_level = if raw.eq_ignore_ascii_case("verbose") {
        "debug".to_owned()
    } else {
        raw
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&effective_log_level))
        .init();

    match cli.command {
        Commands::Serve {
            port,
            host,
            backend,
            sweep_interval,
            cors_origins,
        } => {
            let cfg = ephemera_server::ServerConfig {
                host,
                port,
                data_dir: cli.data_dir,
                backend,
                sweep_interval,
                cors_origins,
                ..Default::default()
            };
            ephemera_server::run(cfg).await
        }

        Commands::Prune => cmd_prune(cli.data_dir),
    }
}

// ── Command implementations ───────────────────────────────────────────────────

fn cmd_prune(data_dir: Option<PathBuf>) -> Result<()> {
    let data_dir = ephemera_server::resolve_data_dir(data_dir.as_ref())?;
    let store = store::open(Backend::Redb, &data_dir).context("open store")?;
    let engine = ephemera_server::Engine::new(store);

    let removed = engine.prune()?;

    println!("pruned {removed} record(s) from {}", data_dir.display());
    Ok(())
}
