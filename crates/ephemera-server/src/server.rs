use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use directories::ProjectDirs;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    engine::{Engine, EngineConfig},
    handlers::{create_page, create_secret, delete_secret, get_secret, health},
    store::{self, Backend, MemoryStore, SharedStore},
    AppState,
};

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: Option<PathBuf>,
    pub backend: Backend,
    pub sweep_interval: Duration,
    pub cors_origins: Option<String>,
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("EPHEMERA_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("EPHEMERA_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            data_dir: std::env::var("EPHEMERA_DATA_DIR").ok().map(PathBuf::from),
            backend: std::env::var("EPHEMERA_BACKEND")
                .ok()
                .and_then(|b| b.parse().ok())
                .unwrap_or_default(),
            sweep_interval: Duration::from_secs(300),
            cors_origins: std::env::var("EPHEMERA_CORS_ORIGINS").ok(),
            engine: EngineConfig::default(),
        }
    }
}

/// Resolve and create the data directory: the explicit path (already filled
/// from `EPHEMERA_DATA_DIR` by the config layer), else the platform data dir
/// (`~/.local/share/ephemera/` and friends).
pub fn resolve_data_dir(data_dir: Option<&PathBuf>) -> Result<PathBuf> {
    let path = match data_dir {
        Some(d) => d.clone(),
        None => ProjectDirs::from("", "", "ephemera")
            .context("could not determine platform data directory")?
            .data_dir()
            .to_owned(),
    };
    std::fs::create_dir_all(&path).context("create data dir")?;
    Ok(path)
}

/// Build the HTTP router around an engine.
pub fn router(state: AppState, cors_origins: Option<&str>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/", post(create_page))
        .route("/secrets", post(create_secret))
        .route("/secrets/{id}", get(get_secret).delete(delete_secret))
        .with_state(state)
        .layer(build_cors(cors_origins))
        .layer(TraceLayer::new_for_http())
}

pub async fn run(cfg: ServerConfig) -> Result<()> {
    let store: SharedStore = match cfg.backend {
        Backend::Redb => {
            let data_dir = resolve_data_dir(cfg.data_dir.as_ref())?;
            info!(data_dir = %data_dir.display(), "using data directory");
            store::open(Backend::Redb, &data_dir).context("open store")?
        }
        Backend::Memory => {
            info!("using in-memory store; secrets will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let engine = Engine::with_config(store, cfg.engine);

    // Evicts dead records nobody reads again.
    engine.clone().spawn_sweep(cfg.sweep_interval);

    let app = router(AppState { engine }, cfg.cors_origins.as_deref());

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;

    info!(%addr, "ephemera server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind listener")?;

    axum::serve(listener, app).await.context("server error")
}

fn build_cors(origins: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            http::Method::GET,
            http::Method::POST,
            http::Method::DELETE,
            http::Method::OPTIONS,
        ])
        .allow_headers(Any);

    match origins {
        Some(o) => {
            let origins: Vec<http::HeaderValue> = o
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            cors.allow_origin(origins)
        }
        None => cors.allow_origin(Any),
    }
}
