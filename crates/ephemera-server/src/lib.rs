pub mod engine;
pub mod error;
pub mod handle;
pub mod handlers;
pub mod lifecycle;
pub mod server;
pub mod store;

/// Shared application state threaded through axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: engine::Engine,
}

pub use engine::{Engine, EngineConfig, NewSecret};
pub use error::EngineError;
pub use server::{resolve_data_dir, router, run, ServerConfig};
