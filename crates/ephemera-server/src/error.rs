use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced by the engine to the request shell.
///
/// `NotFound` deliberately covers missing, expired, and exhausted records:
/// a caller must not learn which of those applied.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found")]
    NotFound,

    #[error("{0}")]
    InvalidRequest(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("handle collision persisted after retry")]
    HandleCollision,
}

impl EngineError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        EngineError::InvalidRequest(msg.into())
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateId(_) => EngineError::HandleCollision,
            StoreError::Unavailable(e) => EngineError::StorageUnavailable(format!("{e:#}")),
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        match self {
            EngineError::NotFound => {
                (StatusCode::NOT_FOUND, Json(json!({"error": "not found"}))).into_response()
            }
            EngineError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({"error": msg}))).into_response()
            }
            e @ (EngineError::StorageUnavailable(_) | EngineError::HandleCollision) => {
                tracing::error!(error = %e, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": "internal server error"})),
                )
                    .into_response()
            }
        }
    }
}
