use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Form, Json,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    engine::{parse_limit, NewSecret},
    error::EngineError,
    AppState,
};

/// Opaque bytes carried as standard base64 strings on the wire.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

// ── Create (JSON) ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    /// Client-side ciphertext, stored verbatim.
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub iv: Vec<u8>,
    /// Integer, numeric string, or null.
    pub max_views: Option<Value>,
    pub ttl_minutes: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateResponse {
    pub id: String,
}

pub async fn create_secret(
    State(state): State<AppState>,
    body: Result<Json<CreateRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateResponse>), EngineError> {
    let Json(body) = body.map_err(|rejection| EngineError::invalid(rejection.body_text()))?;
    let max_views = limit_from_json("max_views", body.max_views.as_ref())?;
    let ttl_minutes = limit_from_json("ttl_minutes", body.ttl_minutes.as_ref())?;
    let new = NewSecret::from_limits(body.data, body.iv, max_views, ttl_minutes)?;
    let id = state.engine.create(new)?;
    Ok((StatusCode::CREATED, Json(CreateResponse { id })))
}

/// Accept an integer or a numeric string. Fractions and other types are rejected.
fn limit_from_json(field: &str, raw: Option<&Value>) -> Result<Option<i64>, EngineError> {
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| EngineError::invalid(format!("invalid {field}"))),
        Some(Value::String(s)) => parse_limit(field, Some(s)),
        Some(_) => Err(EngineError::invalid(format!("invalid {field}"))),
    }
}

// ── Create (form) ─────────────────────────────────────────────────────────────

/// Fields posted by the browser form. Empty strings mean "not set".
#[derive(Debug, Default, Deserialize)]
pub struct NewPageForm {
    /// Base64 ciphertext.
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub iv: String,
    /// Lifetime in minutes.
    pub expiration: Option<String>,
    #[serde(rename = "countLimit")]
    pub count_limit: Option<String>,
}

/// Responds with the bare handle as plain text.
pub async fn create_page(
    State(state): State<AppState>,
    Form(form): Form<NewPageForm>,
) -> Result<String, EngineError> {
    let ttl_minutes = parse_limit("expiration minutes", form.expiration.as_deref())?;
    let max_views = parse_limit("count limit", form.count_limit.as_deref())?;
    let payload = decode_field("data", &form.data)?;
    let iv = decode_field("iv", &form.iv)?;
    let new = NewSecret::from_limits(payload, iv, max_views, ttl_minutes)?;
    state.engine.create(new)
}

fn decode_field(field: &str, raw: &str) -> Result<Vec<u8>, EngineError> {
    STANDARD
        .decode(raw.trim())
        .map_err(|_| EngineError::invalid(format!("invalid {field}")))
}

// ── Read ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct SecretResponse {
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub iv: Vec<u8>,
}

pub async fn get_secret(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SecretResponse>, EngineError> {
    let secret = state.engine.read(&id)?;
    Ok(Json(SecretResponse {
        data: secret.payload().to_vec(),
        iv: secret.iv().to_vec(),
    }))
}

// ── Delete ────────────────────────────────────────────────────────────────────

/// Always 204: the response does not reveal whether a handle existed.
pub async fn delete_secret(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, EngineError> {
    state.engine.delete(&id)?;
    Ok(StatusCode::NO_CONTENT)
}
