//! Create/read/delete operations as seen by the request shell.
//!
//! The engine owns no state beyond a [`SharedStore`] handle. All lifecycle
//! decisions are made by [`lifecycle::decide`] inside the store's atomic
//! consume step; the engine only validates input, allocates handles, and
//! collapses rejection causes into [`EngineError::NotFound`].

use std::time::Duration;

use tokio::time;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::handle;
use crate::lifecycle::{self, Outcome};
use crate::store::{Record, Secret, SharedStore, StoreError};

/// Upper bound on the opaque payload (1 MiB).
pub const MAX_PAYLOAD_BYTES: usize = 1_048_576;
/// Upper bound on the opaque iv.
pub const MAX_IV_BYTES: usize = 1024;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_payload_bytes: usize,
    pub max_iv_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: MAX_PAYLOAD_BYTES,
            max_iv_bytes: MAX_IV_BYTES,
        }
    }
}

/// A validated creation request.
#[derive(Debug, Clone)]
pub struct NewSecret {
    pub payload: Vec<u8>,
    pub iv: Vec<u8>,
    /// Total number of successful reads allowed. `None` is unlimited.
    pub max_views: Option<u32>,
    /// Lifetime from creation. `None` never expires.
    pub ttl: Option<Duration>,
}

impl NewSecret {
    pub fn new(payload: impl Into<Vec<u8>>, iv: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            iv: iv.into(),
            max_views: None,
            ttl: None,
        }
    }

    pub fn with_max_views(mut self, views: u32) -> Self {
        self.max_views = Some(views);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Build from raw numeric options as they arrive over the wire.
    /// Both limits must be positive when present.
    pub fn from_limits(
        payload: impl Into<Vec<u8>>,
        iv: impl Into<Vec<u8>>,
        max_views: Option<i64>,
        ttl_minutes: Option<i64>,
    ) -> Result<Self, EngineError> {
        let mut new = Self::new(payload, iv);

        if let Some(views) = max_views {
            if views < 1 {
                return Err(EngineError::invalid("view limit must be a positive integer"));
            }
            let views = u32::try_from(views)
                .map_err(|_| EngineError::invalid("view limit is too large"))?;
            new.max_views = Some(views);
        }

        if let Some(minutes) = ttl_minutes {
            if minutes < 1 {
                return Err(EngineError::invalid(
                    "expiration minutes must be a positive integer",
                ));
            }
            let secs = (minutes as u64)
                .checked_mul(60)
                .ok_or_else(|| EngineError::invalid("expiration is too large"))?;
            new.ttl = Some(Duration::from_secs(secs));
        }

        Ok(new)
    }
}

/// Parse an optional numeric form field. Empty or missing means absent.
pub fn parse_limit(field: &str, raw: Option<&str>) -> Result<Option<i64>, EngineError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s
            .parse::<i64>()
            .map(Some)
            .map_err(|_| EngineError::invalid(format!("invalid {field}"))),
    }
}

#[derive(Clone)]
pub struct Engine {
    store: SharedStore,
    config: EngineConfig,
    allocate: fn() -> String,
}

impl Engine {
    pub fn new(store: SharedStore) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    pub fn with_config(store: SharedStore, config: EngineConfig) -> Self {
        Self {
            store,
            config,
            allocate: handle::allocate,
        }
    }

    /// Replace the handle allocator. Only useful for exercising collisions.
    pub fn with_allocator(mut self, allocate: fn() -> String) -> Self {
        self.allocate = allocate;
        self
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Persist a new secret and return its handle.
    ///
    /// A handle collision is retried once with a fresh handle.
    pub fn create(&self, new: NewSecret) -> Result<String, EngineError> {
        self.validate(&new)?;

        let now = lifecycle::now_millis();
        let expires_at = new.ttl.map(|ttl| {
            let ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
            now.saturating_add(ms)
        });

        for attempt in 0..2 {
            let id = (self.allocate)();
            let record = Record {
                id: id.clone(),
                payload: new.payload.clone(),
                iv: new.iv.clone(),
                views_remaining: new.max_views,
                expires_at,
                created_at: now,
            };

            match self.store.create(record) {
                Ok(()) => {
                    info!(
                        handle = %id,
                        max_views = ?new.max_views,
                        expires_at = ?expires_at,
                        "audit: secret.create"
                    );
                    return Ok(id);
                }
                Err(StoreError::DuplicateId(_)) if attempt == 0 => {
                    warn!("handle collision, retrying with a fresh handle");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(EngineError::HandleCollision)
    }

    /// Consume one view of `id`.
    pub fn read(&self, id: &str) -> Result<Secret, EngineError> {
        if !handle::is_well_formed(id) {
            debug!("rejected malformed handle");
            return Err(EngineError::NotFound);
        }

        let outcome = self
            .store
            .fetch_and_apply(id, lifecycle::now_millis(), lifecycle::decide)?;

        match outcome {
            Outcome::Served(secret) => {
                info!(handle = %id, "audit: secret.read");
                Ok(secret)
            }
            Outcome::ServedLast(secret) => {
                info!(handle = %id, "audit: secret.burn");
                Ok(secret)
            }
            other => {
                debug!(handle = %id, reason = other.label(), "read rejected");
                Err(EngineError::NotFound)
            }
        }
    }

    /// Delete `id` outright. Missing handles are not an error.
    pub fn delete(&self, id: &str) -> Result<bool, EngineError> {
        let existed = self.store.delete(id)?;
        info!(handle = %id, existed, "audit: secret.delete");
        Ok(existed)
    }

    /// Remove every dead record now.
    pub fn prune(&self) -> Result<usize, EngineError> {
        let removed = self.store.prune(lifecycle::now_millis())?;
        info!(removed, "audit: secret.prune");
        Ok(removed)
    }

    /// Spawn a background Tokio task that calls `prune()` every `interval`.
    pub fn spawn_sweep(self, interval: Duration) {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.tick().await; // skip first immediate tick
            loop {
                ticker.tick().await;
                if let Err(e) = self.prune() {
                    warn!(error = %e, "background sweep error");
                }
            }
        });
    }

    fn validate(&self, new: &NewSecret) -> Result<(), EngineError> {
        if new.payload.len() > self.config.max_payload_bytes {
            return Err(EngineError::invalid(format!(
                "payload exceeds {} byte limit",
                self.config.max_payload_bytes
            )));
        }
        if new.iv.len() > self.config.max_iv_bytes {
            return Err(EngineError::invalid(format!(
                "iv exceeds {} byte limit",
                self.config.max_iv_bytes
            )));
        }
        if new.max_views == Some(0) {
            return Err(EngineError::invalid("view limit must be a positive integer"));
        }
        if new.ttl == Some(Duration::ZERO) {
            return Err(EngineError::invalid("expiration must be positive"));
        }
        Ok(())
    }
}
