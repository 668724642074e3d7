//! Record storage.
//!
//! Every backend implements [`RecordStore`]. The one hard requirement is that
//! [`RecordStore::fetch_and_apply`] reads, decides, and mutates as a single
//! atomic unit per handle, so two racing readers of a view-once record can
//! never both be served.

pub mod disk;
#[cfg(test)]
pub(crate) mod faulty;
pub mod memory;
pub mod model;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use thiserror::Error;
use tracing::warn;

use crate::lifecycle::{DecideFn, Decision, Outcome};

pub use self::disk::RedbStore;
pub use self::memory::MemoryStore;
pub use self::model::{Record, Secret};

#[derive(Debug, Error)]
pub enum StoreError {
    /// A live record already owns this handle.
    #[error("duplicate record id: {0}")]
    DuplicateId(String),

    /// The backing store failed; transient from the caller's point of view.
    #[error(transparent)]
    Unavailable(#[from] anyhow::Error),
}

/// Keyed storage for secret records.
///
/// Implementations are shared across request tasks behind an [`Arc`]; clones
/// of the handle must observe the same records.
pub trait RecordStore: Send + Sync + 'static {
    /// Insert a new record. Fails with [`StoreError::DuplicateId`] if the id is live.
    fn create(&self, record: Record) -> Result<(), StoreError>;

    /// Atomically read the record for `id`, pass it to `decide` along with
    /// `now`, apply the resulting mutation, and return the outcome.
    ///
    /// Concurrent calls for the same `id` behave as if run one at a time.
    fn fetch_and_apply(&self, id: &str, now: i64, decide: DecideFn)
        -> Result<Outcome, StoreError>;

    /// Remove a record. Returns true if it existed; missing ids are not an error.
    fn delete(&self, id: &str) -> Result<bool, StoreError>;

    /// True if a record is stored under `id`, expired or not. Never consumes.
    fn contains(&self, id: &str) -> Result<bool, StoreError>;

    /// Remove every record that is expired at `now` or has no views left.
    /// Returns the number removed.
    fn prune(&self, now: i64) -> Result<usize, StoreError>;

    /// Number of stored records, including ones not yet lazily evicted.
    fn len(&self) -> Result<usize, StoreError>;

    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

/// Settle a consume whose mutation has been attempted.
///
/// Purging an expired or exhausted record is cleanup: a failure is logged and
/// the rejection still stands. Retiring a served record is part of the read,
/// so a failure there surfaces as [`StoreError::Unavailable`].
pub fn settle(
    id: &str,
    decision: Decision,
    outcome: Outcome,
    applied: Result<()>,
) -> Result<Outcome, StoreError> {
    match applied {
        Ok(()) => Ok(outcome),
        Err(e) if decision.cleanup_only() => {
            warn!(handle = %id, error = %e, "failed to purge dead record");
            Ok(outcome)
        }
        Err(e) => Err(StoreError::Unavailable(e.context("apply consume mutation"))),
    }
}

/// Shared store handle threaded through the engine.
pub type SharedStore = Arc<dyn RecordStore>;

/// Which backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Durable single-file redb database.
    #[default]
    Redb,
    /// Volatile in-process map; contents vanish on restart.
    Memory,
}

impl std::str::FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "redb" | "disk" => Ok(Backend::Redb),
            "memory" | "mem" => Ok(Backend::Memory),
            other => anyhow::bail!("unknown storage backend {other:?} (expected redb or memory)"),
        }
    }
}

/// Open the configured backend. `data_dir` is only consulted for redb.
pub fn open(backend: Backend, data_dir: &Path) -> Result<SharedStore> {
    match backend {
        Backend::Redb => {
            let path = data_dir.join("ephemera.db");
            Ok(Arc::new(RedbStore::open(&path)?))
        }
        Backend::Memory => Ok(Arc::new(MemoryStore::new())),
    }
}
