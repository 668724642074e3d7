use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};

use super::model::Record;
use super::{RecordStore, StoreError};
use crate::lifecycle::{DecideFn, Mutation, Outcome};

/// Volatile in-process store.
///
/// Records live in a sharded [`DashMap`]. A consume holds the shard's write
/// lock through the entry API for the whole read-decide-mutate step, so
/// readers of one handle are serialized while handles in other shards
/// proceed untouched.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<DashMap<String, Record>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryStore {
    fn create(&self, record: Record) -> Result<(), StoreError> {
        match self.records.entry(record.id.clone()) {
            Entry::Occupied(e) => Err(StoreError::DuplicateId(e.key().clone())),
            Entry::Vacant(e) => {
                debug!(handle = %record.id, "stored record");
                e.insert(record);
                Ok(())
            }
        }
    }

    fn fetch_and_apply(
        &self,
        id: &str,
        now: i64,
        decide: DecideFn,
    ) -> Result<Outcome, StoreError> {
        match self.records.entry(id.to_owned()) {
            Entry::Vacant(_) => Ok(Outcome::resolve(decide(None, now), None)),
            Entry::Occupied(mut e) => {
                let decision = decide(Some(e.get()), now);
                let outcome = Outcome::resolve(decision, Some(e.get()));
                match decision.mutation() {
                    Mutation::None => {}
                    Mutation::Decrement => {
                        let record = e.get_mut();
                        record.views_remaining =
                            record.views_remaining.map(|n| n.saturating_sub(1));
                    }
                    Mutation::Delete => {
                        e.remove();
                        debug!(handle = %id, ?decision, "deleted record");
                    }
                }
                Ok(outcome)
            }
        }
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.records.remove(id).is_some())
    }

    fn contains(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.records.contains_key(id))
    }

    fn prune(&self, now: i64) -> Result<usize, StoreError> {
        let mut removed = 0usize;
        self.records.retain(|_, record| {
            let dead = record.is_expired(now) || record.is_exhausted();
            if dead {
                removed += 1;
            }
            !dead
        });
        if removed > 0 {
            info!(removed, "pruned dead records");
        }
        Ok(removed)
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.records.len())
    }
}
