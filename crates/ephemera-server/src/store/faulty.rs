//! A store whose consume mutations always fail, for exercising error paths.

use anyhow::anyhow;
use dashmap::DashMap;

use super::model::Record;
use super::{settle, RecordStore, StoreError};
use crate::lifecycle::{DecideFn, Mutation, Outcome};

/// Creates, deletes, and unmutated reads work. Every decrement or delete
/// issued by a consume fails as if the disk were full, and the record is
/// left as it was.
#[derive(Default)]
pub(crate) struct FailingMutations {
    records: DashMap<String, Record>,
}

impl FailingMutations {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for FailingMutations {
    fn create(&self, record: Record) -> Result<(), StoreError> {
        if self.records.contains_key(&record.id) {
            return Err(StoreError::DuplicateId(record.id.clone()));
        }
        self.records.insert(record.id.clone(), record);
        Ok(())
    }

    fn fetch_and_apply(
        &self,
        id: &str,
        now: i64,
        decide: DecideFn,
    ) -> Result<Outcome, StoreError> {
        let snapshot = self.records.get(id);
        let decision = decide(snapshot.as_deref(), now);
        let outcome = Outcome::resolve(decision, snapshot.as_deref());
        drop(snapshot);

        match decision.mutation() {
            Mutation::None => Ok(outcome),
            _ => settle(id, decision, outcome, Err(anyhow!("disk full"))),
        }
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.records.remove(id).is_some())
    }

    fn contains(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.records.contains_key(id))
    }

    fn prune(&self, now: i64) -> Result<usize, StoreError> {
        let before = self.records.len();
        self.records.retain(|_, r| !(r.is_expired(now) || r.is_exhausted()));
        Ok(before - self.records.len())
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.records.len())
    }
}
