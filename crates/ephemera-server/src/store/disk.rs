use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use dashmap::DashMap;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use tracing::{debug, info};

use super::model::Record;
use super::{settle, RecordStore, StoreError};
use crate::lifecycle::{DecideFn, Decision, Mutation, Outcome};

const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("records");

/// Durable store backed by a single redb file.
///
/// A consume holds a lock scoped to its handle, reads the snapshot in a read
/// transaction, and only opens a write transaction when the decision mutates.
/// The write re-checks the stored bytes against the snapshot and retries the
/// unit if a delete or prune got there first, so a stale snapshot is never
/// written back.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl RedbStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).context("open redb database")?;

        // Ensure the table exists so read transactions never fail on a fresh file.
        let write_txn = db.begin_write()?;
        write_txn.open_table(RECORDS)?;
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(db),
            locks: Arc::new(DashMap::new()),
        })
    }

    fn insert_new(&self, record: &Record) -> Result<bool> {
        let bytes = encode(record)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(RECORDS)?;
            if table.get(record.id.as_str())?.is_some() {
                // Dropping the transaction aborts it.
                return Ok(false);
            }
            table.insert(record.id.as_str(), bytes.as_slice())?;
        }
        write_txn.commit()?;

        debug!(handle = %record.id, "stored record");
        Ok(true)
    }

    fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        self.locks.entry(id.to_owned()).or_default().clone()
    }

    /// Drop the handle's lock entry once nobody else holds it.
    fn release(&self, id: &str) {
        self.locks.remove_if(id, |_, lock| Arc::strong_count(lock) == 1);
    }

    fn consume(&self, id: &str, now: i64, decide: DecideFn) -> Result<Outcome, StoreError> {
        let lock = self.lock_for(id);
        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.consume_locked(id, now, decide)
        };
        drop(lock);
        self.release(id);
        result
    }

    fn consume_locked(&self, id: &str, now: i64, decide: DecideFn) -> Result<Outcome, StoreError> {
        loop {
            let raw = self.read_raw(id)?;
            let snapshot = raw.as_deref().map(decode).transpose()?;
            let decision = decide(snapshot.as_ref(), now);
            let outcome = Outcome::resolve(decision, snapshot.as_ref());

            if decision.mutation() == Mutation::None {
                return Ok(outcome);
            }

            match self.apply(id, raw.as_deref(), decision, snapshot) {
                Ok(false) => {
                    debug!(handle = %id, "record changed under consume, retrying");
                }
                Ok(true) => return Ok(outcome),
                Err(e) => return settle(id, decision, outcome, Err(e)),
            }
        }
    }

    fn read_raw(&self, id: &str) -> Result<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RECORDS)?;
        // Copy the bytes out so the AccessGuard borrow on `table` ends here.
        let raw = table.get(id)?.map(|guard| guard.value().to_vec());
        Ok(raw)
    }

    /// Apply the mutation for `decision` if the stored bytes still equal
    /// `expected`. Returns false, without writing, if they changed.
    fn apply(
        &self,
        id: &str,
        expected: Option<&[u8]>,
        decision: Decision,
        snapshot: Option<Record>,
    ) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(RECORDS)?;
            let current: Option<Vec<u8>> = table.get(id)?.map(|guard| guard.value().to_vec());
            if current.as_deref() != expected {
                return Ok(false);
            }

            match decision.mutation() {
                Mutation::None => {}
                Mutation::Delete => {
                    table.remove(id)?;
                    debug!(handle = %id, ?decision, "deleted record");
                }
                Mutation::Decrement => {
                    let Some(mut record) = snapshot else {
                        anyhow::bail!("decrement decided without a snapshot");
                    };
                    record.views_remaining = record.views_remaining.map(|n| n.saturating_sub(1));
                    let updated = encode(&record)?;
                    table.insert(id, updated.as_slice())?;
                }
            }
        }
        write_txn.commit()?;
        Ok(true)
    }

    fn remove(&self, id: &str) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(RECORDS)?;
            let removed = table.remove(id)?.is_some();
            removed
        };
        write_txn.commit()?;
        Ok(existed)
    }

    fn exists(&self, id: &str) -> Result<bool> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RECORDS)?;
        let found = table.get(id)?.is_some();
        Ok(found)
    }

    fn sweep(&self, now: i64) -> Result<usize> {
        // Scan and remove under one write transaction so a record cannot be
        // re-read between being judged dead and being removed.
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(RECORDS)?;

            let mut dead = Vec::new();
            for item in table.iter()? {
                let (k, v) = item?;
                let record = decode(v.value())?;
                if record.is_expired(now) || record.is_exhausted() {
                    dead.push(k.value().to_owned());
                }
            }

            for id in &dead {
                table.remove(id.as_str())?;
            }
            dead.len()
        };
        write_txn.commit()?;

        if removed > 0 {
            info!(removed, "pruned dead records");
        }
        Ok(removed)
    }

    fn count(&self) -> Result<usize> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RECORDS)?;
        Ok(table.len()? as usize)
    }
}

impl RecordStore for RedbStore {
    fn create(&self, record: Record) -> Result<(), StoreError> {
        if self.insert_new(&record)? {
            Ok(())
        } else {
            Err(StoreError::DuplicateId(record.id.clone()))
        }
    }

    fn fetch_and_apply(
        &self,
        id: &str,
        now: i64,
        decide: DecideFn,
    ) -> Result<Outcome, StoreError> {
        self.consume(id, now, decide)
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.remove(id)?)
    }

    fn contains(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.exists(id)?)
    }

    fn prune(&self, now: i64) -> Result<usize, StoreError> {
        Ok(self.sweep(now)?)
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.count()?)
    }
}

fn encode(record: &Record) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(record, bincode::config::standard()).context("bincode encode")
}

fn decode(bytes: &[u8]) -> Result<Record> {
    let (record, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .context("bincode decode")?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::decide;
    use tempfile::tempdir;

    fn make_store() -> (RedbStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let store = RedbStore::open(&path).unwrap();
        (store, dir)
    }

    fn record(id: &str, views: Option<u32>, expires_at: Option<i64>) -> Record {
        Record {
            id: id.into(),
            payload: b"abc".to_vec(),
            iv: b"xyz".to_vec(),
            views_remaining: views,
            expires_at,
            created_at: 0,
        }
    }

    #[test]
    fn create_rejects_duplicate_id() {
        let (s, _dir) = make_store();
        s.create(record("dup", None, None)).unwrap();
        let err = s.create(record("dup", Some(3), None)).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateId(id) if id == "dup"));
        // The original record is untouched.
        let out = s.fetch_and_apply("dup", 0, decide).unwrap();
        assert!(matches!(out, Outcome::Served(_)));
    }

    #[test]
    fn decrement_then_burn() {
        let (s, _dir) = make_store();
        s.create(record("two", Some(2), None)).unwrap();

        let first = s.fetch_and_apply("two", 0, decide).unwrap();
        assert!(matches!(first, Outcome::Served(_)));
        assert!(s.contains("two").unwrap());

        let second = s.fetch_and_apply("two", 0, decide).unwrap();
        assert!(matches!(second, Outcome::ServedLast(_)));
        assert!(!s.contains("two").unwrap());

        assert_eq!(s.fetch_and_apply("two", 0, decide).unwrap(), Outcome::Missing);
    }

    #[test]
    fn expired_is_lazily_evicted() {
        let (s, _dir) = make_store();
        s.create(record("old", Some(5), Some(100))).unwrap();
        assert_eq!(s.fetch_and_apply("old", 100, decide).unwrap(), Outcome::Expired);
        assert!(!s.contains("old").unwrap());
    }

    #[test]
    fn delete_is_idempotent() {
        let (s, _dir) = make_store();
        s.create(record("d", None, None)).unwrap();
        assert!(s.delete("d").unwrap());
        assert!(!s.delete("d").unwrap());
        assert!(!s.delete("never").unwrap());
    }

    #[test]
    fn prune_removes_only_dead_records() {
        let (s, _dir) = make_store();
        s.create(record("live", None, Some(10_000))).unwrap();
        s.create(record("dead", None, Some(10))).unwrap();
        s.create(record("spent", Some(0), None)).unwrap();
        assert_eq!(s.prune(1_000).unwrap(), 2);
        assert_eq!(s.len().unwrap(), 1);
        assert!(s.contains("live").unwrap());
    }

    #[test]
    fn records_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        {
            let s = RedbStore::open(&path).unwrap();
            s.create(record("persist", Some(3), None)).unwrap();
            s.fetch_and_apply("persist", 0, decide).unwrap();
        }
        let s = RedbStore::open(&path).unwrap();
        let first = s.fetch_and_apply("persist", 0, decide).unwrap();
        assert!(matches!(first, Outcome::Served(_)));
        let last = s.fetch_and_apply("persist", 0, decide).unwrap();
        assert!(matches!(last, Outcome::ServedLast(_)));
    }

    #[test]
    fn read_only_consume_does_not_wait_on_other_writers() {
        let (s, _dir) = make_store();
        s.create(record("open", None, None)).unwrap();

        // Another writer holds redb's write lock for the whole read.
        let held = s.db.begin_write().unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        let reader = s.clone();
        let worker = std::thread::spawn(move || {
            tx.send(reader.fetch_and_apply("open", 0, decide)).unwrap();
        });

        let out = rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("unlimited read blocked behind a writer")
            .unwrap();
        assert!(matches!(out, Outcome::Served(_)));
        drop(held);
        worker.join().unwrap();
    }

    #[test]
    fn busy_handle_does_not_block_other_handles() {
        let (s, _dir) = make_store();
        s.create(record("a", Some(2), None)).unwrap();
        s.create(record("b", Some(2), None)).unwrap();

        let lock_a = s.lock_for("a");
        let _guard = lock_a.lock().unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        let reader = s.clone();
        let worker = std::thread::spawn(move || {
            tx.send(reader.fetch_and_apply("b", 0, decide)).unwrap();
        });

        let out = rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("consume of b waited on a's lock")
            .unwrap();
        assert!(matches!(out, Outcome::Served(_)));
        worker.join().unwrap();
    }

    #[test]
    fn stale_snapshot_is_not_written_back() {
        let (s, _dir) = make_store();
        s.create(record("gone", Some(3), None)).unwrap();

        let raw = s.read_raw("gone").unwrap();
        let snapshot = raw.as_deref().map(decode).transpose().unwrap();
        // A delete lands between the snapshot and the write.
        assert!(s.delete("gone").unwrap());

        let applied = s
            .apply("gone", raw.as_deref(), Decision::ServeAndDecrement, snapshot)
            .unwrap();
        assert!(!applied);
        assert!(!s.contains("gone").unwrap());
        assert_eq!(s.fetch_and_apply("gone", 0, decide).unwrap(), Outcome::Missing);
    }

    #[test]
    fn lock_entries_are_released() {
        let (s, _dir) = make_store();
        s.create(record("once", Some(1), None)).unwrap();
        s.fetch_and_apply("once", 0, decide).unwrap();
        s.fetch_and_apply("never", 0, decide).unwrap();
        assert!(s.locks.is_empty());
    }
}
