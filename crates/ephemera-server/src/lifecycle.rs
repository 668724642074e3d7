//! Consume-on-read decision logic.
//!
//! [`decide`] is a pure function of a record snapshot and the current time.
//! It never touches storage: the [`RecordStore`](crate::store::RecordStore)
//! applies the returned [`Mutation`] inside the same atomic unit that produced
//! the snapshot.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::store::{Record, Secret};

/// What a single access to a handle resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Unlimited views; serve without mutation.
    Serve,
    /// More than one view left; serve and spend one.
    ServeAndDecrement,
    /// Exactly one view left; serve and delete in the same step.
    ServeLast,
    /// `expires_at` has passed; reject and purge.
    RejectExpired,
    /// Counted record with nothing left; reject and purge.
    RejectExhausted,
    /// No such record.
    RejectMissing,
}

/// Storage change that must accompany a [`Decision`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    None,
    Decrement,
    Delete,
}

/// Signature of the decision hook handed to
/// [`RecordStore::fetch_and_apply`](crate::store::RecordStore::fetch_and_apply).
pub type DecideFn = fn(Option<&Record>, i64) -> Decision;

impl Decision {
    pub fn mutation(self) -> Mutation {
        match self {
            Decision::Serve | Decision::RejectMissing => Mutation::None,
            Decision::ServeAndDecrement => Mutation::Decrement,
            Decision::ServeLast | Decision::RejectExpired | Decision::RejectExhausted => {
                Mutation::Delete
            }
        }
    }

    pub fn serves(self) -> bool {
        matches!(
            self,
            Decision::Serve | Decision::ServeAndDecrement | Decision::ServeLast
        )
    }

    /// Whether a failed mutation may be swallowed. Purging a rejected record is
    /// cleanup; retiring a served one is part of the read.
    pub fn cleanup_only(self) -> bool {
        matches!(self, Decision::RejectExpired | Decision::RejectExhausted)
    }
}

/// Decide what an access to `snapshot` at `now` (unix millis) does.
pub fn decide(snapshot: Option<&Record>, now: i64) -> Decision {
    let Some(record) = snapshot else {
        return Decision::RejectMissing;
    };

    if record.is_expired(now) {
        return Decision::RejectExpired;
    }

    match record.views_remaining {
        None => Decision::Serve,
        Some(0) => Decision::RejectExhausted,
        Some(1) => Decision::ServeLast,
        Some(_) => Decision::ServeAndDecrement,
    }
}

/// Result of one consume-on-read, as returned by the store.
///
/// The three rejection causes stay distinct here for logging; callers outside
/// the engine only ever see a single not-found.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Served; the record is still live.
    Served(Secret),
    /// Served the final permitted view; the record is gone.
    ServedLast(Secret),
    Expired,
    Exhausted,
    Missing,
}

impl Outcome {
    /// Build the outcome for `decision` taken on `snapshot`.
    pub fn resolve(decision: Decision, snapshot: Option<&Record>) -> Self {
        match (decision, snapshot) {
            (Decision::Serve | Decision::ServeAndDecrement, Some(r)) => {
                Outcome::Served(r.to_secret())
            }
            (Decision::ServeLast, Some(r)) => Outcome::ServedLast(r.to_secret()),
            (Decision::RejectExpired, _) => Outcome::Expired,
            (Decision::RejectExhausted, _) => Outcome::Exhausted,
            _ => Outcome::Missing,
        }
    }

    /// Short cause label used in audit lines.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Served(_) => "served",
            Outcome::ServedLast(_) => "burned",
            Outcome::Expired => "expired",
            Outcome::Exhausted => "exhausted",
            Outcome::Missing => "missing",
        }
    }

    pub fn into_secret(self) -> Option<Secret> {
        match self {
            Outcome::Served(s) | Outcome::ServedLast(s) => Some(s),
            _ => None,
        }
    }
}

/// Current unix time in milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
