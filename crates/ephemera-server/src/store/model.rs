use serde::{Deserialize, Serialize};
use zeroize::ZeroizeOnDrop;

/// A stored secret. `payload` and `iv` are client-side ciphertext and are
/// never interpreted here; all lifecycle metadata is plaintext so the sweep
/// can evict without touching the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ZeroizeOnDrop)]
pub struct Record {
    /// Opaque handle, the sole lookup key.
    pub id: String,
    pub payload: Vec<u8>,
    pub iv: Vec<u8>,
    /// Remaining successful reads. `None` means unlimited.
    pub views_remaining: Option<u32>,
    /// Unix timestamp (milliseconds) at or after which the record is dead.
    pub expires_at: Option<i64>,
    /// Unix timestamp (milliseconds) of creation.
    pub created_at: i64,
}

impl Record {
    /// Returns true if this record has expired by time only.
    pub fn is_expired(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(exp) if now >= exp)
    }

    /// Returns true if the view budget is spent. Unlimited records never are.
    pub fn is_exhausted(&self) -> bool {
        matches!(self.views_remaining, Some(n) if n < 1)
    }

    /// Payload and iv as handed back to a reader.
    pub fn to_secret(&self) -> Secret {
        Secret {
            payload: self.payload.clone(),
            iv: self.iv.clone(),
        }
    }
}

/// The bytes returned by a successful read, verbatim as supplied on create.
#[derive(Debug, Clone, PartialEq, Eq, ZeroizeOnDrop)]
pub struct Secret {
    payload: Vec<u8>,
    iv: Vec<u8>,
}

impl Secret {
    pub fn new(payload: Vec<u8>, iv: Vec<u8>) -> Self {
        Self { payload, iv }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn iv(&self) -> &[u8] {
        &self.iv
    }
}
