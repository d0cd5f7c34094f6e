// Semaphore Domain Model (concurrency-key gate)

use serde::{Deserialize, Serialize};

use crate::domain::job::Timestamp;

/// Counting semaphore row for one concurrency key
///
/// `value` is the number of free slots; a job may become Ready only after
/// decrementing it from a positive value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Semaphore {
    pub key: String,
    pub value: i32,
    pub limit: i32,
    pub expires_at: Timestamp,
}

impl Semaphore {
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at <= now
    }

    pub fn has_capacity(&self) -> bool {
        self.value > 0
    }

    /// Slots currently held
    pub fn in_use(&self) -> i32 {
        (self.limit - self.value).max(0)
    }
}
