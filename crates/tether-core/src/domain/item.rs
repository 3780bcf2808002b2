//! Queue item: one pending unit of work plus its retry bookkeeping.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ItemId, ItemKind, Priority};
use crate::queue::BackoffPolicy;

/// One persisted unit of work.
///
/// Design:
/// - This is the only record the Durable Store keeps; there is no separate state column.
///   "In-flight" lives in the engine's volatile set, "done" and "dead" mean deleted.
/// - `attempt_count < max_attempts` holds for every item that is still stored.
/// - `backoff_delay` only grows while the item exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: ItemId,
    pub kind: ItemKind,
    pub priority: Priority,

    /// Number of execution attempts so far.
    pub attempt_count: u32,

    /// Ceiling before permanent abandonment (always >= 1).
    pub max_attempts: u32,

    pub enqueued_at: DateTime<Utc>,

    /// Insertion counter; breaks `enqueued_at` ties within one millisecond.
    pub sequence: u64,

    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,

    /// Wait after `last_attempt_at` before the item is eligible again.
    #[serde(rename = "backoff_ms", with = "duration_ms")]
    pub backoff_delay: Duration,

    #[serde(default)]
    pub last_error: Option<String>,
}

/// What the engine must do with an item after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Persist the updated item; it becomes eligible after `backoff_delay`.
    Retry,
    /// Retry budget exhausted; delete and report.
    Abandon,
}

impl QueueItem {
    pub fn new(
        id: ItemId,
        kind: ItemKind,
        priority: Priority,
        max_attempts: u32,
        enqueued_at: DateTime<Utc>,
        sequence: u64,
        initial_backoff: Duration,
    ) -> Self {
        Self {
            id,
            kind,
            priority,
            attempt_count: 0,
            max_attempts,
            enqueued_at,
            sequence,
            last_attempt_at: None,
            backoff_delay: initial_backoff,
            last_error: None,
        }
    }

    /// Never attempted, or the backoff since the last attempt has fully elapsed.
    ///
    /// If the clock reads earlier than `last_attempt_at` the item waits until it catches up.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        let Some(last) = self.last_attempt_at else {
            return true;
        };
        match now.signed_duration_since(last).to_std() {
            Ok(elapsed) => elapsed >= self.backoff_delay,
            Err(_) => false,
        }
    }

    /// When the item becomes eligible, `None` if it already is runnable from the start.
    pub fn next_eligible_at(&self) -> Option<DateTime<Utc>> {
        let last = self.last_attempt_at?;
        let delay = chrono::Duration::from_std(self.backoff_delay).ok()?;
        last.checked_add_signed(delay)
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt_count >= self.max_attempts
    }

    /// Apply one failed attempt.
    ///
    /// The first failure keeps the initial (base) delay, so the wait before attempt 2 is the
    /// base backoff; every later failure grows it through the policy.
    pub fn record_failure(
        &mut self,
        now: DateTime<Utc>,
        error: impl Into<String>,
        policy: &BackoffPolicy,
    ) -> FailureDisposition {
        if self.attempt_count > 0 {
            self.backoff_delay = policy.next_delay(self.backoff_delay);
        }
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.last_attempt_at = Some(now);
        self.last_error = Some(error.into());

        if self.is_exhausted() {
            FailureDisposition::Abandon
        } else {
            FailureDisposition::Retry
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        let ms = u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
        s.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
