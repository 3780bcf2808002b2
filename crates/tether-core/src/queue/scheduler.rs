//! Scheduler: picks what runs next.
//!
//! # Algorithm
//! 1. drop items that are in flight or still backing off
//! 2. order by priority (High first), then `enqueued_at`, then `sequence`
//! 3. cut into batches of `concurrency`
//!
//! Ordering never looks at the id or the payload.

use std::cmp::Reverse;
use std::collections::HashSet;

use chrono::{DateTime, Utc};

use super::ConfigError;
use crate::domain::{ItemId, QueueItem};

#[derive(Debug, Clone)]
pub struct Scheduler {
    concurrency: usize,
}

impl Scheduler {
    pub fn new(concurrency: usize) -> Result<Self, ConfigError> {
        if concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        Ok(Self { concurrency })
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Eligible items in execution order, not yet batched.
    pub fn eligible(
        &self,
        items: Vec<QueueItem>,
        in_flight: &HashSet<ItemId>,
        now: DateTime<Utc>,
    ) -> Vec<QueueItem> {
        let mut ready: Vec<QueueItem> = items
            .into_iter()
            .filter(|item| !in_flight.contains(&item.id) && item.is_eligible(now))
            .collect();
        ready.sort_by_key(|item| (Reverse(item.priority), item.enqueued_at, item.sequence));
        ready
    }

    /// Eligible items cut into batches; each batch runs to completion before the next starts.
    pub fn plan(
        &self,
        items: Vec<QueueItem>,
        in_flight: &HashSet<ItemId>,
        now: DateTime<Utc>,
    ) -> Vec<Vec<QueueItem>> {
        let ready = self.eligible(items, in_flight, now);
        let mut batches = Vec::with_capacity(ready.len().div_ceil(self.concurrency));
        let mut iter = ready.into_iter().peekable();
        while iter.peek().is_some() {
            batches.push(iter.by_ref().take(self.concurrency).collect());
        }
        batches
    }
}
