//! Status - キューのスナップショット
//!
//! store の内容と volatile な in-flight 集合から計算します（読み取り専用）。

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::domain::{ItemId, ItemKind, Priority, QueueItem};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Items currently persisted.
    pub total: usize,
    /// Persisted items not being executed right now.
    pub pending: usize,
    pub in_flight: usize,
    /// Persisted items that have failed at least once.
    pub retrying: usize,
    pub by_priority: BTreeMap<Priority, usize>,
    pub by_type: BTreeMap<String, usize>,
}

impl QueueStats {
    pub fn from_items(items: &[QueueItem], in_flight: &HashSet<ItemId>) -> Self {
        // every tier and kind shows up, even at zero
        let mut by_priority: BTreeMap<Priority, usize> =
            Priority::ALL.iter().map(|p| (*p, 0)).collect();
        let mut by_type: BTreeMap<String, usize> = ItemKind::TYPE_NAMES
            .iter()
            .map(|t| (t.to_string(), 0))
            .collect();

        let mut pending = 0;
        let mut retrying = 0;
        for item in items {
            *by_priority.entry(item.priority).or_default() += 1;
            *by_type.entry(item.kind.type_name().to_string()).or_default() += 1;
            if !in_flight.contains(&item.id) {
                pending += 1;
            }
            if item.attempt_count > 0 {
                retrying += 1;
            }
        }

        Self {
            total: items.len(),
            pending,
            in_flight: in_flight.len(),
            retrying,
            by_priority,
            by_type,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0 && self.in_flight == 0
    }
}
