//! OfflineQueue - アプリケーション向けの窓口（Client Façade）
//!
//! 起動時に 1 度だけ構築し、clone して各所に渡します（グローバルな singleton は持たない）。
//!
//! # 使用例
//! ```ignore
//! let queue = OfflineQueue::builder()
//!     .config(QueueConfig::default())
//!     .store(SqliteStore::open("queue.db")?)
//!     .handlers(HandlerRegistry::http(http_config)?)
//!     .build()
//!     .await?;
//!
//! let id = queue
//!     .enqueue(ItemKind::ApiCall(ApiCallPayload::new("POST", "/shifts")), Priority::High, None)
//!     .await?;
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

use super::builder::OfflineQueueBuilder;
use super::engine::{EngineState, QueueEngine, TickReport};
use super::status::QueueStats;
use crate::domain::{ItemId, ItemKind, Priority, QueueError, QueueItem};
use crate::ports::{Clock, DurableStore, IdGenerator};
use crate::queue::QueueConfig;

pub(crate) struct QueueShared {
    pub(crate) engine: QueueEngine,
    pub(crate) store: Arc<dyn DurableStore>,
    pub(crate) ids: Box<dyn IdGenerator>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: QueueConfig,
    pub(crate) sequence: AtomicU64,
    pub(crate) autostart: bool,
}

/// Cheap to clone; every clone drives the same engine and store.
#[derive(Clone)]
pub struct OfflineQueue {
    shared: Arc<QueueShared>,
}

impl OfflineQueue {
    pub fn builder() -> OfflineQueueBuilder {
        OfflineQueueBuilder::new()
    }

    pub(crate) fn from_shared(shared: QueueShared) -> Self {
        Self {
            shared: Arc::new(shared),
        }
    }

    /// Persist a new item and make sure the timer runs. Never waits for execution.
    ///
    /// `max_attempts` defaults to `max_retries` from the configuration.
    pub async fn enqueue(
        &self,
        kind: ItemKind,
        priority: Priority,
        max_attempts: Option<u32>,
    ) -> Result<ItemId, QueueError> {
        kind.validate()?;
        let max_attempts = max_attempts.unwrap_or(self.shared.config.max_retries);
        if max_attempts == 0 {
            return Err(QueueError::InvalidItem(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        let item = QueueItem::new(
            self.shared.ids.generate_item_id(),
            kind,
            priority,
            max_attempts,
            self.shared.clock.now(),
            self.shared.sequence.fetch_add(1, Ordering::Relaxed),
            self.shared.config.backoff_policy().base_delay,
        );
        self.shared.store.put(&item).await?;

        info!(
            item_id = %item.id,
            kind = item.kind.type_name(),
            priority = %item.priority,
            max_attempts,
            "item enqueued"
        );

        if self.shared.autostart {
            self.shared.engine.start();
        }
        Ok(item.id)
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let items = self.shared.store.get_all().await?;
        let in_flight = self.shared.engine.in_flight_ids();
        Ok(QueueStats::from_items(&items, &in_flight))
    }

    /// Remove every persisted item; returns how many were removed.
    pub async fn clear(&self) -> Result<usize, QueueError> {
        Ok(self.shared.engine.clear().await?)
    }

    /// Run one tick immediately instead of waiting for the timer.
    pub async fn process_now(&self) -> TickReport {
        self.shared.engine.tick().await
    }

    pub fn start(&self) {
        self.shared.engine.start();
    }

    pub async fn stop(&self) {
        self.shared.engine.stop().await;
    }

    pub fn is_running(&self) -> bool {
        self.shared.engine.is_running()
    }

    pub fn engine_state(&self) -> EngineState {
        self.shared.engine.state()
    }

    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }
}

impl std::fmt::Debug for OfflineQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineQueue")
            .field("config", &self.shared.config)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ApiCallPayload, DataSyncPayload, SyncOperation};
    use crate::handlers::{ApiCallHandler, HandlerError, HandlerRegistry};
    use crate::impls::InMemoryStore;
    use crate::ports::ManualClock;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    struct OkApi;

    #[async_trait]
    impl ApiCallHandler for OkApi {
        async fn call(&self, _payload: &ApiCallPayload) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    async fn queue(store: Arc<InMemoryStore>) -> OfflineQueue {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 4, 1, 8, 0, 0).unwrap(),
        ));
        OfflineQueue::builder()
            .store_arc(store)
            .handlers(
                HandlerRegistry::builder()
                    .api_call(OkApi)
                    .unwrap()
                    .build()
                    .unwrap(),
            )
            .clock(clock)
            .autostart(false)
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn enqueue_persists_fresh_item() {
        let store = Arc::new(InMemoryStore::new());
        let q = queue(Arc::clone(&store)).await;

        let id = q
            .enqueue(
                ItemKind::ApiCall(ApiCallPayload::new("POST", "/shifts")),
                Priority::High,
                None,
            )
            .await
            .unwrap();

        let items = store.get_all().await.unwrap();
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.id, id);
        assert_eq!(item.attempt_count, 0);
        assert_eq!(item.max_attempts, 3);
        assert_eq!(item.backoff_delay, Duration::from_millis(1000));
        assert!(!q.is_running());
    }

    #[tokio::test]
    async fn enqueue_rejects_bad_input() {
        let q = queue(Arc::new(InMemoryStore::new())).await;

        let zero = q
            .enqueue(
                ItemKind::ApiCall(ApiCallPayload::new("POST", "/shifts")),
                Priority::Low,
                Some(0),
            )
            .await;
        assert!(matches!(zero, Err(QueueError::InvalidItem(_))));

        let malformed = q
            .enqueue(
                ItemKind::DataSync(DataSyncPayload::new("shifts", SyncOperation::Delete)),
                Priority::Low,
                None,
            )
            .await;
        assert!(matches!(malformed, Err(QueueError::InvalidItem(_))));
        assert!(q.stats().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sequence_increases_per_enqueue() {
        let store = Arc::new(InMemoryStore::new());
        let q = queue(Arc::clone(&store)).await;
        for _ in 0..3 {
            q.enqueue(
                ItemKind::ApiCall(ApiCallPayload::new("GET", "/ping")),
                Priority::Medium,
                None,
            )
            .await
            .unwrap();
        }
        let mut seqs: Vec<u64> = store
            .get_all()
            .await
            .unwrap()
            .iter()
            .map(|i| i.sequence)
            .collect();
        seqs.sort_unstable();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn process_now_drains_and_clear_reports_count() {
        let q = queue(Arc::new(InMemoryStore::new())).await;
        q.enqueue(
            ItemKind::ApiCall(ApiCallPayload::new("POST", "/a")),
            Priority::Medium,
            None,
        )
        .await
        .unwrap();

        let report = q.process_now().await;
        assert_eq!(report.succeeded, 1);
        assert_eq!(q.stats().await.unwrap().total, 0);

        q.enqueue(
            ItemKind::ApiCall(ApiCallPayload::new("POST", "/b")),
            Priority::Medium,
            None,
        )
        .await
        .unwrap();
        assert_eq!(q.clear().await.unwrap(), 1);
        assert_eq!(q.clear().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn enqueue_starts_timer_when_autostart_is_on() {
        let q = OfflineQueue::builder().build().await.unwrap();
        q.enqueue(
            ItemKind::ApiCall(ApiCallPayload::new("POST", "/a")),
            Priority::Medium,
            None,
        )
        .await
        .unwrap();
        assert!(q.is_running());
        q.stop().await;
        assert!(!q.is_running());
    }
}
