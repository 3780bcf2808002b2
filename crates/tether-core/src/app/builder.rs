//! OfflineQueueBuilder - キューの構築とワイヤリング
//!
//! # 起動時の処理
//! - 設定の検証（Fail-fast: 不正な設定では構築しない）
//! - 永続化済み item の数を確認し、sequence カウンタを引き継ぐ（再起動からの復帰）
//! - 永続化済み item があれば timer を起動
//!
//! 省略した部品には既定値が入ります:
//! store → `InMemoryStore`、reporter → `LogReporter`、clock → `SystemClock`、
//! handlers → 空の registry（全 item が失敗するので warn を出す）。

use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use tracing::{info, warn};

use super::client::{OfflineQueue, QueueShared};
use super::engine::QueueEngine;
use super::executor::Executor;
use crate::domain::QueueError;
use crate::handlers::HandlerRegistry;
use crate::impls::InMemoryStore;
use crate::ports::{Clock, DurableStore, FailureReporter, LogReporter, SystemClock, UlidGenerator};
use crate::queue::QueueConfig;

pub struct OfflineQueueBuilder {
    config: QueueConfig,
    store: Option<Arc<dyn DurableStore>>,
    handlers: Option<HandlerRegistry>,
    reporter: Option<Arc<dyn FailureReporter>>,
    clock: Option<Arc<dyn Clock>>,
    autostart: bool,
}

impl OfflineQueueBuilder {
    pub fn new() -> Self {
        Self {
            config: QueueConfig::default(),
            store: None,
            handlers: None,
            reporter: None,
            clock: None,
            autostart: true,
        }
    }

    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(self, store: impl DurableStore + 'static) -> Self {
        self.store_arc(Arc::new(store))
    }

    /// Use a store that the caller keeps a handle to.
    pub fn store_arc(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = Some(handlers);
        self
    }

    pub fn reporter(mut self, reporter: impl FailureReporter + 'static) -> Self {
        self.reporter = Some(Arc::new(reporter));
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// When false, the timer only runs after an explicit `start()`; ticks come from `process_now()`.
    pub fn autostart(mut self, autostart: bool) -> Self {
        self.autostart = autostart;
        self
    }

    pub async fn build(self) -> Result<OfflineQueue, QueueError> {
        self.config.validate()?;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryStore::new()));
        let handlers = self.handlers.unwrap_or_else(|| {
            warn!("no handlers registered; every item will fail until its retries run out");
            HandlerRegistry::default()
        });
        let reporter = self.reporter.unwrap_or_else(|| Arc::new(LogReporter));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let engine = QueueEngine::new(
            Arc::clone(&store),
            Executor::new(handlers),
            reporter,
            Arc::clone(&clock),
            &self.config,
        )?;

        let persisted = store.get_all().await?;
        let next_sequence = persisted
            .iter()
            .map(|item| item.sequence.saturating_add(1))
            .max()
            .unwrap_or(0);
        if !persisted.is_empty() {
            info!(recovered = persisted.len(), "persisted queue items recovered");
        }

        let queue = OfflineQueue::from_shared(QueueShared {
            engine,
            store,
            ids: Box::new(UlidGenerator::new(Arc::clone(&clock))),
            clock,
            config: self.config,
            sequence: AtomicU64::new(next_sequence),
            autostart: self.autostart,
        });

        if self.autostart && !persisted.is_empty() {
            queue.start();
        }
        Ok(queue)
    }
}

impl Default for OfflineQueueBuilder {
    fn default() -> Self {
        Self::new()
    }
}
