//! tether-core
//!
//! Durable offline operation queue: work that must reach a backend (API calls,
//! record syncs, file uploads) is persisted first and executed later with
//! priority ordering, bounded concurrency and exponential backoff.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, priority, kind/payload, QueueItem, errors）
//! - **ports**: 抽象化レイヤー（DurableStore, Clock, IdGenerator, FailureReporter）
//! - **impls**: DurableStore の実装（InMemoryStore, SqliteStore）
//! - **queue**: 設定・backoff・スケジューリング（QueueConfig, BackoffPolicy, Scheduler）
//! - **handlers**: kind ごとの handler trait と組み込み HTTP 実装、HandlerRegistry
//! - **app**: Executor, QueueEngine, OfflineQueue（窓口）と builder

pub mod app;
pub mod domain;
pub mod handlers;
pub mod impls;
pub mod ports;
pub mod queue;

pub use app::{OfflineQueue, OfflineQueueBuilder, QueueStats, TickReport};
pub use domain::{
    ApiCallPayload, DataSyncPayload, FileUploadPayload, ItemId, ItemKind, Priority, QueueError,
    QueueItem, SyncOperation,
};
pub use handlers::{HandlerRegistry, HttpConfig};
pub use impls::{InMemoryStore, SqliteStore};
pub use queue::QueueConfig;
