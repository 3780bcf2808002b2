//! DurableStore port - キューの永続化
//!
//! 1 item = 1 record の単純な key-value 契約です。
//! 複数 item をまたぐトランザクションは要求しません。
//!
//! # 実装
//! - `impls::InMemoryStore`（テスト・揮発用途）
//! - `impls::SqliteStore`（本番用、埋め込み SQLite）

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{ItemId, QueueItem};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend failure: {0}")]
    Backend(String),

    #[error("failed to (de)serialize queue item: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("storage task did not complete: {0}")]
    TaskJoin(String),
}

/// Persistence used by the queue to survive restarts.
///
/// # 契約
/// - `put` は id による upsert
/// - `get_all` の順序は保証しない（並び替えは Scheduler の責務）
/// - `delete` は冪等（存在しない id でもエラーにしない）
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn put(&self, item: &QueueItem) -> Result<(), StorageError>;

    async fn get_all(&self) -> Result<Vec<QueueItem>, StorageError>;

    async fn delete(&self, id: &ItemId) -> Result<(), StorageError>;
}
