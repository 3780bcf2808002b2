//! Errors - 呼び出し側に同期的に返るエラー
//!
//! Handler の失敗や tick 中のストレージ失敗はここに現れません。
//! それらは Engine 内で状態遷移（retry / abandon）とログに変換されます。

use thiserror::Error;

use super::InvalidPayload;
use crate::handlers::RegistryError;
use crate::ports::StorageError;
use crate::queue::ConfigError;

/// Errors surfaced to application code from the façade (`enqueue`, `stats`, `clear`, `build`).
#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("invalid queue item: {0}")]
    InvalidItem(String),
}

impl From<InvalidPayload> for QueueError {
    fn from(err: InvalidPayload) -> Self {
        QueueError::InvalidItem(err.to_string())
    }
}

impl QueueError {
    pub fn is_storage(&self) -> bool {
        matches!(self, QueueError::Storage(_))
    }
}
