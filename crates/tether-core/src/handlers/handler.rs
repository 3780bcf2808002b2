//! Handler traits - kind ごとの実行ロジック
//!
//! kind は閉じた集合（ApiCall / DataSync / FileUpload）なので、
//! 汎用の `Handler<T>` ではなく kind ごとに型付きの trait を 1 つずつ定義します。
//! Executor はこれらを `match` で呼び分けます。

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{ApiCallPayload, DataSyncPayload, FileUploadPayload, InvalidPayload};

/// Why a handler invocation failed. Never escapes the Executor.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    InvalidPayload(#[from] InvalidPayload),

    #[error("no handler registered for {0}")]
    NotRegistered(&'static str),

    #[error("relative target '{0}' but no base_url is configured")]
    MissingBaseUrl(String),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server responded {status}: {body}")]
    Status { status: u16, body: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sync failed: {0}")]
    Sync(String),
}

#[async_trait]
pub trait ApiCallHandler: Send + Sync {
    async fn call(&self, payload: &ApiCallPayload) -> Result<(), HandlerError>;
}

/// Pluggable domain reconciliation (e.g. writing a shift row to the backend).
#[async_trait]
pub trait DataSyncHandler: Send + Sync {
    async fn sync(&self, payload: &DataSyncPayload) -> Result<(), HandlerError>;
}

#[async_trait]
pub trait FileUploadHandler: Send + Sync {
    async fn upload(&self, payload: &FileUploadPayload) -> Result<(), HandlerError>;
}
