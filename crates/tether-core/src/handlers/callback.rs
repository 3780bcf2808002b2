//! Closure-backed sync handler.

use std::future::Future;

use async_trait::async_trait;

use super::{DataSyncHandler, HandlerError};
use crate::domain::DataSyncPayload;

/// Adapts an async closure into a [`DataSyncHandler`].
///
/// # 使用例
/// ```ignore
/// let handler = FnSyncHandler::new(|payload: DataSyncPayload| async move {
///     shifts_api.write(payload).await.map_err(|e| e.to_string())
/// });
/// ```
pub struct FnSyncHandler<F> {
    f: F,
}

impl<F> FnSyncHandler<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> DataSyncHandler for FnSyncHandler<F>
where
    F: Fn(DataSyncPayload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), String>> + Send + 'static,
{
    async fn sync(&self, payload: &DataSyncPayload) -> Result<(), HandlerError> {
        (self.f)(payload.clone()).await.map_err(HandlerError::Sync)
    }
}
