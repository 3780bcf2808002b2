//! Executor - 1 item を対応する handler に渡して結果を返す
//!
//! handler のエラー・未登録・payload 不正はすべて `DispatchOutcome::Failed` になり、
//! ここから外へは漏れません。永続化は行いません（Engine の責務）。

use tracing::debug;

use crate::domain::{ItemKind, QueueItem};
use crate::handlers::{HandlerError, HandlerRegistry};

/// Result of one execution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Succeeded,
    Failed(String),
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DispatchOutcome::Succeeded)
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            DispatchOutcome::Succeeded => None,
            DispatchOutcome::Failed(e) => Some(e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Executor {
    registry: HandlerRegistry,
}

impl Executor {
    pub fn new(registry: HandlerRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Execute one item.
    pub async fn execute(&self, item: &QueueItem) -> DispatchOutcome {
        match self.dispatch(&item.kind).await {
            Ok(()) => DispatchOutcome::Succeeded,
            Err(err) => {
                debug!(
                    item_id = %item.id,
                    kind = item.kind.type_name(),
                    attempt = item.attempt_count + 1,
                    error = %err,
                    "handler failed"
                );
                DispatchOutcome::Failed(err.to_string())
            }
        }
    }

    async fn dispatch(&self, kind: &ItemKind) -> Result<(), HandlerError> {
        // records written by an older build may not satisfy today's rules
        kind.validate()?;
        match kind {
            ItemKind::ApiCall(payload) => {
                let handler = self
                    .registry
                    .api_call()
                    .ok_or(HandlerError::NotRegistered("api_call"))?;
                handler.call(payload).await
            }
            ItemKind::DataSync(payload) => {
                let handler = self
                    .registry
                    .data_sync()
                    .ok_or(HandlerError::NotRegistered("data_sync"))?;
                handler.sync(payload).await
            }
            ItemKind::FileUpload(payload) => {
                let handler = self
                    .registry
                    .file_upload()
                    .ok_or(HandlerError::NotRegistered("file_upload"))?;
                handler.upload(payload).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        ApiCallPayload, DataSyncPayload, FileUploadPayload, ItemId, Priority, SyncOperation,
    };
    use crate::handlers::{ApiCallHandler, FnSyncHandler};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::time::Duration;
    use ulid::Ulid;

    struct StatusApi(u16);

    #[async_trait]
    impl ApiCallHandler for StatusApi {
        async fn call(&self, _payload: &ApiCallPayload) -> Result<(), HandlerError> {
            if (200..300).contains(&self.0) {
                Ok(())
            } else {
                Err(HandlerError::Status {
                    status: self.0,
                    body: String::new(),
                })
            }
        }
    }

    fn item(kind: ItemKind) -> QueueItem {
        QueueItem::new(
            ItemId::from_ulid(Ulid::new()),
            kind,
            Priority::Medium,
            3,
            Utc::now(),
            0,
            Duration::from_secs(1),
        )
    }

    fn executor(status: u16) -> Executor {
        let registry = HandlerRegistry::builder()
            .api_call(StatusApi(status))
            .unwrap()
            .data_sync(FnSyncHandler::new(|p: DataSyncPayload| async move {
                if p.entity == "shifts" {
                    Ok(())
                } else {
                    Err("rejected".to_string())
                }
            }))
            .unwrap()
            .build()
            .unwrap();
        Executor::new(registry)
    }

    #[tokio::test]
    async fn success_status_is_success() {
        let outcome = executor(204)
            .execute(&item(ItemKind::ApiCall(ApiCallPayload::new("POST", "/x"))))
            .await;
        assert!(outcome.is_success());
        assert_eq!(outcome.error(), None);
    }

    #[tokio::test]
    async fn handler_error_becomes_failure() {
        let outcome = executor(500)
            .execute(&item(ItemKind::ApiCall(ApiCallPayload::new("POST", "/x"))))
            .await;
        assert!(!outcome.is_success());
        assert!(outcome.error().unwrap().contains("500"));
    }

    #[tokio::test]
    async fn malformed_payload_is_a_failure_not_a_crash() {
        let outcome = executor(200)
            .execute(&item(ItemKind::ApiCall(ApiCallPayload::new("", ""))))
            .await;
        assert!(matches!(outcome, DispatchOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn sync_callback_result_is_respected() {
        let exec = executor(200);
        let ok = exec
            .execute(&item(ItemKind::DataSync(DataSyncPayload::new(
                "shifts",
                SyncOperation::Create,
            ))))
            .await;
        let failed = exec
            .execute(&item(ItemKind::DataSync(DataSyncPayload::new(
                "unknown",
                SyncOperation::Create,
            ))))
            .await;
        assert!(ok.is_success());
        assert_eq!(failed, DispatchOutcome::Failed("sync failed: rejected".into()));
    }

    #[tokio::test]
    async fn unregistered_kind_fails() {
        let outcome = executor(200)
            .execute(&item(ItemKind::FileUpload(FileUploadPayload::new(
                "/tmp/a.pdf",
                "/uploads",
            ))))
            .await;
        assert_eq!(
            outcome,
            DispatchOutcome::Failed("no handler registered for file_upload".into())
        );
    }
}
