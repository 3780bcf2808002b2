//! HandlerRegistry - kind ごとの handler を保持
//!
//! # 設計
//! - 初期化時に builder で組み立て（可変）
//! - 実行時は不変（clone して Executor に渡す、ロック不要）
//! - `require()` で期待する kind を宣言すると、`build()` 時に不足を検出（Fail-fast）

use std::sync::Arc;

use super::http::{HttpApiCallHandler, HttpConfig, HttpFileUploadHandler, HttpTransport, RestSyncHandler};
use super::{ApiCallHandler, DataSyncHandler, FileUploadHandler, HandlerError};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("handler for kind '{0}' is already registered")]
    AlreadyRegistered(&'static str),

    #[error("missing handlers for kinds: {0:?}")]
    MissingHandlers(Vec<String>),

    #[error("failed to build http handlers: {0}")]
    Http(String),
}

/// One optional handler per item kind.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    api_call: Option<Arc<dyn ApiCallHandler>>,
    data_sync: Option<Arc<dyn DataSyncHandler>>,
    file_upload: Option<Arc<dyn FileUploadHandler>>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    /// ApiCall / FileUpload over plain HTTP and DataSync as REST row writes, sharing one client.
    pub fn http(config: HttpConfig) -> Result<Self, RegistryError> {
        let transport =
            HttpTransport::new(config).map_err(|e: HandlerError| RegistryError::Http(e.to_string()))?;
        Self::builder()
            .api_call(HttpApiCallHandler::new(transport.clone()))?
            .data_sync(RestSyncHandler::new(transport.clone()))?
            .file_upload(HttpFileUploadHandler::new(transport))?
            .build()
    }

    pub fn api_call(&self) -> Option<&Arc<dyn ApiCallHandler>> {
        self.api_call.as_ref()
    }

    pub fn data_sync(&self) -> Option<&Arc<dyn DataSyncHandler>> {
        self.data_sync.as_ref()
    }

    pub fn file_upload(&self) -> Option<&Arc<dyn FileUploadHandler>> {
        self.file_upload.as_ref()
    }

    /// Kind names (`ItemKind::type_name`) that have a handler.
    pub fn registered_types(&self) -> Vec<&'static str> {
        let mut types = Vec::new();
        if self.api_call.is_some() {
            types.push("api_call");
        }
        if self.data_sync.is_some() {
            types.push("data_sync");
        }
        if self.file_upload.is_some() {
            types.push("file_upload");
        }
        types
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("registered", &self.registered_types())
            .finish()
    }
}

#[derive(Default)]
pub struct HandlerRegistryBuilder {
    registry: HandlerRegistry,
    required: Option<Vec<String>>,
}

impl HandlerRegistryBuilder {
    pub fn api_call(mut self, handler: impl ApiCallHandler + 'static) -> Result<Self, RegistryError> {
        if self.registry.api_call.is_some() {
            return Err(RegistryError::AlreadyRegistered("api_call"));
        }
        self.registry.api_call = Some(Arc::new(handler));
        Ok(self)
    }

    pub fn data_sync(mut self, handler: impl DataSyncHandler + 'static) -> Result<Self, RegistryError> {
        if self.registry.data_sync.is_some() {
            return Err(RegistryError::AlreadyRegistered("data_sync"));
        }
        self.registry.data_sync = Some(Arc::new(handler));
        Ok(self)
    }

    pub fn file_upload(
        mut self,
        handler: impl FileUploadHandler + 'static,
    ) -> Result<Self, RegistryError> {
        if self.registry.file_upload.is_some() {
            return Err(RegistryError::AlreadyRegistered("file_upload"));
        }
        self.registry.file_upload = Some(Arc::new(handler));
        Ok(self)
    }

    /// Kinds that must have a handler when `build()` is called.
    pub fn require(mut self, kinds: &[&str]) -> Self {
        self.required = Some(kinds.iter().map(|k| k.to_string()).collect());
        self
    }

    pub fn build(self) -> Result<HandlerRegistry, RegistryError> {
        if let Some(required) = &self.required {
            let registered = self.registry.registered_types();
            let missing: Vec<String> = required
                .iter()
                .filter(|k| !registered.contains(&k.as_str()))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(RegistryError::MissingHandlers(missing));
            }
        }
        Ok(self.registry)
    }
}
