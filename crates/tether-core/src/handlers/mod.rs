//! Handlers - kind ごとの実行ロジックと registry
//!
//! - **handler**: `ApiCallHandler` / `DataSyncHandler` / `FileUploadHandler` trait
//! - **registry**: `HandlerRegistry`（build 時に固定、実行時は不変）
//! - **http**: reqwest による組み込み実装
//! - **callback**: クロージャを DataSync handler にするアダプタ

pub mod callback;
pub mod handler;
pub mod http;
pub mod registry;

pub use self::callback::FnSyncHandler;
pub use self::handler::{ApiCallHandler, DataSyncHandler, FileUploadHandler, HandlerError};
pub use self::http::{
    HttpApiCallHandler, HttpConfig, HttpFileUploadHandler, HttpTransport, RestSyncHandler,
};
pub use self::registry::{HandlerRegistry, HandlerRegistryBuilder, RegistryError};
