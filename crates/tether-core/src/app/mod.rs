//! App - アプリケーション層
//!
//! ports / queue / handlers を組み合わせてキューを動かします。
//!
//! # 主要コンポーネント
//! - **Executor**: 1 item を handler に渡して成否を返す
//! - **QueueEngine**: tick（batch 単位の並行実行と結果の反映）と定期タイマー
//! - **OfflineQueue**: アプリケーション向けの窓口（enqueue / stats / clear）
//! - **OfflineQueueBuilder**: 構築とワイヤリング
//! - **QueueStats**: スナップショット

pub mod builder;
pub mod client;
pub mod engine;
pub mod executor;
pub mod status;

pub use self::builder::OfflineQueueBuilder;
pub use self::client::OfflineQueue;
pub use self::engine::{EngineState, QueueEngine, TickReport};
pub use self::executor::{DispatchOutcome, Executor};
pub use self::status::QueueStats;
