//! Ports - 抽象化レイヤー
//!
//! キューが外部に依存する境界（永続化・時刻・ID 生成・失敗通知）を trait として定義します。
//! Handler（API 呼び出し・データ同期・アップロード）の境界は `handlers` にあります。

pub mod clock;
pub mod id_generator;
pub mod reporter;
pub mod store;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::reporter::{Abandoned, ChannelReporter, FailureReporter, LogReporter};
pub use self::store::{DurableStore, StorageError};
