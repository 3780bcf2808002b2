//! Domain model (ids, priority, item kinds, queue items, errors).

pub mod errors;
pub mod ids;
pub mod item;
pub mod kind;
pub mod priority;

pub use self::errors::QueueError;
pub use self::ids::ItemId;
pub use self::item::{FailureDisposition, QueueItem};
pub use self::kind::{
    ApiCallPayload, DataSyncPayload, FileUploadPayload, InvalidPayload, ItemKind, SyncOperation,
};
pub use self::priority::{ParsePriorityError, Priority};
