//! Impls - DurableStore の実装
//!
//! - **InMemoryStore**: 揮発（テスト・開発用）
//! - **SqliteStore**: 埋め込み SQLite（再起動後も item が残る）

pub mod memory_store;
pub mod sqlite_store;

pub use self::memory_store::InMemoryStore;
pub use self::sqlite_store::SqliteStore;
