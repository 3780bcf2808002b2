//! InMemoryStore - 揮発ストア
//!
//! テストや「再起動をまたがなくてよい」用途向け。プロセス終了で内容は消えます。

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{ItemId, QueueItem};
use crate::ports::{DurableStore, StorageError};

#[derive(Debug, Default)]
pub struct InMemoryStore {
    items: Mutex<HashMap<ItemId, QueueItem>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }
}

#[async_trait]
impl DurableStore for InMemoryStore {
    async fn put(&self, item: &QueueItem) -> Result<(), StorageError> {
        self.items.lock().await.insert(item.id, item.clone());
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<QueueItem>, StorageError> {
        Ok(self.items.lock().await.values().cloned().collect())
    }

    async fn delete(&self, id: &ItemId) -> Result<(), StorageError> {
        self.items.lock().await.remove(id);
        Ok(())
    }
}
