// src/store/memory.rs
// In-process store, used by tests and short-lived embedders

use super::{Collection, Index, Store, StoreResult, Write};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<Collection, BTreeMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, collection: Collection, id: &str) -> StoreResult<Option<Value>> {
        let guard = self.collections.read().await;
        Ok(guard.get(&collection).and_then(|docs| docs.get(id)).cloned())
    }

    async fn scan(&self, collection: Collection) -> StoreResult<Vec<Value>> {
        let guard = self.collections.read().await;
        Ok(guard
            .get(&collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn find_by_index(&self, index: Index, key: &str) -> StoreResult<Vec<Value>> {
        let guard = self.collections.read().await;
        Ok(guard
            .get(&index.collection())
            .map(|docs| {
                docs.values()
                    .filter(|doc| index.keys(doc).iter().any(|k| k == key))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn commit(&self, writes: Vec<Write>) -> StoreResult<()> {
        // Holding the write guard for the whole batch keeps readers from
        // observing a partial commit.
        let mut guard = self.collections.write().await;
        for write in writes {
            guard
                .entry(write.collection)
                .or_default()
                .insert(write.id, write.doc);
        }
        Ok(())
    }
}
