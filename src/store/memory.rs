//! In-process store.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use super::collection::{Collection, Document, IndexSpec};
use super::{DocumentStore, StoreResult};

#[derive(Debug, Default)]
struct State {
    collections: HashMap<String, Collection>,
    writes: HashMap<String, u64>,
}

/// Collections held in memory behind one mutex.
///
/// Counts write calls per collection, which tests use to assert that an
/// operation left a collection untouched.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of write calls made against `collection`.
    pub async fn write_count(&self, collection: &str) -> u64 {
        self.state
            .lock()
            .await
            .writes
            .get(collection)
            .copied()
            .unwrap_or(0)
    }

    async fn read<T>(&self, collection: &str, f: impl FnOnce(&Collection) -> T) -> T {
        let state = self.state.lock().await;
        match state.collections.get(collection) {
            Some(c) => f(c),
            None => f(&Collection::default()),
        }
    }

    async fn write<T>(
        &self,
        collection: &str,
        f: impl FnOnce(&mut Collection) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut state = self.state.lock().await;
        *state.writes.entry(collection.to_string()).or_default() += 1;
        let target = state.collections.entry(collection.to_string()).or_default();
        f(target)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn find_all(&self, collection: &str) -> StoreResult<Vec<Document>> {
        Ok(self.read(collection, Collection::find_all).await)
    }

    async fn find_one(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        Ok(self.read(collection, |c| c.find_one(id)).await)
    }

    async fn insert(&self, collection: &str, document: Document) -> StoreResult<()> {
        self.write(collection, |c| c.insert(collection, document)).await
    }

    async fn upsert(&self, collection: &str, id: &str, document: Document) -> StoreResult<()> {
        self.write(collection, |c| c.upsert(collection, id, document)).await
    }

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<bool> {
        self.write(collection, |c| Ok(c.delete(id))).await
    }

    async fn compare_and_swap(
        &self,
        collection: &str,
        id: &str,
        expected: Option<&Document>,
        replacement: Document,
    ) -> StoreResult<bool> {
        self.write(collection, |c| c.compare_and_swap(collection, id, expected, replacement))
            .await
    }

    async fn set_where_missing(&self, collection: &str, field: &str, value: &Value) -> StoreResult<u64> {
        self.write(collection, |c| Ok(c.set_where_missing(field, value))).await
    }

    async fn unset_field(&self, collection: &str, field: &str) -> StoreResult<u64> {
        self.write(collection, |c| Ok(c.unset_field(field))).await
    }

    async fn rename_field(&self, collection: &str, from: &str, to: &str) -> StoreResult<u64> {
        self.write(collection, |c| Ok(c.rename_field(from, to))).await
    }

    async fn create_index(&self, collection: &str, index: &IndexSpec) -> StoreResult<()> {
        self.write(collection, |c| c.create_index(collection, index)).await
    }

    async fn drop_index(&self, collection: &str, name: &str) -> StoreResult<bool> {
        self.write(collection, |c| Ok(c.drop_index(name))).await
    }

    async fn list_indexes(&self, collection: &str) -> StoreResult<Vec<IndexSpec>> {
        Ok(self.read(collection, |c| c.indexes.clone()).await)
    }

    async fn drop_collection(&self, collection: &str) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        *state.writes.entry(collection.to_string()).or_default() += 1;
        Ok(state.collections.remove(collection).is_some())
    }
}
