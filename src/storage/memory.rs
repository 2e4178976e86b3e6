use super::collection::Collection;
use super::engine::{Document, DocumentQuery, DocumentStore, FindResult, IndexSpec, UnsetBatch};
use crate::core::{Result, SyncError};
use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};
use tokio::sync::RwLock;

/// Document store kept entirely in memory.
///
/// Each collection sits behind its own lock; the name map is only touched to
/// look up, add or remove collections.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    collections: StdRwLock<HashMap<String, Arc<RwLock<Collection>>>>,
    unavailable: AtomicBool,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `TransientStore` until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn list_collections(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.collections.read()?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SyncError::TransientStore(
                "in-memory document store is marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn collection(&self, name: &str) -> Result<Arc<RwLock<Collection>>> {
        self.check_available()?;
        self.collections
            .read()?
            .get(name)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("Collection '{}'", name)))
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn create_collection(&self, name: &str) -> Result<bool> {
        self.check_available()?;
        let mut collections = self.collections.write()?;
        if collections.contains_key(name) {
            return Ok(false);
        }
        collections.insert(name.to_string(), Arc::new(RwLock::new(Collection::new(name))));
        Ok(true)
    }

    async fn drop_collection(&self, name: &str) -> Result<bool> {
        self.check_available()?;
        Ok(self.collections.write()?.remove(name).is_some())
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        self.check_available()?;
        Ok(self.collections.read()?.contains_key(name))
    }

    async fn rename_collection(&self, from: &str, to: &str) -> Result<()> {
        let source = self.collection(from)?;
        if let Ok(existing) = self.collection(to) {
            if !existing.read().await.is_empty() {
                return Err(SyncError::Conflict(format!(
                    "Cannot rename '{}' to '{}': target already holds documents",
                    from, to
                )));
            }
        }

        let mut moved = source.read().await.clone();
        moved.rename(to);

        let mut collections = self.collections.write()?;
        collections.remove(from);
        collections.insert(to.to_string(), Arc::new(RwLock::new(moved)));
        Ok(())
    }

    async fn list_indexes(&self, collection: &str) -> Result<Vec<IndexSpec>> {
        let handle = self.collection(collection)?;
        let guard = handle.read().await;
        Ok(guard.index_specs())
    }

    async fn create_index(&self, collection: &str, spec: IndexSpec) -> Result<()> {
        let handle = self.collection(collection)?;
        let mut guard = handle.write().await;
        guard.create_index(spec)
    }

    async fn drop_index(&self, collection: &str, index_name: &str) -> Result<()> {
        let handle = self.collection(collection)?;
        let mut guard = handle.write().await;
        guard.drop_index(index_name)
    }

    async fn insert(&self, collection: &str, document: Document) -> Result<Document> {
        let handle = self.collection(collection)?;
        let mut guard = handle.write().await;
        guard.insert(document)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let handle = self.collection(collection)?;
        let guard = handle.read().await;
        Ok(guard.get(id).cloned())
    }

    async fn update_data(
        &self,
        collection: &str,
        id: &str,
        data: Map<String, JsonValue>,
        updated_by: Option<String>,
    ) -> Result<Option<Document>> {
        let handle = self.collection(collection)?;
        let mut guard = handle.write().await;
        Ok(guard.update_data(id, data, updated_by))
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let handle = self.collection(collection)?;
        let mut guard = handle.write().await;
        Ok(guard.delete(id))
    }

    async fn find(&self, collection: &str, query: &DocumentQuery) -> Result<FindResult> {
        let handle = self.collection(collection)?;
        let guard = handle.read().await;
        Ok(guard.find(query))
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let handle = self.collection(collection)?;
        let guard = handle.read().await;
        Ok(guard.len())
    }

    async fn unset_field_batch(
        &self,
        collection: &str,
        path: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<UnsetBatch> {
        let handle = self.collection(collection)?;
        let mut guard = handle.write().await;
        Ok(guard.unset_field_batch(path, after, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(value: JsonValue) -> Map<String, JsonValue> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_collection_lifecycle_is_idempotent() {
        let store = InMemoryDocumentStore::new();
        assert!(store.create_collection("invoice").await.unwrap());
        assert!(!store.create_collection("invoice").await.unwrap());
        assert!(store.drop_collection("invoice").await.unwrap());
        assert!(!store.drop_collection("invoice").await.unwrap());
        assert!(matches!(
            store.count("invoice").await,
            Err(SyncError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rename_moves_documents_and_indexes() {
        let store = InMemoryDocumentStore::new();
        store.create_collection("invoice").await.unwrap();
        store
            .create_index("invoice", IndexSpec::ascending("data.amount"))
            .await
            .unwrap();
        let doc = store
            .insert("invoice", Document::new("invoice", data(json!({"amount": 3})), None))
            .await
            .unwrap();

        store.rename_collection("invoice", "invoices_v2").await.unwrap();

        assert!(!store.collection_exists("invoice").await.unwrap());
        assert!(store.get("invoices_v2", &doc.id).await.unwrap().is_some());
        assert_eq!(store.list_indexes("invoices_v2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rename_refuses_to_overwrite_populated_target() {
        let store = InMemoryDocumentStore::new();
        store.create_collection("a").await.unwrap();
        store.create_collection("b").await.unwrap();
        store
            .insert("b", Document::new("x", Map::new(), None))
            .await
            .unwrap();
        assert!(matches!(
            store.rename_collection("a", "b").await,
            Err(SyncError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_unavailable_switch() {
        let store = InMemoryDocumentStore::new();
        store.set_unavailable(true);
        let err = store.create_collection("invoice").await.unwrap_err();
        assert!(err.is_retryable());
        store.set_unavailable(false);
        assert!(store.create_collection("invoice").await.is_ok());
    }
}
