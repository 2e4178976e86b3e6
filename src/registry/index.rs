//! Per-field index maintenance on an entity's collections.

use super::handle::StorageHandle;
use super::purge::{PurgeTicket, PurgeWorker};
use crate::config::{PurgePolicy, RetryPolicy};
use crate::core::{Result, SyncError, data_path, index_name};
use crate::storage::{DocumentStore, IndexSpec};
use std::sync::Arc;
use tracing::{Level, debug, event};

/// Creates and drops single-field indexes on `data.<field>`.
///
/// Every operation touches all targets of a handle so a pending rename target
/// already carries the right indexes when the pointer swaps.
#[derive(Clone)]
pub struct IndexManager {
    store: Arc<dyn DocumentStore>,
    purger: PurgeWorker,
}

impl IndexManager {
    pub fn new(store: Arc<dyn DocumentStore>, purge: PurgePolicy, retry: RetryPolicy) -> Self {
        let purger = PurgeWorker::spawn(Arc::clone(&store), purge, retry);
        Self { store, purger }
    }

    /// Create the index unless it already exists. Returns true when created
    /// on at least one target.
    pub async fn ensure_index(&self, handle: &StorageHandle, field_name: &str) -> Result<bool> {
        let spec = IndexSpec::ascending(data_path(field_name));
        let mut created = false;

        for collection in handle.targets() {
            if !self.store.collection_exists(collection).await? {
                continue;
            }
            match self.store.create_index(collection, spec.clone()).await {
                Ok(()) => {
                    created = true;
                    event!(
                        Level::INFO,
                        entity = %handle.entity_name,
                        collection,
                        index = %spec.name,
                        "index created"
                    );
                }
                Err(SyncError::Conflict(_)) => {
                    debug!(collection, index = %spec.name, "index already exists");
                }
                Err(err) => return Err(err),
            }
        }

        Ok(created)
    }

    /// Drop the index if present. Absence on any target is not an error.
    pub async fn drop_index(&self, handle: &StorageHandle, field_name: &str) -> Result<bool> {
        let name = index_name(&data_path(field_name));
        let mut dropped = false;

        for collection in handle.targets() {
            match self.store.drop_index(collection, &name).await {
                Ok(()) => {
                    dropped = true;
                    event!(
                        Level::INFO,
                        entity = %handle.entity_name,
                        collection,
                        index = %name,
                        "index dropped"
                    );
                }
                Err(SyncError::NotFound(_)) => {
                    debug!(collection, index = %name, "index already absent");
                }
                Err(err) => return Err(err),
            }
        }

        Ok(dropped)
    }

    /// Drop then create. A failed drop only leaves an orphaned index behind,
    /// so it is logged and creation goes ahead.
    pub async fn replace_index(&self, handle: &StorageHandle, field_name: &str) -> Result<bool> {
        if let Err(err) = self.drop_index(handle, field_name).await {
            event!(
                Level::WARN,
                entity = %handle.entity_name,
                field = field_name,
                error = %err,
                "index drop failed during replace, continuing"
            );
        }
        self.ensure_index(handle, field_name).await
    }

    /// Queue a background sweep unsetting the field on every document of
    /// every target. The handle is a snapshot; no registry lock is held.
    pub fn purge_field_data(&self, handle: &StorageHandle, field_name: &str) -> Result<Vec<PurgeTicket>> {
        let path = data_path(field_name);
        handle
            .targets()
            .map(|collection| self.purger.submit(&handle.entity_name, collection, &path))
            .collect()
    }

    /// Wait out any sweep still unsetting `field_name` on one of the
    /// handle's targets.
    pub async fn settle_field_purges(&self, handle: &StorageHandle, field_name: &str) {
        let path = data_path(field_name);
        for collection in handle.targets() {
            if self.purger.pending_for(collection, &path) > 0 {
                debug!(entity = %handle.entity_name, collection, path = %path, "waiting for field purge");
                self.purger.wait_for(collection, &path).await;
            }
        }
    }

    /// Field indexes currently present on the primary collection.
    pub async fn field_indexes(&self, handle: &StorageHandle) -> Result<Vec<IndexSpec>> {
        let specs = self.store.list_indexes(&handle.collection).await?;
        Ok(specs
            .into_iter()
            .filter(|spec| spec.path.starts_with("data."))
            .collect())
    }

    pub fn pending_purges(&self) -> usize {
        self.purger.pending()
    }

    pub async fn wait_for_purges(&self) {
        self.purger.wait_idle().await;
    }

    pub async fn shutdown(&self) {
        self.purger.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryDocumentStore;
    use std::collections::BTreeSet;

    fn handle(collection: &str) -> StorageHandle {
        StorageHandle {
            entity_name: "invoice".into(),
            entity_id: "e1".into(),
            collection: collection.into(),
            pending_collection: None,
            indexed_fields: BTreeSet::new(),
        }
    }

    async fn manager() -> (Arc<InMemoryDocumentStore>, IndexManager) {
        let store = Arc::new(InMemoryDocumentStore::new());
        store.create_collection("invoice").await.unwrap();
        let manager = IndexManager::new(store.clone(), PurgePolicy::default(), RetryPolicy::default());
        (store, manager)
    }

    #[tokio::test]
    async fn test_ensure_index_tolerates_existing() {
        let (store, manager) = manager().await;
        let handle = handle("invoice");

        assert!(manager.ensure_index(&handle, "amount").await.unwrap());
        assert!(!manager.ensure_index(&handle, "amount").await.unwrap());

        let indexes = store.list_indexes("invoice").await.unwrap();
        assert_eq!(indexes.len(), 1);
        assert_eq!(indexes[0].name, "data.amount_1");
    }

    #[tokio::test]
    async fn test_drop_missing_index_is_not_an_error() {
        let (_store, manager) = manager().await;
        assert!(!manager.drop_index(&handle("invoice"), "amount").await.unwrap());
    }

    #[tokio::test]
    async fn test_replace_creates_even_when_drop_fails() {
        let (store, manager) = manager().await;
        let mut handle = handle("invoice");
        handle.pending_collection = Some("missing".into());

        // drop on the missing pending target fails with NotFound, which is tolerated
        assert!(manager.replace_index(&handle, "amount").await.unwrap());
        assert_eq!(manager.field_indexes(&handle).await.unwrap().len(), 1);
        assert_eq!(store.list_indexes("invoice").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ensure_index_covers_pending_target() {
        let (store, manager) = manager().await;
        store.create_collection("invoices").await.unwrap();
        let mut handle = handle("invoice");
        handle.pending_collection = Some("invoices".into());

        manager.ensure_index(&handle, "amount").await.unwrap();
        assert_eq!(store.list_indexes("invoices").await.unwrap().len(), 1);
    }
}
