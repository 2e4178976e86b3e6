//! Record CRUD routed through the registry.

use super::query::{PaginatedResponse, QueryParams};
use crate::core::{Result, SyncError};
use crate::registry::{EntityRegistry, StorageHandle};
use crate::storage::{Document, DocumentStore};
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use tracing::{Level, event};

/// Reads and writes records of dynamic entities.
///
/// Every call resolves the entity through the registry first; an entity the
/// registry has not seen yet is `NotFound`. Writes go to the handle's primary
/// collection, reads also look at a pending rename target.
pub struct DynamicDataService {
    registry: Arc<EntityRegistry>,
    store: Arc<dyn DocumentStore>,
}

impl DynamicDataService {
    pub fn new(registry: Arc<EntityRegistry>, store: Arc<dyn DocumentStore>) -> Self {
        Self { registry, store }
    }

    /// Insert a record into the entity's primary collection.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use entity_sync::{DynamicDataService, EntityRegistry, InMemoryDocumentStore, SyncConfig};
    /// use std::sync::Arc;
    ///
    /// # tokio_test::block_on(async {
    /// let store = Arc::new(InMemoryDocumentStore::new());
    /// let registry = Arc::new(EntityRegistry::new(store.clone(), &SyncConfig::default()));
    /// let data = DynamicDataService::new(registry, store);
    /// let record = data
    ///     .create_record("invoice", serde_json::json!({"amount": 10}), Some("u1"))
    ///     .await
    ///     .unwrap();
    /// # });
    /// ```
    pub async fn create_record(
        &self,
        entity_name: &str,
        data: JsonValue,
        user_id: Option<&str>,
    ) -> Result<Document> {
        let handle = self.registry.resolve(entity_name)?;
        let data = self.validate_data(entity_name, data)?;

        let document = Document::new(&handle.entity_id, data, user_id.map(str::to_string));
        let document = self.store.insert(&handle.collection, document).await?;
        event!(Level::INFO, entity = entity_name, id = %document.id, "record created");
        Ok(document)
    }

    pub async fn get_record(&self, entity_name: &str, record_id: &str) -> Result<Document> {
        let handle = self.registry.resolve(entity_name)?;
        self.locate(&handle, record_id)
            .await?
            .map(|(_, document)| document)
            .ok_or_else(|| record_not_found(entity_name, record_id))
    }

    pub async fn list_records(&self, entity_name: &str, params: &QueryParams) -> Result<PaginatedResponse<Document>> {
        let handle = self.registry.resolve(entity_name)?;
        let query = params.to_document_query()?;
        let found = self.store.find(&handle.collection, &query).await?;

        let mut documents = found.documents;
        if let Some(keep) = params.projection() {
            for document in &mut documents {
                document.data.retain(|key, _| keep.contains(key));
            }
        }

        Ok(PaginatedResponse::new(documents, found.total, params.page(), params.limit()))
    }

    pub async fn update_record(
        &self,
        entity_name: &str,
        record_id: &str,
        data: JsonValue,
        user_id: Option<&str>,
    ) -> Result<Document> {
        let handle = self.registry.resolve(entity_name)?;
        let data = self.validate_data(entity_name, data)?;

        let (collection, _) = self
            .locate(&handle, record_id)
            .await?
            .ok_or_else(|| record_not_found(entity_name, record_id))?;
        let updated = self
            .store
            .update_data(&collection, record_id, data, user_id.map(str::to_string))
            .await?
            .ok_or_else(|| record_not_found(entity_name, record_id))?;

        event!(Level::INFO, entity = entity_name, id = record_id, "record updated");
        Ok(updated)
    }

    pub async fn delete_record(&self, entity_name: &str, record_id: &str) -> Result<Document> {
        let handle = self.registry.resolve(entity_name)?;
        let (collection, _) = self
            .locate(&handle, record_id)
            .await?
            .ok_or_else(|| record_not_found(entity_name, record_id))?;
        let removed = self
            .store
            .delete(&collection, record_id)
            .await?
            .ok_or_else(|| record_not_found(entity_name, record_id))?;

        event!(Level::INFO, entity = entity_name, id = record_id, "record deleted");
        Ok(removed)
    }

    /// Field-level validation is not enforced yet; only the shape is checked.
    pub fn validate_data(&self, entity_name: &str, data: JsonValue) -> Result<Map<String, JsonValue>> {
        match data {
            JsonValue::Object(map) => Ok(map),
            other => Err(SyncError::Validation(format!(
                "Record data for '{}' must be a JSON object, got {}",
                entity_name,
                json_kind(&other)
            ))),
        }
    }

    async fn locate(&self, handle: &StorageHandle, record_id: &str) -> Result<Option<(String, Document)>> {
        for collection in handle.targets() {
            match self.store.get(collection, record_id).await {
                Ok(Some(document)) => return Ok(Some((collection.to_string(), document))),
                Ok(None) | Err(SyncError::NotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }
}

fn record_not_found(entity_name: &str, record_id: &str) -> SyncError {
    SyncError::not_found(format!("Record '{}' of entity '{}'", record_id, entity_name))
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}
