//! The in-memory entity registry.
//!
//! Reads (`resolve`, `snapshot`) only take a short read lock on the name map
//! and never wait on storage. Writes are serialized per entity name: the
//! per-entity writer lock is held across storage calls, the map lock only
//! while swapping the entry.

use super::entry::{ApplyOutcome, FieldState, RegistryEntry};
use super::handle::StorageHandle;
use super::index::IndexManager;
use super::purge::PurgeTicket;
use crate::config::{RenamePolicy, SyncConfig};
use crate::core::{Result, SyncError};
use crate::events::{
    EntityDeletedPayload, EntityEventPayload, EntityMigratedPayload, FieldDeletedPayload,
    FieldEventPayload, Topic,
};
use crate::metadata::MetadataStore;
use crate::storage::DocumentStore;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{Level, debug, event};

#[derive(Debug, Clone)]
struct Tombstone {
    /// Timestamp of the `entity-deleted` event.
    deleted_at: DateTime<Utc>,
    /// Wall clock when the tombstone was written, for expiry.
    recorded_at: DateTime<Utc>,
}

#[derive(Default)]
struct RegistryState {
    entries: HashMap<String, RegistryEntry>,
    by_id: HashMap<String, String>,
    tombstones: HashMap<String, Tombstone>,
}

pub struct EntityRegistry {
    store: Arc<dyn DocumentStore>,
    indexes: IndexManager,
    state: StdRwLock<RegistryState>,
    writers: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    rename_policy: RenamePolicy,
    tombstone_ttl: Duration,
}

impl EntityRegistry {
    /// Build an empty registry. Must be called inside a tokio runtime since
    /// it starts the purge worker.
    pub fn new(store: Arc<dyn DocumentStore>, config: &SyncConfig) -> Self {
        let indexes = IndexManager::new(
            Arc::clone(&store),
            config.purge.clone(),
            config.retry.clone(),
        );
        Self {
            store,
            indexes,
            state: StdRwLock::new(RegistryState::default()),
            writers: StdMutex::new(HashMap::new()),
            rename_policy: config.rename_policy,
            tombstone_ttl: config.tombstone_ttl(),
        }
    }

    /// Current storage handle for `entity_name`.
    pub fn resolve(&self, entity_name: &str) -> Result<StorageHandle> {
        self.state
            .read()?
            .entries
            .get(entity_name)
            .map(RegistryEntry::handle)
            .ok_or_else(|| SyncError::not_found(format!("Entity '{}'", entity_name)))
    }

    pub fn contains(&self, entity_name: &str) -> bool {
        self.state
            .read()
            .map(|state| state.entries.contains_key(entity_name))
            .unwrap_or(false)
    }

    pub fn entry(&self, entity_name: &str) -> Result<Option<RegistryEntry>> {
        Ok(self.state.read()?.entries.get(entity_name).cloned())
    }

    pub fn entity_name_for_id(&self, entity_id: &str) -> Result<Option<String>> {
        Ok(self.state.read()?.by_id.get(entity_id).cloned())
    }

    pub fn len(&self) -> usize {
        self.state.read().map(|state| state.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All handles, sorted by entity name.
    pub fn snapshot(&self) -> Result<Vec<StorageHandle>> {
        let state = self.state.read()?;
        let mut handles: Vec<StorageHandle> = state.entries.values().map(RegistryEntry::handle).collect();
        handles.sort_by(|a, b| a.entity_name.cmp(&b.entity_name));
        Ok(handles)
    }

    pub fn indexes(&self) -> &IndexManager {
        &self.indexes
    }

    pub async fn apply_created(&self, payload: &EntityEventPayload) -> Result<ApplyOutcome> {
        let writer = self.writer(&payload.name)?;
        let _guard = writer.lock().await;
        self.create_locked(payload, Topic::EntityCreated).await
    }

    pub async fn apply_updated(&self, payload: &EntityEventPayload) -> Result<ApplyOutcome> {
        let writer = self.writer(&payload.name)?;
        let _guard = writer.lock().await;

        let Some(entry) = self.entry(&payload.name)? else {
            debug!(entity = %payload.name, "update for unknown entity, applying as create");
            return self.create_locked(payload, Topic::EntityUpdated).await;
        };

        if entry.is_stale(Topic::EntityUpdated, payload.timestamp)
            || entry.is_stale(Topic::EntityCreated, payload.timestamp)
        {
            return Ok(self.log_outcome(ApplyOutcome::Stale, Topic::EntityUpdated, &payload.name));
        }
        if entry.last_applied.get(&Topic::EntityUpdated) == Some(&payload.timestamp) {
            return Ok(self.log_outcome(ApplyOutcome::Duplicate, Topic::EntityUpdated, &payload.name));
        }

        let target = payload.table_name.as_str();
        let mut updated = entry.clone();
        updated.is_system = payload.is_system;

        if target == entry.storage_target {
            updated.pending_target = None;
        } else if entry.pending_target.as_deref() != Some(target) {
            match self.rename_policy {
                RenamePolicy::Defer => {
                    self.prepare_pending_target(&entry, target).await?;
                    updated.pending_target = Some(target.to_string());
                    event!(
                        Level::WARN,
                        entity = %entry.entity_name,
                        current = %entry.storage_target,
                        pending = target,
                        "storage target change deferred until entity-migrated"
                    );
                }
                RenamePolicy::RejectAfterFirstWrite => {
                    self.move_if_unwritten(&entry, target).await?;
                    updated.storage_target = target.to_string();
                    updated.pending_target = None;
                }
            }
        }

        updated.mark(Topic::EntityUpdated, payload.timestamp);
        self.put_entry(updated)?;
        Ok(self.log_outcome(ApplyOutcome::Applied, Topic::EntityUpdated, &payload.name))
    }

    /// Complete a deferred rename: move the records and swap the pointer.
    pub async fn apply_migrated(&self, payload: &EntityMigratedPayload) -> Result<ApplyOutcome> {
        let writer = self.writer(&payload.name)?;
        let _guard = writer.lock().await;

        let Some(entry) = self.entry(&payload.name)? else {
            return Ok(self.log_outcome(ApplyOutcome::Skipped, Topic::EntityMigrated, &payload.name));
        };
        if entry.is_stale(Topic::EntityMigrated, payload.timestamp) {
            return Ok(self.log_outcome(ApplyOutcome::Stale, Topic::EntityMigrated, &payload.name));
        }

        let target = payload.table_name.as_str();
        if entry.storage_target == target {
            let mut updated = entry;
            updated.pending_target = None;
            updated.mark(Topic::EntityMigrated, payload.timestamp);
            self.put_entry(updated)?;
            return Ok(self.log_outcome(ApplyOutcome::Duplicate, Topic::EntityMigrated, &payload.name));
        }

        match self.store.rename_collection(&entry.storage_target, target).await {
            Ok(()) => {}
            Err(SyncError::NotFound(_)) => {
                self.store.create_collection(target).await?;
            }
            Err(err) => return Err(err),
        }

        let mut updated = entry.clone();
        updated.storage_target = target.to_string();
        updated.pending_target = None;
        updated.mark(Topic::EntityMigrated, payload.timestamp);

        let handle = updated.handle();
        for field in &updated.indexed_fields {
            self.indexes.ensure_index(&handle, field).await?;
        }

        event!(
            Level::INFO,
            entity = %payload.name,
            from = %entry.storage_target,
            to = target,
            "storage target migrated"
        );
        self.put_entry(updated)?;
        Ok(self.log_outcome(ApplyOutcome::Applied, Topic::EntityMigrated, &payload.name))
    }

    /// Drop indexes and collections, then forget the entity. Missing entries
    /// are a no-op.
    pub async fn apply_deleted(&self, payload: &EntityDeletedPayload) -> Result<ApplyOutcome> {
        let writer = self.writer(&payload.name)?;
        let _guard = writer.lock().await;

        let Some(entry) = self.entry(&payload.name)? else {
            let outcome = if self.state.read()?.tombstones.contains_key(&payload.name) {
                ApplyOutcome::Duplicate
            } else {
                ApplyOutcome::Skipped
            };
            return Ok(self.log_outcome(outcome, Topic::EntityDeleted, &payload.name));
        };
        if entry.is_stale(Topic::EntityCreated, payload.timestamp) {
            return Ok(self.log_outcome(ApplyOutcome::Stale, Topic::EntityDeleted, &payload.name));
        }

        let handle = entry.handle();
        for field in &handle.indexed_fields {
            self.indexes.drop_index(&handle, field).await?;
        }

        for collection in handle.targets() {
            match self.store.list_indexes(collection).await {
                Ok(remaining) => {
                    for spec in remaining.iter().filter(|spec| spec.path.starts_with("data.")) {
                        event!(
                            Level::WARN,
                            entity = %handle.entity_name,
                            collection,
                            index = %spec.name,
                            "dropping orphaned index"
                        );
                        match self.store.drop_index(collection, &spec.name).await {
                            Ok(()) | Err(SyncError::NotFound(_)) => {}
                            Err(err) => return Err(err),
                        }
                    }
                }
                Err(SyncError::NotFound(_)) => {}
                Err(err) => return Err(err),
            }
            self.store.drop_collection(collection).await?;
        }

        {
            let mut state = self.state.write()?;
            state.entries.remove(&payload.name);
            state.by_id.retain(|_, name| name != &payload.name);
            state.tombstones.insert(
                payload.name.clone(),
                Tombstone {
                    deleted_at: payload.timestamp,
                    recorded_at: Utc::now(),
                },
            );
            self.prune_tombstones(&mut state);
        }

        Ok(self.log_outcome(ApplyOutcome::Applied, Topic::EntityDeleted, &payload.name))
    }

    pub async fn apply_field_added(&self, payload: &FieldEventPayload) -> Result<ApplyOutcome> {
        self.upsert_field(payload, Topic::FieldCreated).await
    }

    pub async fn apply_field_updated(&self, payload: &FieldEventPayload) -> Result<ApplyOutcome> {
        self.upsert_field(payload, Topic::FieldUpdated).await
    }

    /// Drop the field's index and queue a purge of its values.
    pub async fn apply_field_deleted(&self, payload: &FieldDeletedPayload) -> Result<ApplyOutcome> {
        let (outcome, _purges) = self.apply_field_deleted_tracked(payload).await?;
        Ok(outcome)
    }

    /// `apply_field_deleted`, also returning the queued sweeps. The event is
    /// only fully handled once every ticket resolved.
    pub async fn apply_field_deleted_tracked(
        &self,
        payload: &FieldDeletedPayload,
    ) -> Result<(ApplyOutcome, Vec<PurgeTicket>)> {
        let topic = Topic::FieldDeleted;
        let Some(entity_name) = self.entity_for_field_event(&payload.entity_id)? else {
            return Ok((self.log_outcome(ApplyOutcome::Skipped, topic, &payload.entity_id), Vec::new()));
        };
        let writer = self.writer(&entity_name)?;
        let _guard = writer.lock().await;

        let Some(entry) = self.entry(&entity_name)? else {
            return Ok((self.log_outcome(ApplyOutcome::Skipped, topic, &entity_name), Vec::new()));
        };
        if entry.is_field_stale(&payload.name, payload.timestamp) {
            return Ok((self.log_outcome(ApplyOutcome::Stale, topic, &entity_name), Vec::new()));
        }
        let known = entry.fields.contains_key(&payload.name) || entry.is_indexed(&payload.name);
        if !known && entry.field_marks.get(&payload.name) == Some(&payload.timestamp) {
            return Ok((self.log_outcome(ApplyOutcome::Duplicate, topic, &entity_name), Vec::new()));
        }

        let handle = entry.handle();
        self.indexes.drop_index(&handle, &payload.name).await?;
        let tickets = self.indexes.purge_field_data(&handle, &payload.name)?;
        event!(
            Level::INFO,
            entity = %entity_name,
            field = %payload.name,
            jobs = tickets.len(),
            "field purge queued"
        );

        let mut updated = entry;
        updated.indexed_fields.remove(&payload.name);
        updated.fields.remove(&payload.name);
        updated.mark_field(topic, &payload.name, payload.timestamp);
        self.put_entry(updated)?;
        Ok((self.log_outcome(ApplyOutcome::Applied, topic, &entity_name), tickets))
    }

    /// Rebuild entries from the metadata store. Existing entries are kept.
    pub async fn hydrate(&self, metadata: &dyn MetadataStore) -> Result<usize> {
        let mut loaded = 0;

        for entity in metadata.list_entities().await? {
            let writer = self.writer(&entity.name)?;
            let _guard = writer.lock().await;
            if self.contains(&entity.name) {
                continue;
            }

            self.store.create_collection(&entity.storage_target).await?;
            let mut entry = RegistryEntry::new(
                &entity.id,
                &entity.name,
                &entity.storage_target,
                entity.is_system,
            );
            entry.mark(Topic::EntityCreated, entity.created_at);

            let handle = entry.handle();
            for field in metadata.list_fields(&entity.id).await? {
                self.indexes.ensure_index(&handle, &field.name).await?;
                entry.indexed_fields.insert(field.name.clone());
                entry.fields.insert(
                    field.name.clone(),
                    FieldState {
                        field_type: field.field_type,
                        required: field.is_required,
                    },
                );
            }

            self.put_entry(entry)?;
            loaded += 1;
        }

        event!(Level::INFO, loaded, "registry hydrated from metadata store");
        Ok(loaded)
    }

    pub async fn wait_for_purges(&self) {
        self.indexes.wait_for_purges().await;
    }

    /// Stop the purge worker after draining accepted jobs.
    pub async fn shutdown(&self) {
        self.indexes.shutdown().await;
    }

    async fn create_locked(&self, payload: &EntityEventPayload, topic: Topic) -> Result<ApplyOutcome> {
        if self.contains(&payload.name) {
            return Ok(self.log_outcome(ApplyOutcome::Duplicate, topic, &payload.name));
        }
        if self.is_tombstoned(&payload.name, payload.timestamp)? {
            return Ok(self.log_outcome(ApplyOutcome::Stale, topic, &payload.name));
        }

        let created = self.store.create_collection(&payload.table_name).await?;
        if !created {
            debug!(entity = %payload.name, collection = %payload.table_name, "collection already present");
        }

        let mut entry = RegistryEntry::new(&payload.id, &payload.name, &payload.table_name, payload.is_system);
        entry.mark(Topic::EntityCreated, payload.timestamp);
        entry.mark(topic, payload.timestamp);

        {
            let mut state = self.state.write()?;
            state.tombstones.remove(&payload.name);
            state.by_id.insert(entry.entity_id.clone(), entry.entity_name.clone());
            state.entries.insert(entry.entity_name.clone(), entry);
        }

        Ok(self.log_outcome(ApplyOutcome::Applied, topic, &payload.name))
    }

    async fn upsert_field(&self, payload: &FieldEventPayload, topic: Topic) -> Result<ApplyOutcome> {
        let Some(entity_name) = self.entity_for_field_event(&payload.entity_id)? else {
            return Ok(self.log_outcome(ApplyOutcome::Skipped, topic, &payload.entity_id));
        };
        let writer = self.writer(&entity_name)?;
        let _guard = writer.lock().await;

        let Some(entry) = self.entry(&entity_name)? else {
            return Ok(self.log_outcome(ApplyOutcome::Skipped, topic, &entity_name));
        };
        if entry.is_field_stale(&payload.name, payload.timestamp) {
            return Ok(self.log_outcome(ApplyOutcome::Stale, topic, &entity_name));
        }

        let state = FieldState {
            field_type: payload.field_type,
            required: payload.is_required,
        };
        let unchanged = entry.fields.get(&payload.name) == Some(&state) && entry.is_indexed(&payload.name);
        if unchanged && entry.field_marks.get(&payload.name) == Some(&payload.timestamp) {
            return Ok(self.log_outcome(ApplyOutcome::Duplicate, topic, &entity_name));
        }

        let handle = entry.handle();
        // A sweep queued by an earlier delete of this name must not reach
        // values written under the new field.
        self.indexes.settle_field_purges(&handle, &payload.name).await;
        match topic {
            Topic::FieldUpdated if entry.is_indexed(&payload.name) => {
                self.indexes.replace_index(&handle, &payload.name).await?;
            }
            _ => {
                self.indexes.ensure_index(&handle, &payload.name).await?;
            }
        }

        let mut updated = entry;
        updated.indexed_fields.insert(payload.name.clone());
        updated.fields.insert(payload.name.clone(), state);
        updated.mark_field(topic, &payload.name, payload.timestamp);
        self.put_entry(updated)?;
        Ok(self.log_outcome(ApplyOutcome::Applied, topic, &entity_name))
    }

    /// Field events carry the entity id; older producers sent the name.
    fn entity_for_field_event(&self, entity_id: &str) -> Result<Option<String>> {
        let state = self.state.read()?;
        if let Some(name) = state.by_id.get(entity_id) {
            return Ok(Some(name.clone()));
        }
        Ok(state
            .entries
            .contains_key(entity_id)
            .then(|| entity_id.to_string()))
    }

    async fn prepare_pending_target(&self, entry: &RegistryEntry, target: &str) -> Result<()> {
        self.store.create_collection(target).await?;
        let mut handle = entry.handle();
        handle.pending_collection = Some(target.to_string());
        for field in &entry.indexed_fields {
            self.indexes.ensure_index(&handle, field).await?;
        }
        Ok(())
    }

    async fn move_if_unwritten(&self, entry: &RegistryEntry, target: &str) -> Result<()> {
        let current = entry.storage_target.as_str();
        let written = match self.store.count(current).await {
            Ok(count) => count,
            Err(SyncError::NotFound(_)) => 0,
            Err(err) => return Err(err),
        };
        if written > 0 {
            return Err(SyncError::Conflict(format!(
                "Entity '{}' cannot move from '{}' to '{}': {} record(s) already written",
                entry.entity_name, current, target, written
            )));
        }

        match self.store.rename_collection(current, target).await {
            Ok(()) => {}
            Err(SyncError::NotFound(_)) => {
                self.store.create_collection(target).await?;
            }
            Err(err) => return Err(err),
        }
        event!(
            Level::INFO,
            entity = %entry.entity_name,
            from = current,
            to = target,
            "empty collection retargeted"
        );
        Ok(())
    }

    fn is_tombstoned(&self, entity_name: &str, at: DateTime<Utc>) -> Result<bool> {
        let state = self.state.read()?;
        Ok(state
            .tombstones
            .get(entity_name)
            .is_some_and(|tomb| !self.is_expired(tomb) && at <= tomb.deleted_at))
    }

    fn is_expired(&self, tomb: &Tombstone) -> bool {
        let age = Utc::now().signed_duration_since(tomb.recorded_at);
        age.to_std().is_ok_and(|age| age > self.tombstone_ttl)
    }

    fn prune_tombstones(&self, state: &mut RegistryState) {
        state.tombstones.retain(|_, tomb| !self.is_expired(tomb));
    }

    fn put_entry(&self, entry: RegistryEntry) -> Result<()> {
        let mut state = self.state.write()?;
        state.by_id.insert(entry.entity_id.clone(), entry.entity_name.clone());
        state.entries.insert(entry.entity_name.clone(), entry);
        Ok(())
    }

    fn writer(&self, entity_name: &str) -> Result<Arc<Mutex<()>>> {
        let mut writers = self.writers.lock()?;
        Ok(Arc::clone(
            writers
                .entry(entity_name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        ))
    }

    fn log_outcome(&self, outcome: ApplyOutcome, topic: Topic, entity: &str) -> ApplyOutcome {
        match outcome {
            ApplyOutcome::Applied => {
                event!(Level::INFO, entity, topic = %topic, "registry updated")
            }
            ApplyOutcome::Duplicate => {
                event!(Level::INFO, entity, topic = %topic, "duplicate event ignored")
            }
            ApplyOutcome::Stale => {
                event!(Level::WARN, entity, topic = %topic, "stale event ignored")
            }
            ApplyOutcome::Skipped => {
                event!(Level::WARN, entity, topic = %topic, "event for unknown entity skipped")
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FieldType;
    use crate::storage::InMemoryDocumentStore;
    use chrono::Duration as ChronoDuration;

    fn created(name: &str, table: &str, at: DateTime<Utc>) -> EntityEventPayload {
        EntityEventPayload {
            id: format!("{}-id", name),
            name: name.into(),
            display_name: name.into(),
            table_name: table.into(),
            is_system: false,
            timestamp: at,
        }
    }

    fn deleted(name: &str, at: DateTime<Utc>) -> EntityDeletedPayload {
        EntityDeletedPayload {
            id: format!("{}-id", name),
            name: name.into(),
            table_name: None,
            timestamp: at,
        }
    }

    fn field(entity_id: &str, name: &str, at: DateTime<Utc>) -> FieldEventPayload {
        FieldEventPayload {
            id: format!("{}-field", name),
            entity_id: entity_id.into(),
            name: name.into(),
            display_name: name.into(),
            field_type: FieldType::Money,
            is_required: false,
            is_system: false,
            timestamp: at,
        }
    }

    fn registry() -> (Arc<InMemoryDocumentStore>, EntityRegistry) {
        let store = Arc::new(InMemoryDocumentStore::new());
        let registry = EntityRegistry::new(store.clone(), &SyncConfig::default());
        (store, registry)
    }

    #[tokio::test]
    async fn test_resolve_unknown_is_not_found() {
        let (_store, registry) = registry();
        assert!(matches!(registry.resolve("invoice"), Err(SyncError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_created_twice_is_duplicate() {
        let (store, registry) = registry();
        let now = Utc::now();

        assert_eq!(registry.apply_created(&created("invoice", "invoice", now)).await.unwrap(), ApplyOutcome::Applied);
        assert_eq!(registry.apply_created(&created("invoice", "invoice", now)).await.unwrap(), ApplyOutcome::Duplicate);
        assert_eq!(registry.len(), 1);
        assert!(store.collection_exists("invoice").await.unwrap());
    }

    #[tokio::test]
    async fn test_update_of_missing_entry_creates_it() {
        let (_store, registry) = registry();
        let outcome = registry.apply_updated(&created("invoice", "invoice", Utc::now())).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);
        assert_eq!(registry.resolve("invoice").unwrap().collection, "invoice");
    }

    #[tokio::test]
    async fn test_deferred_rename_keeps_original_target() {
        let (store, registry) = registry();
        let now = Utc::now();
        registry.apply_created(&created("invoice", "invoice", now)).await.unwrap();

        registry
            .apply_updated(&created("invoice", "invoices", now + ChronoDuration::seconds(1)))
            .await
            .unwrap();

        let handle = registry.resolve("invoice").unwrap();
        assert_eq!(handle.collection, "invoice");
        assert_eq!(handle.pending_collection.as_deref(), Some("invoices"));
        assert!(store.collection_exists("invoices").await.unwrap());

        let migrated = EntityMigratedPayload {
            id: "invoice-id".into(),
            name: "invoice".into(),
            table_name: "invoices".into(),
            timestamp: now + ChronoDuration::seconds(2),
        };
        assert_eq!(registry.apply_migrated(&migrated).await.unwrap(), ApplyOutcome::Applied);
        let handle = registry.resolve("invoice").unwrap();
        assert_eq!(handle.collection, "invoices");
        assert!(handle.pending_collection.is_none());
        assert!(!store.collection_exists("invoice").await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_update_is_ignored() {
        let (_store, registry) = registry();
        let now = Utc::now();
        registry.apply_created(&created("invoice", "invoice", now)).await.unwrap();
        registry
            .apply_updated(&created("invoice", "invoice", now + ChronoDuration::seconds(5)))
            .await
            .unwrap();

        let outcome = registry
            .apply_updated(&created("invoice", "other", now + ChronoDuration::seconds(1)))
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Stale);
        assert!(registry.resolve("invoice").unwrap().pending_collection.is_none());
    }

    #[tokio::test]
    async fn test_tombstone_rejects_older_create() {
        let (_store, registry) = registry();
        let now = Utc::now();
        registry.apply_created(&created("invoice", "invoice", now)).await.unwrap();
        registry.apply_deleted(&deleted("invoice", now + ChronoDuration::seconds(2))).await.unwrap();

        let replayed = registry
            .apply_created(&created("invoice", "invoice", now))
            .await
            .unwrap();
        assert_eq!(replayed, ApplyOutcome::Stale);

        let recreated = registry
            .apply_created(&created("invoice", "invoice", now + ChronoDuration::seconds(3)))
            .await
            .unwrap();
        assert_eq!(recreated, ApplyOutcome::Applied);
    }

    #[tokio::test]
    async fn test_field_event_by_id_and_by_name() {
        let (_store, registry) = registry();
        let now = Utc::now();
        registry.apply_created(&created("invoice", "invoice", now)).await.unwrap();

        registry.apply_field_added(&field("invoice-id", "amount", now)).await.unwrap();
        registry.apply_field_added(&field("invoice", "total", now)).await.unwrap();
        let skipped = registry.apply_field_added(&field("ghost", "x", now)).await.unwrap();

        assert_eq!(skipped, ApplyOutcome::Skipped);
        let handle = registry.resolve("invoice").unwrap();
        assert!(handle.is_indexed("amount"));
        assert!(handle.is_indexed("total"));
    }

    #[tokio::test]
    async fn test_reject_after_first_write_policy() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let config = SyncConfig {
            rename_policy: RenamePolicy::RejectAfterFirstWrite,
            ..SyncConfig::default()
        };
        let registry = EntityRegistry::new(store.clone(), &config);
        let now = Utc::now();
        registry.apply_created(&created("invoice", "invoice", now)).await.unwrap();

        registry
            .apply_updated(&created("invoice", "invoices", now + ChronoDuration::seconds(1)))
            .await
            .unwrap();
        assert_eq!(registry.resolve("invoice").unwrap().collection, "invoices");

        let document = crate::storage::Document::new("invoice-id", serde_json::Map::new(), None);
        store.insert("invoices", document).await.unwrap();

        let result = registry
            .apply_updated(&created("invoice", "bills", now + ChronoDuration::seconds(2)))
            .await;
        assert!(matches!(result, Err(SyncError::Conflict(_))));
        assert_eq!(registry.resolve("invoice").unwrap().collection, "invoices");
    }
    #[tokio::test]
    async fn test_update_older_than_create_is_stale() {
        let (_store, registry) = registry();
        let now = Utc::now();
        registry.apply_created(&created("invoice", "invoice", now)).await.unwrap();

        let outcome = registry
            .apply_updated(&created("invoice", "invoices", now - ChronoDuration::seconds(1)))
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Stale);
        assert!(registry.resolve("invoice").unwrap().pending_collection.is_none());
    }

    #[tokio::test]
    async fn test_recreated_field_keeps_values_written_after_it() {
        let (store, registry) = registry();
        let now = Utc::now();
        registry.apply_created(&created("invoice", "invoice", now)).await.unwrap();
        registry.apply_field_added(&field("invoice-id", "amount", now)).await.unwrap();

        let data = |v: i64| serde_json::json!({ "amount": v }).as_object().cloned().unwrap();
        let old = store
            .insert("invoice", crate::storage::Document::new("invoice-id", data(1), None))
            .await
            .unwrap();

        let removed = FieldDeletedPayload {
            id: "amount-field".into(),
            entity_id: "invoice-id".into(),
            name: "amount".into(),
            timestamp: now + ChronoDuration::seconds(1),
        };
        registry.apply_field_deleted(&removed).await.unwrap();
        registry
            .apply_field_added(&field("invoice-id", "amount", now + ChronoDuration::seconds(2)))
            .await
            .unwrap();

        let fresh = store
            .insert("invoice", crate::storage::Document::new("invoice-id", data(42), None))
            .await
            .unwrap();
        registry.wait_for_purges().await;

        let fresh = store.get("invoice", &fresh.id).await.unwrap().unwrap();
        let old = store.get("invoice", &old.id).await.unwrap().unwrap();
        assert_eq!(fresh.lookup("data.amount"), Some(serde_json::json!(42)));
        assert_eq!(old.lookup("data.amount"), None);
        assert!(registry.resolve("invoice").unwrap().is_indexed("amount"));
    }
}
