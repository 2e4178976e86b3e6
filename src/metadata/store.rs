//! Authoritative entity and field records.

use crate::core::{EntityDescriptor, FieldDescriptor, Result, SyncError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// Entity and field CRUD backing the metadata side.
///
/// Uniqueness: entity names and storage targets across entities, field
/// names within an entity. Violations fail with `Conflict`.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn insert_entity(&self, entity: EntityDescriptor) -> Result<EntityDescriptor>;

    async fn get_entity(&self, id: &str) -> Result<Option<EntityDescriptor>>;

    async fn find_entity_by_name(&self, name: &str) -> Result<Option<EntityDescriptor>>;

    async fn storage_target_taken(&self, target: &str) -> Result<bool>;

    /// Entities ordered by creation time.
    async fn list_entities(&self) -> Result<Vec<EntityDescriptor>>;

    async fn update_entity(&self, entity: EntityDescriptor) -> Result<EntityDescriptor>;

    /// Removes the entity together with its fields.
    async fn delete_entity(&self, id: &str) -> Result<Option<EntityDescriptor>>;

    async fn insert_field(&self, field: FieldDescriptor) -> Result<FieldDescriptor>;

    async fn get_field(&self, id: &str) -> Result<Option<FieldDescriptor>>;

    /// Fields of one entity ordered by `order`, then name.
    async fn list_fields(&self, entity_id: &str) -> Result<Vec<FieldDescriptor>>;

    async fn update_field(&self, field: FieldDescriptor) -> Result<FieldDescriptor>;

    async fn delete_field(&self, id: &str) -> Result<Option<FieldDescriptor>>;
}

#[derive(Default)]
struct MetadataTables {
    entities: HashMap<String, EntityDescriptor>,
    fields: HashMap<String, FieldDescriptor>,
}

#[derive(Default)]
pub struct InMemoryMetadataStore {
    tables: RwLock<MetadataTables>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataTables {
    fn check_entity_unique(&self, entity: &EntityDescriptor) -> Result<()> {
        for other in self.entities.values().filter(|e| e.id != entity.id) {
            if other.name == entity.name {
                return Err(SyncError::Conflict(format!(
                    "Entity name '{}' is already taken",
                    entity.name
                )));
            }
            if other.storage_target == entity.storage_target {
                return Err(SyncError::Conflict(format!(
                    "Storage target '{}' is already used by '{}'",
                    entity.storage_target, other.name
                )));
            }
        }
        Ok(())
    }

    fn check_field_unique(&self, field: &FieldDescriptor) -> Result<()> {
        let clash = self
            .fields
            .values()
            .any(|f| f.id != field.id && f.entity_id == field.entity_id && f.name == field.name);
        if clash {
            return Err(SyncError::Conflict(format!(
                "Field '{}' already exists on entity '{}'",
                field.name, field.entity_name
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn insert_entity(&self, entity: EntityDescriptor) -> Result<EntityDescriptor> {
        let mut tables = self.tables.write()?;
        if tables.entities.contains_key(&entity.id) {
            return Err(SyncError::Conflict(format!("Entity id '{}' already exists", entity.id)));
        }
        tables.check_entity_unique(&entity)?;
        tables.entities.insert(entity.id.clone(), entity.clone());
        Ok(entity)
    }

    async fn get_entity(&self, id: &str) -> Result<Option<EntityDescriptor>> {
        Ok(self.tables.read()?.entities.get(id).cloned())
    }

    async fn find_entity_by_name(&self, name: &str) -> Result<Option<EntityDescriptor>> {
        Ok(self
            .tables
            .read()?
            .entities
            .values()
            .find(|e| e.name == name)
            .cloned())
    }

    async fn storage_target_taken(&self, target: &str) -> Result<bool> {
        Ok(self
            .tables
            .read()?
            .entities
            .values()
            .any(|e| e.storage_target == target))
    }

    async fn list_entities(&self) -> Result<Vec<EntityDescriptor>> {
        let mut entities: Vec<_> = self.tables.read()?.entities.values().cloned().collect();
        entities.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        Ok(entities)
    }

    async fn update_entity(&self, entity: EntityDescriptor) -> Result<EntityDescriptor> {
        let mut tables = self.tables.write()?;
        if !tables.entities.contains_key(&entity.id) {
            return Err(SyncError::not_found(format!("Entity '{}'", entity.id)));
        }
        tables.check_entity_unique(&entity)?;
        tables.entities.insert(entity.id.clone(), entity.clone());
        Ok(entity)
    }

    async fn delete_entity(&self, id: &str) -> Result<Option<EntityDescriptor>> {
        let mut tables = self.tables.write()?;
        let removed = tables.entities.remove(id);
        if removed.is_some() {
            tables.fields.retain(|_, f| f.entity_id != id);
        }
        Ok(removed)
    }

    async fn insert_field(&self, field: FieldDescriptor) -> Result<FieldDescriptor> {
        let mut tables = self.tables.write()?;
        if !tables.entities.contains_key(&field.entity_id) {
            return Err(SyncError::not_found(format!("Entity '{}'", field.entity_id)));
        }
        if tables.fields.contains_key(&field.id) {
            return Err(SyncError::Conflict(format!("Field id '{}' already exists", field.id)));
        }
        tables.check_field_unique(&field)?;
        tables.fields.insert(field.id.clone(), field.clone());
        Ok(field)
    }

    async fn get_field(&self, id: &str) -> Result<Option<FieldDescriptor>> {
        Ok(self.tables.read()?.fields.get(id).cloned())
    }

    async fn list_fields(&self, entity_id: &str) -> Result<Vec<FieldDescriptor>> {
        let mut fields: Vec<_> = self
            .tables
            .read()?
            .fields
            .values()
            .filter(|f| f.entity_id == entity_id)
            .cloned()
            .collect();
        fields.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.name.cmp(&b.name)));
        Ok(fields)
    }

    async fn update_field(&self, field: FieldDescriptor) -> Result<FieldDescriptor> {
        let mut tables = self.tables.write()?;
        if !tables.fields.contains_key(&field.id) {
            return Err(SyncError::not_found(format!("Field '{}'", field.id)));
        }
        tables.check_field_unique(&field)?;
        tables.fields.insert(field.id.clone(), field.clone());
        Ok(field)
    }

    async fn delete_field(&self, id: &str) -> Result<Option<FieldDescriptor>> {
        Ok(self.tables.write()?.fields.remove(id))
    }
}
