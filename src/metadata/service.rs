//! Metadata-side operations. Each mutation writes the store first and then
//! publishes the matching event, keyed by entity name.

use super::store::MetadataStore;
use crate::core::{
    EntityDescriptor, FieldDescriptor, FieldType, Result, SyncError, storage_target_for,
    validate_entity_name, validate_field_name, validate_storage_target,
};
use crate::events::EventPublisher;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEntityDto {
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Derived from `name` when absent.
    #[serde(default, rename = "tableName")]
    pub storage_target: Option<String>,
    #[serde(default)]
    pub is_system: bool,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEntityDto {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    /// Changing the target does not move records; see `complete_migration`.
    #[serde(default, rename = "tableName")]
    pub storage_target: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFieldDto {
    pub entity_id: String,
    pub name: String,
    pub display_name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub is_system: bool,
    /// Defaults to one past the entity's current highest order.
    #[serde(default)]
    pub order: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFieldDto {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default, rename = "type")]
    pub field_type: Option<FieldType>,
    #[serde(default)]
    pub is_required: Option<bool>,
    #[serde(default)]
    pub order: Option<i64>,
}

pub struct MetadataService {
    store: Arc<dyn MetadataStore>,
    publisher: EventPublisher,
}

impl MetadataService {
    pub fn new(store: Arc<dyn MetadataStore>, publisher: EventPublisher) -> Self {
        Self { store, publisher }
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    pub async fn create_entity(&self, dto: CreateEntityDto) -> Result<EntityDescriptor> {
        validate_entity_name(&dto.name)?;
        if !self.is_entity_name_available(&dto.name).await? {
            return Err(SyncError::Conflict(format!(
                "Entity name '{}' is already taken",
                dto.name
            )));
        }

        let storage_target = match dto.storage_target {
            Some(target) => {
                validate_storage_target(&target)?;
                target
            }
            None => self.generate_storage_target(&dto.name).await?,
        };

        let now = Utc::now();
        let entity = EntityDescriptor {
            id: Uuid::new_v4().to_string(),
            name: dto.name,
            display_name: dto.display_name,
            description: dto.description,
            storage_target,
            is_system: dto.is_system,
            is_active: dto.is_active.unwrap_or(true),
            created_at: now,
            updated_at: now,
        };

        let entity = self.store.insert_entity(entity).await?;
        info!(entity = %entity.name, collection = %entity.storage_target, "entity created");
        self.publisher.entity_created(&entity).await?;
        Ok(entity)
    }

    pub async fn get_entity(&self, id: &str) -> Result<EntityDescriptor> {
        self.store
            .get_entity(id)
            .await?
            .ok_or_else(|| SyncError::not_found(format!("Entity '{}'", id)))
    }

    pub async fn list_entities(&self) -> Result<Vec<EntityDescriptor>> {
        self.store.list_entities().await
    }

    pub async fn update_entity(&self, id: &str, dto: UpdateEntityDto) -> Result<EntityDescriptor> {
        let mut entity = self.get_entity(id).await?;

        if let Some(display_name) = dto.display_name {
            entity.display_name = display_name;
        }
        if dto.description.is_some() {
            entity.description = dto.description;
        }
        if let Some(is_active) = dto.is_active {
            entity.is_active = is_active;
        }
        if let Some(target) = dto.storage_target {
            validate_storage_target(&target)?;
            entity.storage_target = target;
        }
        entity.updated_at = Utc::now();

        let entity = self.store.update_entity(entity).await?;
        self.publisher.entity_updated(&entity).await?;
        Ok(entity)
    }

    /// Announce that an entity's records now live in its current storage
    /// target, letting the registry swap a deferred rename.
    pub async fn complete_migration(&self, id: &str) -> Result<EntityDescriptor> {
        let entity = self.get_entity(id).await?;
        self.publisher.entity_migrated(&entity).await?;
        Ok(entity)
    }

    pub async fn delete_entity(&self, id: &str) -> Result<EntityDescriptor> {
        let entity = self
            .store
            .delete_entity(id)
            .await?
            .ok_or_else(|| SyncError::not_found(format!("Entity '{}'", id)))?;
        info!(entity = %entity.name, "entity deleted");
        self.publisher.entity_deleted(&entity).await?;
        Ok(entity)
    }

    pub async fn create_field(&self, dto: CreateFieldDto) -> Result<FieldDescriptor> {
        validate_field_name(&dto.name)?;
        let entity = self.get_entity(&dto.entity_id).await?;
        if !self.is_field_name_available(&entity.id, &dto.name).await? {
            return Err(SyncError::Conflict(format!(
                "Field '{}' already exists on entity '{}'",
                dto.name, entity.name
            )));
        }

        let order = match dto.order {
            Some(order) => order,
            None => self
                .store
                .list_fields(&entity.id)
                .await?
                .iter()
                .map(|f| f.order)
                .max()
                .map_or(0, |max| max + 1),
        };

        let now = Utc::now();
        let field = FieldDescriptor {
            id: Uuid::new_v4().to_string(),
            entity_id: entity.id.clone(),
            entity_name: entity.name.clone(),
            name: dto.name,
            display_name: dto.display_name,
            field_type: dto.field_type,
            is_required: dto.is_required,
            is_system: dto.is_system,
            order,
            created_at: now,
            updated_at: now,
        };

        let field = self.store.insert_field(field).await?;
        self.publisher.field_created(&field).await?;
        Ok(field)
    }

    pub async fn get_field(&self, id: &str) -> Result<FieldDescriptor> {
        self.store
            .get_field(id)
            .await?
            .ok_or_else(|| SyncError::not_found(format!("Field '{}'", id)))
    }

    pub async fn list_fields(&self, entity_id: &str) -> Result<Vec<FieldDescriptor>> {
        self.store.list_fields(entity_id).await
    }

    pub async fn update_field(&self, id: &str, dto: UpdateFieldDto) -> Result<FieldDescriptor> {
        let mut field = self.get_field(id).await?;

        if let Some(display_name) = dto.display_name {
            field.display_name = display_name;
        }
        if let Some(field_type) = dto.field_type {
            field.field_type = field_type;
        }
        if let Some(is_required) = dto.is_required {
            field.is_required = is_required;
        }
        if let Some(order) = dto.order {
            field.order = order;
        }
        field.updated_at = Utc::now();

        let field = self.store.update_field(field).await?;
        self.publisher.field_updated(&field).await?;
        Ok(field)
    }

    pub async fn delete_field(&self, id: &str) -> Result<FieldDescriptor> {
        let field = self
            .store
            .delete_field(id)
            .await?
            .ok_or_else(|| SyncError::not_found(format!("Field '{}'", id)))?;
        self.publisher.field_deleted(&field).await?;
        Ok(field)
    }

    /// Assign `order = position` to each listed field of the entity. Ids that
    /// do not belong to the entity are ignored.
    pub async fn reorder_fields(&self, entity_id: &str, field_ids: &[String]) -> Result<Vec<FieldDescriptor>> {
        let mut reordered = Vec::with_capacity(field_ids.len());

        for (position, id) in field_ids.iter().enumerate() {
            let Some(mut field) = self.store.get_field(id).await? else {
                continue;
            };
            if field.entity_id != entity_id {
                continue;
            }
            field.order = position as i64;
            field.updated_at = Utc::now();
            reordered.push(self.store.update_field(field).await?);
        }

        Ok(reordered)
    }

    pub async fn is_entity_name_available(&self, name: &str) -> Result<bool> {
        Ok(self.store.find_entity_by_name(name).await?.is_none())
    }

    pub async fn is_field_name_available(&self, entity_id: &str, name: &str) -> Result<bool> {
        Ok(!self
            .store
            .list_fields(entity_id)
            .await?
            .iter()
            .any(|f| f.name == name))
    }

    /// `salesOrder` -> `sales_order`, then `sales_order_2`, `sales_order_3`, ...
    async fn generate_storage_target(&self, entity_name: &str) -> Result<String> {
        let base = storage_target_for(entity_name);
        if !self.store.storage_target_taken(&base).await? {
            return Ok(base);
        }

        let mut suffix = 2;
        loop {
            let candidate = format!("{}_{}", base, suffix);
            if !self.store.storage_target_taken(&candidate).await? {
                return Ok(candidate);
            }
            suffix += 1;
        }
    }
}
