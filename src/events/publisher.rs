use super::bus::EventBus;
use super::payload::{
    EntityDeletedPayload, EntityEventPayload, EntityMigratedPayload, FieldDeletedPayload,
    FieldEventPayload, MetadataEvent,
};
use crate::core::{EntityDescriptor, FieldDescriptor, Result};
use chrono::Utc;
use std::sync::Arc;
use tracing::{Level, event};

/// Publishes metadata changes, keyed by entity name so that every event of
/// one entity stays on one partition.
#[derive(Clone)]
pub struct EventPublisher {
    bus: Arc<dyn EventBus>,
}

impl EventPublisher {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }

    pub async fn entity_created(&self, entity: &EntityDescriptor) -> Result<u64> {
        let event = MetadataEvent::EntityCreated(EntityEventPayload::from_descriptor(entity));
        self.publish(&entity.name, event).await
    }

    pub async fn entity_updated(&self, entity: &EntityDescriptor) -> Result<u64> {
        let event = MetadataEvent::EntityUpdated(EntityEventPayload::from_descriptor(entity));
        self.publish(&entity.name, event).await
    }

    pub async fn entity_deleted(&self, entity: &EntityDescriptor) -> Result<u64> {
        let event = MetadataEvent::EntityDeleted(EntityDeletedPayload {
            id: entity.id.clone(),
            name: entity.name.clone(),
            table_name: Some(entity.storage_target.clone()),
            timestamp: Utc::now(),
        });
        self.publish(&entity.name, event).await
    }

    /// Announce that `entity`'s records were moved to its current storage target.
    pub async fn entity_migrated(&self, entity: &EntityDescriptor) -> Result<u64> {
        let event = MetadataEvent::EntityMigrated(EntityMigratedPayload {
            id: entity.id.clone(),
            name: entity.name.clone(),
            table_name: entity.storage_target.clone(),
            timestamp: Utc::now(),
        });
        self.publish(&entity.name, event).await
    }

    pub async fn field_created(&self, field: &FieldDescriptor) -> Result<u64> {
        let event = MetadataEvent::FieldCreated(FieldEventPayload::from_descriptor(field));
        self.publish(&field.entity_name, event).await
    }

    pub async fn field_updated(&self, field: &FieldDescriptor) -> Result<u64> {
        let event = MetadataEvent::FieldUpdated(FieldEventPayload::from_descriptor(field));
        self.publish(&field.entity_name, event).await
    }

    pub async fn field_deleted(&self, field: &FieldDescriptor) -> Result<u64> {
        let event = MetadataEvent::FieldDeleted(FieldDeletedPayload {
            id: field.id.clone(),
            entity_id: field.entity_id.clone(),
            name: field.name.clone(),
            timestamp: Utc::now(),
        });
        self.publish(&field.entity_name, event).await
    }

    async fn publish(&self, key: &str, event: MetadataEvent) -> Result<u64> {
        let topic = event.topic();
        let payload = event.encode()?;
        match self.bus.publish(topic.as_str(), key, payload).await {
            Ok(offset) => {
                event!(Level::INFO, topic = %topic, key, offset, "metadata event published");
                Ok(offset)
            }
            Err(err) => {
                event!(Level::ERROR, topic = %topic, key, error = %err, "metadata event publish failed");
                Err(err)
            }
        }
    }
}
