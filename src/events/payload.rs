//! Wire payloads for metadata topics.
//!
//! Payloads are JSON objects with camelCase keys and RFC 3339 timestamps.
//! Decoding validates names so a malformed event is rejected before it can
//! touch the registry.

use super::topic::Topic;
use crate::core::{
    EntityDescriptor, FieldDescriptor, FieldType, Result, SyncError, validate_entity_name,
    validate_field_name, validate_storage_target,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `entity-created` / `entity-updated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityEventPayload {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    pub table_name: String,
    #[serde(default)]
    pub is_system: bool,
    pub timestamp: DateTime<Utc>,
}

/// `entity-deleted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDeletedPayload {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub table_name: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// `entity-migrated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMigratedPayload {
    pub id: String,
    pub name: String,
    pub table_name: String,
    pub timestamp: DateTime<Utc>,
}

/// `field-created` / `field-updated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldEventPayload {
    pub id: String,
    pub entity_id: String,
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub is_system: bool,
    pub timestamp: DateTime<Utc>,
}

/// `field-deleted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDeletedPayload {
    pub id: String,
    pub entity_id: String,
    pub name: String,
    pub timestamp: DateTime<Utc>,
}

/// A decoded metadata event.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataEvent {
    EntityCreated(EntityEventPayload),
    EntityUpdated(EntityEventPayload),
    EntityDeleted(EntityDeletedPayload),
    EntityMigrated(EntityMigratedPayload),
    FieldCreated(FieldEventPayload),
    FieldUpdated(FieldEventPayload),
    FieldDeleted(FieldDeletedPayload),
}

impl MetadataEvent {
    /// Decode and validate a raw message body for `topic`.
    pub fn decode(topic: &str, payload: &[u8]) -> Result<Self> {
        let topic: Topic = topic.parse()?;
        let event = match topic {
            Topic::EntityCreated => Self::EntityCreated(serde_json::from_slice(payload)?),
            Topic::EntityUpdated => Self::EntityUpdated(serde_json::from_slice(payload)?),
            Topic::EntityDeleted => Self::EntityDeleted(serde_json::from_slice(payload)?),
            Topic::EntityMigrated => Self::EntityMigrated(serde_json::from_slice(payload)?),
            Topic::FieldCreated => Self::FieldCreated(serde_json::from_slice(payload)?),
            Topic::FieldUpdated => Self::FieldUpdated(serde_json::from_slice(payload)?),
            Topic::FieldDeleted => Self::FieldDeleted(serde_json::from_slice(payload)?),
        };
        event.validate()?;
        Ok(event)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let bytes = match self {
            Self::EntityCreated(p) | Self::EntityUpdated(p) => serde_json::to_vec(p)?,
            Self::EntityDeleted(p) => serde_json::to_vec(p)?,
            Self::EntityMigrated(p) => serde_json::to_vec(p)?,
            Self::FieldCreated(p) | Self::FieldUpdated(p) => serde_json::to_vec(p)?,
            Self::FieldDeleted(p) => serde_json::to_vec(p)?,
        };
        Ok(bytes)
    }

    pub fn topic(&self) -> Topic {
        match self {
            Self::EntityCreated(_) => Topic::EntityCreated,
            Self::EntityUpdated(_) => Topic::EntityUpdated,
            Self::EntityDeleted(_) => Topic::EntityDeleted,
            Self::EntityMigrated(_) => Topic::EntityMigrated,
            Self::FieldCreated(_) => Topic::FieldCreated,
            Self::FieldUpdated(_) => Topic::FieldUpdated,
            Self::FieldDeleted(_) => Topic::FieldDeleted,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::EntityCreated(p) | Self::EntityUpdated(p) => p.timestamp,
            Self::EntityDeleted(p) => p.timestamp,
            Self::EntityMigrated(p) => p.timestamp,
            Self::FieldCreated(p) | Self::FieldUpdated(p) => p.timestamp,
            Self::FieldDeleted(p) => p.timestamp,
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            Self::EntityCreated(p) | Self::EntityUpdated(p) => {
                validate_entity_name(&p.name)?;
                validate_storage_target(&p.table_name)
            }
            Self::EntityDeleted(p) => validate_entity_name(&p.name),
            Self::EntityMigrated(p) => {
                validate_entity_name(&p.name)?;
                validate_storage_target(&p.table_name)
            }
            Self::FieldCreated(p) | Self::FieldUpdated(p) => {
                require_non_empty("entityId", &p.entity_id)?;
                validate_field_name(&p.name)
            }
            Self::FieldDeleted(p) => {
                require_non_empty("entityId", &p.entity_id)?;
                validate_field_name(&p.name)
            }
        }
    }
}

fn require_non_empty(key: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(SyncError::Validation(format!("'{}' must not be empty", key)));
    }
    Ok(())
}

impl EntityEventPayload {
    pub fn from_descriptor(entity: &EntityDescriptor) -> Self {
        Self {
            id: entity.id.clone(),
            name: entity.name.clone(),
            display_name: entity.display_name.clone(),
            table_name: entity.storage_target.clone(),
            is_system: entity.is_system,
            timestamp: Utc::now(),
        }
    }
}

impl FieldEventPayload {
    pub fn from_descriptor(field: &FieldDescriptor) -> Self {
        Self {
            id: field.id.clone(),
            entity_id: field.entity_id.clone(),
            name: field.name.clone(),
            display_name: field.display_name.clone(),
            field_type: field.field_type,
            is_required: field.is_required,
            is_system: field.is_system,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bytes(value: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn test_decode_entity_created() {
        let event = MetadataEvent::decode(
            "entity-created",
            &bytes(json!({
                "id": "e1",
                "name": "invoice",
                "displayName": "Invoice",
                "tableName": "invoice",
                "isSystem": false,
                "timestamp": "2024-05-01T10:00:00Z"
            })),
        )
        .unwrap();

        match event {
            MetadataEvent::EntityCreated(p) => {
                assert_eq!(p.name, "invoice");
                assert_eq!(p.table_name, "invoice");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_decode_field_defaults_optional_flags() {
        let event = MetadataEvent::decode(
            "field-created",
            &bytes(json!({
                "id": "f1",
                "entityId": "e1",
                "name": "amount",
                "type": "money",
                "timestamp": "2024-05-01T10:00:00Z"
            })),
        )
        .unwrap();

        let MetadataEvent::FieldCreated(p) = event else {
            panic!("expected field-created");
        };
        assert_eq!(p.field_type, FieldType::Money);
        assert!(!p.is_required);
        assert_eq!(p.display_name, "");
    }

    #[test]
    fn test_decode_rejects_malformed_payloads() {
        assert!(matches!(
            MetadataEvent::decode("entity-created", b"{oops"),
            Err(SyncError::Validation(_))
        ));
        assert!(matches!(
            MetadataEvent::decode(
                "entity-created",
                &bytes(json!({"id": "e1", "name": "Bad Name", "tableName": "t", "timestamp": "2024-05-01T10:00:00Z"}))
            ),
            Err(SyncError::Validation(_))
        ));
        assert!(matches!(
            MetadataEvent::decode(
                "field-created",
                &bytes(json!({"id": "f", "entityId": "e1", "name": "amount", "type": "decimal", "timestamp": "2024-05-01T10:00:00Z"}))
            ),
            Err(SyncError::Validation(_))
        ));
        assert!(MetadataEvent::decode("entity-renamed", b"{}").is_err());
    }

    #[test]
    fn test_encode_then_decode_preserves_topic() {
        let event = MetadataEvent::FieldDeleted(FieldDeletedPayload {
            id: "f1".into(),
            entity_id: "e1".into(),
            name: "amount".into(),
            timestamp: Utc::now(),
        });
        let raw = event.encode().unwrap();
        let decoded = MetadataEvent::decode(event.topic().as_str(), &raw).unwrap();
        assert_eq!(decoded, event);
    }
}
