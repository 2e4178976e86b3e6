use crate::core::SyncError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Metadata change topics published by the metadata side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topic {
    EntityCreated,
    EntityUpdated,
    EntityDeleted,
    FieldCreated,
    FieldUpdated,
    FieldDeleted,
    /// Explicit signal that an entity's data now lives in its new storage target.
    EntityMigrated,
}

impl Topic {
    /// Everything the synchronization consumer subscribes to.
    pub const METADATA: [Topic; 7] = [
        Topic::EntityCreated,
        Topic::EntityUpdated,
        Topic::EntityDeleted,
        Topic::FieldCreated,
        Topic::FieldUpdated,
        Topic::FieldDeleted,
        Topic::EntityMigrated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::EntityCreated => "entity-created",
            Topic::EntityUpdated => "entity-updated",
            Topic::EntityDeleted => "entity-deleted",
            Topic::FieldCreated => "field-created",
            Topic::FieldUpdated => "field-updated",
            Topic::FieldDeleted => "field-deleted",
            Topic::EntityMigrated => "entity-migrated",
        }
    }

    pub fn is_field_event(&self) -> bool {
        matches!(
            self,
            Topic::FieldCreated | Topic::FieldUpdated | Topic::FieldDeleted
        )
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::METADATA
            .iter()
            .copied()
            .find(|topic| topic.as_str() == s)
            .ok_or_else(|| SyncError::Validation(format!("Unknown topic '{}'", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_names() {
        assert_eq!(Topic::EntityCreated.as_str(), "entity-created");
        assert_eq!("field-deleted".parse::<Topic>().unwrap(), Topic::FieldDeleted);
        assert!("entity-renamed".parse::<Topic>().is_err());
        assert!(Topic::FieldUpdated.is_field_event());
        assert!(!Topic::EntityMigrated.is_field_event());
    }
}
