use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Where an entity's records live right now.
///
/// Handles are plain snapshots: holding one never pins registry state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageHandle {
    pub entity_name: String,
    pub entity_id: String,
    /// Collection recorded when the entity was created (or last migrated).
    pub collection: String,
    /// Target announced by a rename that has not been migrated yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_collection: Option<String>,
    pub indexed_fields: BTreeSet<String>,
}

impl StorageHandle {
    /// Collections to consult for reads, primary first.
    pub fn targets(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.collection.as_str()).chain(self.pending_collection.as_deref())
    }

    pub fn is_indexed(&self, field_name: &str) -> bool {
        self.indexed_fields.contains(field_name)
    }
}
