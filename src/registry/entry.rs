use super::handle::StorageHandle;
use crate::core::FieldType;
use crate::events::Topic;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// What applying one event did to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// State changed.
    Applied,
    /// The event had already been applied; nothing to do.
    Duplicate,
    /// The event is older than what the registry already reflects.
    Stale,
    /// The event refers to something the registry does not know.
    Skipped,
}

/// Per-field state kept next to the index set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldState {
    pub field_type: FieldType,
    pub required: bool,
}

/// Registry bookkeeping for one entity.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub entity_id: String,
    pub entity_name: String,
    pub storage_target: String,
    pub pending_target: Option<String>,
    pub is_system: bool,
    pub indexed_fields: BTreeSet<String>,
    pub fields: BTreeMap<String, FieldState>,
    /// Newest event timestamp applied, per topic.
    pub last_applied: HashMap<Topic, DateTime<Utc>>,
    /// Newest field event timestamp applied, per field name.
    pub field_marks: HashMap<String, DateTime<Utc>>,
}

impl RegistryEntry {
    pub fn new(entity_id: &str, entity_name: &str, storage_target: &str, is_system: bool) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            entity_name: entity_name.to_string(),
            storage_target: storage_target.to_string(),
            pending_target: None,
            is_system,
            indexed_fields: BTreeSet::new(),
            fields: BTreeMap::new(),
            last_applied: HashMap::new(),
            field_marks: HashMap::new(),
        }
    }

    pub fn handle(&self) -> StorageHandle {
        StorageHandle {
            entity_name: self.entity_name.clone(),
            entity_id: self.entity_id.clone(),
            collection: self.storage_target.clone(),
            pending_collection: self.pending_target.clone(),
            indexed_fields: self.indexed_fields.clone(),
        }
    }

    pub fn is_indexed(&self, field_name: &str) -> bool {
        self.indexed_fields.contains(field_name)
    }

    /// True when an event of `topic` stamped `at` predates what was applied.
    pub fn is_stale(&self, topic: Topic, at: DateTime<Utc>) -> bool {
        self.last_applied.get(&topic).is_some_and(|seen| at < *seen)
    }

    pub fn is_field_stale(&self, field: &str, at: DateTime<Utc>) -> bool {
        self.field_marks.get(field).is_some_and(|seen| at < *seen)
    }

    pub fn mark(&mut self, topic: Topic, at: DateTime<Utc>) {
        let slot = self.last_applied.entry(topic).or_insert(at);
        if at > *slot {
            *slot = at;
        }
    }

    pub fn mark_field(&mut self, topic: Topic, field: &str, at: DateTime<Utc>) {
        self.mark(topic, at);
        let slot = self.field_marks.entry(field.to_string()).or_insert(at);
        if at > *slot {
            *slot = at;
        }
    }
}
