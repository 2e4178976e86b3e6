//! Versioned view groups.
//!
//! All views sharing `(entity_name, view_type)` form one group that is read
//! and written as a unit. A commit names the version it was computed from and
//! fails with `StaleVersion` when another writer got there first, which turns
//! the clear-then-set default protocol into one compare-and-swap.

use crate::core::{Result, SyncError, ViewDescriptor, ViewType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewGroupKey {
    pub entity_name: String,
    pub view_type: ViewType,
}

impl ViewGroupKey {
    pub fn new(entity_name: impl Into<String>, view_type: ViewType) -> Self {
        Self {
            entity_name: entity_name.into(),
            view_type,
        }
    }

    pub fn of(view: &ViewDescriptor) -> Self {
        Self::new(view.entity_name.clone(), view.view_type)
    }
}

impl fmt::Display for ViewGroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_name, self.view_type)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewGroup {
    pub key: ViewGroupKey,
    /// 0 for a group that was never written.
    pub version: u64,
    pub views: Vec<ViewDescriptor>,
}

impl ViewGroup {
    pub fn defaults(&self) -> impl Iterator<Item = &ViewDescriptor> {
        self.views.iter().filter(|v| v.is_default && v.is_active)
    }
}

#[async_trait]
pub trait ViewStore: Send + Sync {
    async fn load_group(&self, key: &ViewGroupKey) -> Result<ViewGroup>;

    /// Replace the group's views if its version is still `expected_version`.
    /// Returns the new version. View names must stay unique per entity.
    async fn commit_group(
        &self,
        key: &ViewGroupKey,
        expected_version: u64,
        views: Vec<ViewDescriptor>,
    ) -> Result<u64>;

    async fn find_view(&self, id: &str) -> Result<Option<ViewDescriptor>>;

    async fn list_views(&self, entity_name: &str) -> Result<Vec<ViewDescriptor>>;

    /// Monotonic creation sequence used to order views created in the same instant.
    async fn next_sequence(&self) -> Result<u64>;
}

#[derive(Default)]
pub struct InMemoryViewStore {
    groups: RwLock<HashMap<ViewGroupKey, ViewGroup>>,
    sequence: AtomicU64,
}

impl InMemoryViewStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn check_unique_names(
    groups: &HashMap<ViewGroupKey, ViewGroup>,
    key: &ViewGroupKey,
    views: &[ViewDescriptor],
) -> Result<()> {
    for (i, view) in views.iter().enumerate() {
        let clash_in_group = views[..i].iter().any(|other| other.name == view.name);
        let clash_elsewhere = groups
            .iter()
            .filter(|(other_key, _)| *other_key != key && other_key.entity_name == key.entity_name)
            .flat_map(|(_, group)| group.views.iter())
            .any(|other| other.name == view.name && other.id != view.id);

        if clash_in_group || clash_elsewhere {
            return Err(SyncError::Conflict(format!(
                "View name '{}' is already used by entity '{}'",
                view.name, key.entity_name
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl ViewStore for InMemoryViewStore {
    async fn load_group(&self, key: &ViewGroupKey) -> Result<ViewGroup> {
        Ok(self
            .groups
            .read()?
            .get(key)
            .cloned()
            .unwrap_or_else(|| ViewGroup {
                key: key.clone(),
                version: 0,
                views: Vec::new(),
            }))
    }

    async fn commit_group(
        &self,
        key: &ViewGroupKey,
        expected_version: u64,
        views: Vec<ViewDescriptor>,
    ) -> Result<u64> {
        let mut groups = self.groups.write()?;
        let actual = groups.get(key).map_or(0, |group| group.version);
        if actual != expected_version {
            return Err(SyncError::StaleVersion {
                key: key.to_string(),
                expected: expected_version,
                actual,
            });
        }
        check_unique_names(&groups, key, &views)?;

        let version = actual + 1;
        groups.insert(
            key.clone(),
            ViewGroup {
                key: key.clone(),
                version,
                views,
            },
        );
        Ok(version)
    }

    async fn find_view(&self, id: &str) -> Result<Option<ViewDescriptor>> {
        Ok(self
            .groups
            .read()?
            .values()
            .flat_map(|group| group.views.iter())
            .find(|view| view.id == id)
            .cloned())
    }

    async fn list_views(&self, entity_name: &str) -> Result<Vec<ViewDescriptor>> {
        Ok(self
            .groups
            .read()?
            .iter()
            .filter(|(key, _)| key.entity_name == entity_name)
            .flat_map(|(_, group)| group.views.iter().cloned())
            .collect())
    }

    async fn next_sequence(&self) -> Result<u64> {
        Ok(self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn view(id: &str, name: &str) -> ViewDescriptor {
        let now = Utc::now();
        ViewDescriptor {
            id: id.into(),
            entity_name: "invoice".into(),
            name: name.into(),
            display_name: name.into(),
            description: None,
            view_type: ViewType::List,
            is_default: false,
            is_system: false,
            is_active: true,
            config: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
            created_seq: 0,
        }
    }

    #[tokio::test]
    async fn test_commit_checks_version() {
        let store = InMemoryViewStore::new();
        let key = ViewGroupKey::new("invoice", ViewType::List);

        assert_eq!(store.commit_group(&key, 0, vec![view("a", "all")]).await.unwrap(), 1);
        let stale = store.commit_group(&key, 0, vec![view("b", "mine")]).await;
        assert!(matches!(
            stale,
            Err(SyncError::StaleVersion { expected: 0, actual: 1, .. })
        ));
        assert_eq!(store.load_group(&key).await.unwrap().views.len(), 1);
    }

    #[tokio::test]
    async fn test_names_unique_across_view_types() {
        let store = InMemoryViewStore::new();
        let list = ViewGroupKey::new("invoice", ViewType::List);
        let form = ViewGroupKey::new("invoice", ViewType::Form);
        store.commit_group(&list, 0, vec![view("a", "main")]).await.unwrap();

        let mut form_view = view("b", "main");
        form_view.view_type = ViewType::Form;
        assert!(matches!(
            store.commit_group(&form, 0, vec![form_view]).await,
            Err(SyncError::Conflict(_))
        ));
    }
}
