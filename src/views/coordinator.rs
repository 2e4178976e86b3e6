//! Default-view bookkeeping.
//!
//! For every `(entity_name, view_type)` at most one active view is default.
//! Each mutation reads the whole group, edits it in memory and commits it
//! against the version it read; a concurrent writer makes the commit fail
//! with `StaleVersion` and the mutation is recomputed from fresh state.

use super::store::{ViewGroup, ViewGroupKey, ViewStore};
use crate::config::RetryPolicy;
use crate::core::{Result, SyncError, ViewDescriptor, ViewType, validate_entity_name, validate_view_name};
use crate::sync::{RetryOutcome, with_retry};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{Level, event};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateViewDto {
    pub entity_name: String,
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub view_type: ViewType,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub is_system: bool,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateViewDto {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_default: Option<bool>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub config: Option<serde_json::Value>,
}

pub struct DefaultViewCoordinator {
    store: Arc<dyn ViewStore>,
    retry: RetryPolicy,
}

impl DefaultViewCoordinator {
    pub fn new(store: Arc<dyn ViewStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Insert a view. A default view clears the flag on its group siblings
    /// in the same commit.
    pub async fn create_view(&self, dto: CreateViewDto) -> Result<ViewDescriptor> {
        validate_entity_name(&dto.entity_name)?;
        validate_view_name(&dto.name)?;

        let now = Utc::now();
        let view = ViewDescriptor {
            id: Uuid::new_v4().to_string(),
            entity_name: dto.entity_name,
            name: dto.name,
            display_name: dto.display_name,
            description: dto.description,
            view_type: dto.view_type,
            is_default: dto.is_default,
            is_system: dto.is_system,
            is_active: dto.is_active.unwrap_or(true),
            config: dto.config,
            created_at: now,
            updated_at: now,
            created_seq: self.store.next_sequence().await?,
        };
        let key = ViewGroupKey::of(&view);
        let (store, key_ref, view_ref) = (&self.store, &key, &view);

        let outcome = with_retry(&self.retry, "create view", |_| async move {
            let mut group = store.load_group(key_ref).await?;
            if view_ref.is_default {
                clear_defaults(&mut group, None);
            }
            group.views.push(view_ref.clone());
            store.commit_group(key_ref, group.version, group.views).await?;
            Ok::<_, SyncError>(())
        })
        .await;

        finish(outcome, &key)?;
        let created = view;
        event!(
            Level::INFO,
            entity = %created.entity_name,
            view = %created.name,
            view_type = %created.view_type,
            is_default = created.is_default,
            "view created"
        );
        Ok(created)
    }

    pub async fn update_view(&self, id: &str, dto: UpdateViewDto) -> Result<ViewDescriptor> {
        let key = ViewGroupKey::of(&self.get_view(id).await?);
        let (store, key_ref, dto) = (&self.store, &key, &dto);

        let outcome = with_retry(&self.retry, "update view", |_| async move {
            let mut group = store.load_group(key_ref).await?;
            if dto.is_default == Some(true) {
                clear_defaults(&mut group, Some(id));
            }

            let view = find_mut(&mut group, id)?;
            if let Some(display_name) = &dto.display_name {
                view.display_name = display_name.clone();
            }
            if dto.description.is_some() {
                view.description = dto.description.clone();
            }
            if let Some(is_default) = dto.is_default {
                view.is_default = is_default;
            }
            if let Some(is_active) = dto.is_active {
                view.is_active = is_active;
            }
            if let Some(config) = &dto.config {
                view.config = config.clone();
            }
            view.updated_at = Utc::now();
            let updated = view.clone();

            store.commit_group(key_ref, group.version, group.views).await?;
            Ok::<_, SyncError>(updated)
        })
        .await;

        finish(outcome, &key)
    }

    /// Make `id` the only default of its group.
    pub async fn set_default(&self, id: &str) -> Result<ViewDescriptor> {
        let updated = self
            .update_view(
                id,
                UpdateViewDto {
                    is_default: Some(true),
                    ..Default::default()
                },
            )
            .await?;
        event!(
            Level::INFO,
            entity = %updated.entity_name,
            view = %updated.name,
            view_type = %updated.view_type,
            "default view set"
        );
        Ok(updated)
    }

    /// Remove a view. When it was the default, the earliest-created active
    /// view left in the group is promoted in the same commit.
    pub async fn delete_view(&self, id: &str) -> Result<ViewDescriptor> {
        let key = ViewGroupKey::of(&self.get_view(id).await?);
        let (store, key_ref) = (&self.store, &key);

        let outcome = with_retry(&self.retry, "delete view", |_| async move {
            let mut group = store.load_group(key_ref).await?;
            let position = group
                .views
                .iter()
                .position(|v| v.id == id)
                .ok_or_else(|| SyncError::not_found(format!("View '{}'", id)))?;
            let removed = group.views.remove(position);

            let mut promoted = None;
            if removed.is_default && group.defaults().next().is_none() {
                if let Some(next) = group
                    .views
                    .iter_mut()
                    .filter(|v| v.is_active)
                    .min_by_key(|v| (v.created_at, v.created_seq))
                {
                    next.is_default = true;
                    next.updated_at = Utc::now();
                    promoted = Some(next.name.clone());
                }
            }

            store.commit_group(key_ref, group.version, group.views).await?;
            Ok::<_, SyncError>((removed, promoted))
        })
        .await;

        let (removed, promoted) = finish(outcome, &key)?;
        event!(
            Level::INFO,
            entity = %removed.entity_name,
            view = %removed.name,
            promoted = promoted.as_deref().unwrap_or("-"),
            "view deleted"
        );
        Ok(removed)
    }

    pub async fn get_default_view(&self, entity_name: &str, view_type: ViewType) -> Result<Option<ViewDescriptor>> {
        let group = self.store.load_group(&ViewGroupKey::new(entity_name, view_type)).await?;
        Ok(group.defaults().next().cloned())
    }

    pub async fn get_view(&self, id: &str) -> Result<ViewDescriptor> {
        self.store
            .find_view(id)
            .await?
            .ok_or_else(|| SyncError::not_found(format!("View '{}'", id)))
    }

    /// Views of an entity, newest first, optionally narrowed to one type.
    pub async fn list_views(&self, entity_name: &str, view_type: Option<ViewType>) -> Result<Vec<ViewDescriptor>> {
        let mut views: Vec<_> = self
            .store
            .list_views(entity_name)
            .await?
            .into_iter()
            .filter(|v| view_type.is_none_or(|t| v.view_type == t))
            .collect();
        views.sort_by(|a, b| (b.created_at, b.created_seq).cmp(&(a.created_at, a.created_seq)));
        Ok(views)
    }

    pub async fn is_view_name_available(&self, entity_name: &str, name: &str) -> Result<bool> {
        Ok(!self
            .store
            .list_views(entity_name)
            .await?
            .iter()
            .any(|v| v.name == name))
    }
}

fn clear_defaults(group: &mut ViewGroup, keep: Option<&str>) {
    let now = Utc::now();
    for view in group.views.iter_mut() {
        if view.is_default && keep != Some(view.id.as_str()) {
            view.is_default = false;
            view.updated_at = now;
        }
    }
}

fn find_mut<'a>(group: &'a mut ViewGroup, id: &str) -> Result<&'a mut ViewDescriptor> {
    group
        .views
        .iter_mut()
        .find(|v| v.id == id)
        .ok_or_else(|| SyncError::not_found(format!("View '{}'", id)))
}

/// Surface a lost optimistic race as a plain conflict.
fn finish<T>(outcome: RetryOutcome<T>, key: &ViewGroupKey) -> Result<T> {
    match outcome.result {
        Err(SyncError::StaleVersion { .. }) => Err(SyncError::Conflict(format!(
            "Views of '{}' kept changing, gave up after {} attempts",
            key, outcome.attempts
        ))),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::views::InMemoryViewStore;

    fn coordinator() -> DefaultViewCoordinator {
        DefaultViewCoordinator::new(
            Arc::new(InMemoryViewStore::new()),
            RetryPolicy {
                max_attempts: 8,
                initial_backoff_ms: 1,
                max_backoff_ms: 4,
            },
        )
    }

    fn dto(name: &str, is_default: bool) -> CreateViewDto {
        CreateViewDto {
            entity_name: "invoice".into(),
            name: name.into(),
            display_name: name.into(),
            description: None,
            view_type: ViewType::List,
            is_default,
            is_system: false,
            is_active: None,
            config: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn test_update_default_false_leaves_group_without_default() {
        let views = coordinator();
        let a = views.create_view(dto("all", true)).await.unwrap();

        views
            .update_view(
                &a.id,
                UpdateViewDto {
                    is_default: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(views.get_default_view("invoice", ViewType::List).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_view_name_conflicts() {
        let views = coordinator();
        views.create_view(dto("all", false)).await.unwrap();
        assert!(matches!(
            views.create_view(dto("all", true)).await,
            Err(SyncError::Conflict(_))
        ));
        assert!(!views.is_view_name_available("invoice", "all").await.unwrap());
        assert!(views.is_view_name_available("invoice", "mine").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_view_is_not_found() {
        let views = coordinator();
        assert!(matches!(views.set_default("nope").await, Err(SyncError::NotFound(_))));
        assert!(matches!(views.delete_view("nope").await, Err(SyncError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_views_newest_first() {
        let views = coordinator();
        views.create_view(dto("first", false)).await.unwrap();
        views.create_view(dto("second", false)).await.unwrap();

        let names: Vec<_> = views
            .list_views("invoice", Some(ViewType::List))
            .await
            .unwrap()
            .into_iter()
            .map(|v| v.name)
            .collect();
        assert_eq!(names, vec!["second", "first"]);
        assert!(views.list_views("invoice", Some(ViewType::Form)).await.unwrap().is_empty());
    }
}
