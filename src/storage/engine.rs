use crate::core::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::cmp::Ordering;

/// Keys stored next to `data` on every document.
pub const META_KEYS: [&str; 6] = [
    "id",
    "entityId",
    "createdAt",
    "updatedAt",
    "createdBy",
    "updatedBy",
];

/// A schema-less record. Everything user-defined lives under `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub entity_id: String,
    pub data: Map<String, JsonValue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
}

impl Document {
    pub fn new(entity_id: &str, data: Map<String, JsonValue>, author: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            entity_id: entity_id.to_string(),
            data,
            created_at: now,
            updated_at: now,
            created_by: author.clone(),
            updated_by: author,
        }
    }

    /// Resolve a dotted path (`data.amount`, `createdAt`, ...) to a value.
    pub fn lookup(&self, path: &str) -> Option<JsonValue> {
        if let Some(rest) = path.strip_prefix("data.") {
            let mut segments = rest.split('.');
            let mut current = self.data.get(segments.next()?)?;
            for segment in segments {
                current = current.as_object()?.get(segment)?;
            }
            return Some(current.clone());
        }

        match path {
            "id" => Some(JsonValue::String(self.id.clone())),
            "entityId" => Some(JsonValue::String(self.entity_id.clone())),
            "createdAt" => Some(JsonValue::String(self.created_at.to_rfc3339())),
            "updatedAt" => Some(JsonValue::String(self.updated_at.to_rfc3339())),
            "createdBy" => self.created_by.clone().map(JsonValue::String),
            "updatedBy" => self.updated_by.clone().map(JsonValue::String),
            _ => None,
        }
    }

    /// Remove the value at a `data.` path. Returns true when something was removed.
    pub fn unset(&mut self, path: &str) -> bool {
        let Some(rest) = path.strip_prefix("data.") else {
            return false;
        };
        let segments: Vec<&str> = rest.split('.').collect();
        let Some((last, parents)) = segments.split_last() else {
            return false;
        };

        let mut current = &mut self.data;
        for segment in parents {
            match current.get_mut(*segment).and_then(JsonValue::as_object_mut) {
                Some(next) => current = next,
                None => return false,
            }
        }
        current.remove(*last).is_some()
    }
}

/// Single-path ascending index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub path: String,
}

impl IndexSpec {
    pub fn ascending(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            name: crate::core::index_name(&path),
            path,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Sort key in the `-createdAt` / `data.amount` notation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub path: String,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.strip_prefix('-') {
            Some(path) => Self {
                path: path.to_string(),
                direction: SortDirection::Desc,
            },
            None => Self {
                path: raw.trim_start_matches('+').to_string(),
                direction: SortDirection::Asc,
            },
        }
    }
}

/// Equality filter + sort + window over one collection.
#[derive(Debug, Clone, Default)]
pub struct DocumentQuery {
    pub filter: Vec<(String, JsonValue)>,
    pub sort: Option<SortSpec>,
    pub skip: usize,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct FindResult {
    pub documents: Vec<Document>,
    /// Matches before skip/limit.
    pub total: usize,
}

/// Outcome of one `unset_field_batch` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnsetBatch {
    pub scanned: usize,
    pub modified: usize,
    /// Resume point for the next batch; `None` once the sweep reached the end.
    pub next_cursor: Option<String>,
}

/// Total order over JSON values used for sorting: null < bool < number < string < other.
pub fn compare_json(a: &JsonValue, b: &JsonValue) -> Ordering {
    fn rank(v: &JsonValue) -> u8 {
        match v {
            JsonValue::Null => 0,
            JsonValue::Bool(_) => 1,
            JsonValue::Number(_) => 2,
            JsonValue::String(_) => 3,
            JsonValue::Array(_) => 4,
            JsonValue::Object(_) => 5,
        }
    }

    match (a, b) {
        (JsonValue::Bool(x), JsonValue::Bool(y)) => x.cmp(y),
        (JsonValue::Number(x), JsonValue::Number(y)) => {
            let x = x.as_f64().unwrap_or_default();
            let y = y.as_f64().unwrap_or_default();
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (JsonValue::String(x), JsonValue::String(y)) => x.cmp(y),
        _ => rank(a)
            .cmp(&rank(b))
            .then_with(|| a.to_string().cmp(&b.to_string())),
    }
}

/// Schema-less document storage, one collection per entity.
///
/// Missing collections are reported as `NotFound` by every operation except
/// the collection lifecycle calls. `create_index` on an existing index name
/// fails with `Conflict` and `drop_index` of an unknown name with `NotFound`;
/// callers decide whether those are tolerable.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Returns false when the collection already existed.
    async fn create_collection(&self, name: &str) -> Result<bool>;

    /// Returns false when there was nothing to drop.
    async fn drop_collection(&self, name: &str) -> Result<bool>;

    async fn collection_exists(&self, name: &str) -> Result<bool>;

    /// Move every document and index from `from` to `to`.
    async fn rename_collection(&self, from: &str, to: &str) -> Result<()>;

    async fn list_indexes(&self, collection: &str) -> Result<Vec<IndexSpec>>;

    async fn create_index(&self, collection: &str, spec: IndexSpec) -> Result<()>;

    async fn drop_index(&self, collection: &str, index_name: &str) -> Result<()>;

    async fn insert(&self, collection: &str, document: Document) -> Result<Document>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    async fn update_data(
        &self,
        collection: &str,
        id: &str,
        data: Map<String, JsonValue>,
        updated_by: Option<String>,
    ) -> Result<Option<Document>>;

    async fn delete(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    async fn find(&self, collection: &str, query: &DocumentQuery) -> Result<FindResult>;

    async fn count(&self, collection: &str) -> Result<usize>;

    /// Unset `path` on up to `limit` documents whose id sorts after `after`.
    async fn unset_field_batch(
        &self,
        collection: &str,
        path: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<UnsetBatch>;
}
