//! List parameters for record queries.

use crate::core::{Result, SyncError, data_path};
use crate::storage::{DocumentQuery, META_KEYS, SortSpec};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 1000;
const DEFAULT_SORT: &str = "-createdAt";

/// Raw list parameters as they arrive from a request's query string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParams {
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
    /// `-createdAt`, `amount`, `data.amount`, ...
    #[serde(default)]
    pub sort: Option<String>,
    /// JSON object of equality filters.
    #[serde(default)]
    pub filter: Option<String>,
    /// Comma separated `data` keys to keep in the response.
    #[serde(default)]
    pub fields: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    pub pages: usize,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, total: usize, page: usize, limit: usize) -> Self {
        Self {
            data,
            total,
            page,
            limit,
            pages: total.div_ceil(limit.max(1)),
        }
    }
}

/// Meta keys address the document itself, everything else lives under `data`.
fn document_path(key: &str) -> String {
    if META_KEYS.contains(&key) || key.starts_with("data.") {
        key.to_string()
    } else {
        data_path(key)
    }
}

impl QueryParams {
    pub fn page(&self) -> usize {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn sort(&self) -> SortSpec {
        let raw = self.sort.as_deref().unwrap_or(DEFAULT_SORT);
        let mut spec = SortSpec::parse(raw);
        spec.path = document_path(&spec.path);
        spec
    }

    pub fn filter(&self) -> Result<Vec<(String, JsonValue)>> {
        let Some(raw) = self.filter.as_deref().filter(|raw| !raw.trim().is_empty()) else {
            return Ok(Vec::new());
        };

        let parsed: JsonValue = serde_json::from_str(raw)
            .map_err(|err| SyncError::Validation(format!("Invalid filter: {}", err)))?;
        let JsonValue::Object(object) = parsed else {
            return Err(SyncError::Validation(
                "Invalid filter: expected a JSON object".to_string(),
            ));
        };

        Ok(object
            .into_iter()
            .map(|(key, value)| (document_path(&key), value))
            .collect())
    }

    pub fn projection(&self) -> Option<Vec<String>> {
        let fields: Vec<String> = self
            .fields
            .as_deref()?
            .split(',')
            .map(|f| f.trim().trim_start_matches("data.").to_string())
            .filter(|f| !f.is_empty())
            .collect();
        (!fields.is_empty()).then_some(fields)
    }

    pub fn to_document_query(&self) -> Result<DocumentQuery> {
        let limit = self.limit();
        Ok(DocumentQuery {
            filter: self.filter()?,
            sort: Some(self.sort()),
            skip: (self.page() - 1) * limit,
            limit: Some(limit),
        })
    }
}
