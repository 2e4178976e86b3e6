use super::engine::{Document, DocumentQuery, FindResult, IndexSpec, SortDirection, UnsetBatch, compare_json};
use crate::core::{Result, SyncError};
use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Value index: canonical JSON text of the value -> ids of documents holding it.
type ValueIndex = BTreeMap<String, BTreeSet<String>>;

#[derive(Debug, Clone)]
struct Index {
    spec: IndexSpec,
    entries: ValueIndex,
}

/// One schema-less collection: documents ordered by id plus single-path indexes.
#[derive(Debug, Clone)]
pub struct Collection {
    name: String,
    documents: BTreeMap<String, Document>,
    indexes: HashMap<String, Index>,
}

impl Collection {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            documents: BTreeMap::new(),
            indexes: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rename(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn index_specs(&self) -> Vec<IndexSpec> {
        let mut specs: Vec<IndexSpec> = self.indexes.values().map(|i| i.spec.clone()).collect();
        specs.sort();
        specs
    }

    pub fn create_index(&mut self, spec: IndexSpec) -> Result<()> {
        if self.indexes.contains_key(&spec.name) {
            return Err(SyncError::Conflict(format!(
                "Index '{}' already exists on '{}'",
                spec.name, self.name
            )));
        }

        let mut entries = ValueIndex::new();
        for (id, doc) in &self.documents {
            if let Some(value) = doc.lookup(&spec.path) {
                entries.entry(value.to_string()).or_default().insert(id.clone());
            }
        }

        self.indexes.insert(spec.name.clone(), Index { spec, entries });
        Ok(())
    }

    pub fn drop_index(&mut self, index_name: &str) -> Result<()> {
        self.indexes
            .remove(index_name)
            .map(|_| ())
            .ok_or_else(|| {
                SyncError::NotFound(format!("Index '{}' on '{}'", index_name, self.name))
            })
    }

    pub fn insert(&mut self, document: Document) -> Result<Document> {
        if self.documents.contains_key(&document.id) {
            return Err(SyncError::Conflict(format!(
                "Document '{}' already exists in '{}'",
                document.id, self.name
            )));
        }
        self.add_to_indexes(&document);
        self.documents.insert(document.id.clone(), document.clone());
        Ok(document)
    }

    pub fn get(&self, id: &str) -> Option<&Document> {
        self.documents.get(id)
    }

    pub fn update_data(
        &mut self,
        id: &str,
        data: Map<String, JsonValue>,
        updated_by: Option<String>,
    ) -> Option<Document> {
        let old = self.documents.get(id)?.clone();
        self.remove_from_indexes(&old);

        let mut updated = old;
        updated.data = data;
        updated.updated_at = chrono::Utc::now();
        if updated_by.is_some() {
            updated.updated_by = updated_by;
        }

        self.add_to_indexes(&updated);
        self.documents.insert(id.to_string(), updated.clone());
        Some(updated)
    }

    pub fn delete(&mut self, id: &str) -> Option<Document> {
        let removed = self.documents.remove(id)?;
        self.remove_from_indexes(&removed);
        Some(removed)
    }

    pub fn find(&self, query: &DocumentQuery) -> FindResult {
        let mut matches: Vec<&Document> = match self.candidates_from_index(query) {
            Some(ids) => ids.iter().filter_map(|id| self.documents.get(id)).collect(),
            None => self.documents.values().collect(),
        };
        matches.retain(|doc| {
            query
                .filter
                .iter()
                .all(|(path, expected)| doc.lookup(path).as_ref() == Some(expected))
        });

        if let Some(sort) = &query.sort {
            matches.sort_by(|a, b| {
                let left = a.lookup(&sort.path).unwrap_or(JsonValue::Null);
                let right = b.lookup(&sort.path).unwrap_or(JsonValue::Null);
                let ord = compare_json(&left, &right);
                match sort.direction {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                }
            });
        }

        let total = matches.len();
        let documents = matches
            .into_iter()
            .skip(query.skip)
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();

        FindResult { documents, total }
    }

    pub fn unset_field_batch(&mut self, path: &str, after: Option<&str>, limit: usize) -> UnsetBatch {
        use std::ops::Bound::{Excluded, Unbounded};

        let lower = match after {
            Some(cursor) => Excluded(cursor.to_string()),
            None => Unbounded,
        };
        let ids: Vec<String> = self
            .documents
            .range((lower, Unbounded))
            .take(limit.max(1))
            .map(|(id, _)| id.clone())
            .collect();

        let mut modified = 0;
        for id in &ids {
            let Some(old) = self.documents.get(id).cloned() else {
                continue;
            };
            if old.lookup(path).is_none() {
                continue;
            }
            self.remove_from_indexes(&old);
            let mut updated = old;
            updated.unset(path);
            self.add_to_indexes(&updated);
            self.documents.insert(id.clone(), updated);
            modified += 1;
        }

        let reached_end = ids.len() < limit.max(1)
            || ids
                .last()
                .map(|last| self.documents.range::<String, _>((Excluded(last.clone()), Unbounded)).next().is_none())
                .unwrap_or(true);

        UnsetBatch {
            scanned: ids.len(),
            modified,
            next_cursor: if reached_end { None } else { ids.last().cloned() },
        }
    }

    fn candidates_from_index(&self, query: &DocumentQuery) -> Option<BTreeSet<String>> {
        query.filter.iter().find_map(|(path, expected)| {
            self.indexes
                .values()
                .find(|index| &index.spec.path == path)
                .map(|index| {
                    index
                        .entries
                        .get(&expected.to_string())
                        .cloned()
                        .unwrap_or_default()
                })
        })
    }

    fn add_to_indexes(&mut self, doc: &Document) {
        for index in self.indexes.values_mut() {
            if let Some(value) = doc.lookup(&index.spec.path) {
                index
                    .entries
                    .entry(value.to_string())
                    .or_default()
                    .insert(doc.id.clone());
            }
        }
    }

    fn remove_from_indexes(&mut self, doc: &Document) {
        for index in self.indexes.values_mut() {
            if let Some(value) = doc.lookup(&index.spec.path) {
                let key = value.to_string();
                if let Some(ids) = index.entries.get_mut(&key) {
                    ids.remove(&doc.id);
                    if ids.is_empty() {
                        index.entries.remove(&key);
                    }
                }
            }
        }
    }
}
