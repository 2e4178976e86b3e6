use super::error::SyncError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Data type of an entity field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Number,
    Date,
    Datetime,
    Boolean,
    Select,
    Multiselect,
    Lookup,
    Phone,
    Email,
    Url,
    File,
    Image,
    Longtext,
    Money,
    Percent,
    Json,
}

impl FieldType {
    pub const ALL: [FieldType; 17] = [
        FieldType::Text,
        FieldType::Number,
        FieldType::Date,
        FieldType::Datetime,
        FieldType::Boolean,
        FieldType::Select,
        FieldType::Multiselect,
        FieldType::Lookup,
        FieldType::Phone,
        FieldType::Email,
        FieldType::Url,
        FieldType::File,
        FieldType::Image,
        FieldType::Longtext,
        FieldType::Money,
        FieldType::Percent,
        FieldType::Json,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Number => "number",
            FieldType::Date => "date",
            FieldType::Datetime => "datetime",
            FieldType::Boolean => "boolean",
            FieldType::Select => "select",
            FieldType::Multiselect => "multiselect",
            FieldType::Lookup => "lookup",
            FieldType::Phone => "phone",
            FieldType::Email => "email",
            FieldType::Url => "url",
            FieldType::File => "file",
            FieldType::Image => "image",
            FieldType::Longtext => "longtext",
            FieldType::Money => "money",
            FieldType::Percent => "percent",
            FieldType::Json => "json",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldType::ALL
            .iter()
            .copied()
            .find(|ty| ty.as_str() == s)
            .ok_or_else(|| SyncError::Validation(format!("Unknown field type '{}'", s)))
    }
}

/// Kind of presentation a view describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewType {
    List,
    Detail,
    Form,
    Dashboard,
    Calendar,
    Kanban,
}

impl ViewType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViewType::List => "list",
            ViewType::Detail => "detail",
            ViewType::Form => "form",
            ViewType::Dashboard => "dashboard",
            ViewType::Calendar => "calendar",
            ViewType::Kanban => "kanban",
        }
    }
}

impl fmt::Display for ViewType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ViewType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "list" => Ok(ViewType::List),
            "detail" => Ok(ViewType::Detail),
            "form" => Ok(ViewType::Form),
            "dashboard" => Ok(ViewType::Dashboard),
            "calendar" => Ok(ViewType::Calendar),
            "kanban" => Ok(ViewType::Kanban),
            other => Err(SyncError::Validation(format!("Unknown view type '{}'", other))),
        }
    }
}

/// Entity record as held by the metadata store.
///
/// `storage_target` is the collection backing the entity's records. It is
/// serialized as `tableName` to match the event payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDescriptor {
    pub id: String,
    pub name: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "tableName")]
    pub storage_target: String,
    pub is_system: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Field record; identity is `(entity_name, name)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    pub id: String,
    pub entity_id: String,
    pub entity_name: String,
    pub name: String,
    pub display_name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub is_required: bool,
    pub is_system: bool,
    pub order: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// View record. At most one active view per `(entity_name, view_type)` is default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewDescriptor {
    pub id: String,
    pub entity_name: String,
    pub name: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub view_type: ViewType,
    pub is_default: bool,
    pub is_system: bool,
    pub is_active: bool,
    #[serde(default)]
    pub config: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Insertion order, breaks ties between views created in the same instant.
    pub created_seq: u64,
}
