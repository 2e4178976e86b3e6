//! Naming rules shared by the metadata side and the storage tier.
//!
//! Entity, field and view names are lowerCamel identifiers. Storage targets
//! are collection names and follow the looser collection rules.

use super::error::{Result, SyncError};
use regex::Regex;

lazy_static::lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^[a-z][a-zA-Z0-9]*$").expect("identifier regex");
    static ref CAMEL_BOUNDARY: Regex = Regex::new(r"([a-z0-9])([A-Z])").expect("camel boundary regex");
}

const MAX_STORAGE_TARGET_LEN: usize = 64;

fn validate_identifier(kind: &str, name: &str) -> Result<()> {
    if IDENTIFIER.is_match(name) {
        return Ok(());
    }
    Err(SyncError::Validation(format!(
        "'{}' is not a valid {} name: must start with a lowercase letter and contain only letters and digits",
        name, kind
    )))
}

pub fn validate_entity_name(name: &str) -> Result<()> {
    validate_identifier("entity", name)
}

pub fn validate_field_name(name: &str) -> Result<()> {
    validate_identifier("field", name)
}

pub fn validate_view_name(name: &str) -> Result<()> {
    validate_identifier("view", name)
}

/// Validate a collection name used as a storage target.
pub fn validate_storage_target(target: &str) -> Result<()> {
    let Some(first) = target.chars().next() else {
        return Err(SyncError::Validation(
            "Storage target cannot be empty".to_string(),
        ));
    };

    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(SyncError::Validation(format!(
            "Storage target '{}' must start with a letter or underscore",
            target
        )));
    }

    if !target.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(SyncError::Validation(format!(
            "Storage target '{}' can only contain letters, numbers, and underscores",
            target
        )));
    }

    if target.len() > MAX_STORAGE_TARGET_LEN {
        return Err(SyncError::Validation(format!(
            "Storage target too long (max {} characters)",
            MAX_STORAGE_TARGET_LEN
        )));
    }

    Ok(())
}

/// Derive the default storage target for an entity: `salesOrder` -> `sales_order`.
pub fn storage_target_for(entity_name: &str) -> String {
    CAMEL_BOUNDARY
        .replace_all(entity_name, "${1}_${2}")
        .to_lowercase()
}

/// Document path under which a field's value lives.
pub fn data_path(field_name: &str) -> String {
    format!("data.{}", field_name)
}

/// Name of the single-field ascending index on `path`.
pub fn index_name(path: &str) -> String {
    format!("{}_1", path)
}
