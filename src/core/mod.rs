pub mod error;
pub mod naming;
pub mod types;

pub use error::{Result, SyncError};
pub use naming::{
    data_path, index_name, storage_target_for, validate_entity_name, validate_field_name,
    validate_storage_target, validate_view_name,
};
pub use types::{
    EntityDescriptor, FieldDescriptor, FieldType, ViewDescriptor, ViewType,
};
