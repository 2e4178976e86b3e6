//! The authoritative metadata side: entity and field records plus the
//! service that publishes their changes.

pub mod service;
pub mod store;

pub use service::{CreateEntityDto, CreateFieldDto, MetadataService, UpdateEntityDto, UpdateFieldDto};
pub use store::{InMemoryMetadataStore, MetadataStore};
