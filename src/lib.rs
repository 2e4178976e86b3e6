// ============================================================================
// entity-sync library
// ============================================================================
//
// Keeps an in-memory registry of dynamic entities (entity name -> storage
// handle + index set) eventually consistent with the metadata store by
// consuming metadata events, and enforces the single-default-view rule.

pub mod config;
pub mod core;
pub mod data;
pub mod events;
pub mod metadata;
pub mod registry;
pub mod storage;
pub mod sync;
pub mod views;

// Re-export main types for convenience
pub use config::{PurgePolicy, RenamePolicy, RetryPolicy, SyncConfig};
pub use core::{
    EntityDescriptor, FieldDescriptor, FieldType, Result, SyncError, ViewDescriptor, ViewType,
};
pub use data::{DynamicDataService, PaginatedResponse, QueryParams};
pub use events::{EventBus, EventPublisher, InMemoryEventBus, MetadataEvent, Topic};
pub use metadata::{InMemoryMetadataStore, MetadataService, MetadataStore};
pub use registry::{ApplyOutcome, EntityRegistry, IndexManager, StorageHandle};
pub use storage::{Document, DocumentStore, InMemoryDocumentStore};
pub use sync::{
    BusDeadLetterSink, ConsumerHandle, DeadLetter, DeadLetterSink, InMemoryDeadLetterSink,
    ProcessOutcome, SyncConsumer, SyncHandler,
};
pub use views::{DefaultViewCoordinator, InMemoryViewStore, ViewStore};
