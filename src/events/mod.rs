//! Metadata events and the transport they travel on.

pub mod bus;
pub mod memory;
pub mod payload;
pub mod publisher;
pub mod topic;

pub use bus::{BusMessage, EventBus, PartitionStream};
pub use memory::InMemoryEventBus;
pub use payload::{
    EntityDeletedPayload, EntityEventPayload, EntityMigratedPayload, FieldDeletedPayload,
    FieldEventPayload, MetadataEvent,
};
pub use publisher::EventPublisher;
pub use topic::Topic;
