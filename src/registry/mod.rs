//! Entity name to storage handle mapping and its index lifecycle.

pub mod entity_registry;
pub mod entry;
pub mod handle;
pub mod index;
pub mod purge;

pub use entity_registry::EntityRegistry;
pub use entry::{ApplyOutcome, FieldState, RegistryEntry};
pub use handle::StorageHandle;
pub use index::IndexManager;
pub use purge::{PurgeReport, PurgeTicket, PurgeWorker};
