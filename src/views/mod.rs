//! Views and the single-default-per-group rule.

pub mod coordinator;
pub mod store;

pub use coordinator::{CreateViewDto, DefaultViewCoordinator, UpdateViewDto};
pub use store::{InMemoryViewStore, ViewGroup, ViewGroupKey, ViewStore};
