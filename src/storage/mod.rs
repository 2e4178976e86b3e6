pub mod collection;
pub mod engine;
pub mod memory;

pub use collection::Collection;
pub use engine::{
    Document, DocumentQuery, DocumentStore, FindResult, IndexSpec, META_KEYS, SortDirection,
    SortSpec, UnsetBatch,
};
pub use memory::InMemoryDocumentStore;
