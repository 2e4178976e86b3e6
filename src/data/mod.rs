//! Data-tier access to entity records.

pub mod query;
pub mod service;

pub use query::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, PaginatedResponse, QueryParams};
pub use service::DynamicDataService;
