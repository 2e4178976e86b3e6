use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Stale version for '{key}' (expected {expected}, actual {actual})")]
    StaleVersion {
        key: String,
        expected: u64,
        actual: u64,
    },

    #[error("Storage unavailable: {0}")]
    TransientStore(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Shutting down: {0}")]
    Shutdown(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// Whether repeating the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientStore(_) | Self::Lock(_) | Self::StaleVersion { .. }
        )
    }

    /// Status code the HTTP layer reports for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Validation(_) => 400,
            Self::Conflict(_) | Self::StaleVersion { .. } => 409,
            Self::TransientStore(_) | Self::Shutdown(_) => 503,
            Self::Lock(_) => 500,
        }
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for SyncError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Lock(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(err.to_string())
    }
}
