use thiserror::Error;

/// Shared error taxonomy for every pipeline stage.
///
/// Stage crates return this type directly so that retry decisions and the
/// orchestrator's failure classification only ever look at one enum.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum QuarryError {
    /// Unknown backend id or invalid option value. Fatal before any stage runs.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network, timeout or rate-limit failure that is worth retrying.
    #[error("Transient backend error: {0}")]
    TransientBackend(String),

    /// Backend rejected the request or answered with something unusable.
    #[error("Backend error: {0}")]
    Backend(String),

    /// A single item is malformed. Excluded rather than aborting the run.
    #[error("Data integrity error for {id}: {reason}")]
    DataIntegrity { id: String, reason: String },

    #[error("Run cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl QuarryError {
    /// Whether a retry with backoff may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, QuarryError::TransientBackend(_))
    }

    pub fn integrity(id: impl Into<String>, reason: impl Into<String>) -> Self {
        QuarryError::DataIntegrity {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

impl From<toml::de::Error> for QuarryError {
    fn from(err: toml::de::Error) -> Self {
        QuarryError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for QuarryError {
    fn from(err: toml::ser::Error) -> Self {
        QuarryError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for QuarryError {
    fn from(err: serde_json::Error) -> Self {
        QuarryError::Serialization(err.to_string())
    }
}

/// An error attributed to the item that was in progress when it happened.
#[derive(Debug, Error)]
#[error("item {item_id}: {source}")]
pub struct ItemFailure {
    pub item_id: String,
    #[source]
    pub source: QuarryError,
}

impl ItemFailure {
    pub fn new(item_id: impl Into<String>, source: QuarryError) -> Self {
        Self {
            item_id: item_id.into(),
            source,
        }
    }
}

/// A specialized `Result` type for pipeline operations.
pub type Result<T> = std::result::Result<T, QuarryError>;
