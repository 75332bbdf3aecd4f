//! Error types for dl-tracker
//!
//! Toyota Way: Clear error messages with actionable guidance (Respect for People)

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// dl-tracker error types
#[derive(Error, Debug)]
pub enum Error {
    /// Document or blob id already present (duplicate key)
    #[error("Duplicate id '{id}' in '{collection}'")]
    DuplicateId {
        /// Collection or bucket name
        collection: String,
        /// Offending id
        id: String,
    },

    /// Requested document or blob does not exist
    #[error("Not found: '{id}' in '{collection}'")]
    NotFound {
        /// Collection or bucket name
        collection: String,
        /// Requested id
        id: String,
    },

    /// Id cannot be used as a storage key
    #[error("Invalid id '{0}': ids must be non-empty and must not contain path separators")]
    InvalidId(String),

    /// Stored blob is structurally inconsistent (missing or short chunks)
    #[error("Corrupt blob '{id}': {reason}")]
    CorruptBlob {
        /// Blob id
        id: String,
        /// What was wrong
        reason: String,
    },

    /// The logger received an update before its experiment record was created
    #[error("Experiment record not created yet (on_init_start was never called)")]
    ExperimentNotStarted,

    /// Connection string or option is unusable
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage backend error
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Checkpoint payload could not be applied to the model
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Dataset does not fit the model (feature width, label range)
    #[error("Dataset error: {0}")]
    Data(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MongoDB driver error
    #[cfg(feature = "mongodb")]
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}
