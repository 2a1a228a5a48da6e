use thiserror::Error;

/// Failures raised by a [`DocumentStore`](crate::store::DocumentStore) call
/// as a whole. Per-operation rejections inside a bulk write are reported
/// through [`OpOutcome`](crate::store::OpOutcome) instead.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store call timed out after {0} ms")]
    Timeout(u64),

    #[error("stored document could not be decoded: {0}")]
    Codec(String),
}

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("config not found: {0}")]
    ConfigNotFound(String),

    #[error("unknown collection '{namespace}.{collection}': not in the catalog")]
    UnknownCollection {
        namespace: String,
        collection: String,
    },

    #[error("update operator '{0}' is not idempotent; only $set and $unset are allowed")]
    NonIdempotentUpdate(String),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("invalid update: {0}")]
    InvalidUpdate(String),

    #[error("unknown version: {0}")]
    UnknownVersion(String),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MigrateError>;
