//! Storage error taxonomy.
//!
//! Every failure of the local durable store maps into [`StorageError`] and is
//! surfaced to the caller immediately; nothing is retried inside the storage
//! layer. A failed write means the user's action was NOT durably captured.

use thiserror::Error;

/// Errors raised by the local durable store and its callers.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The underlying storage engine rejected the operation. Quota
    /// exhaustion and denied/unavailable media land here.
    #[error("storage engine error: {0}")]
    Engine(#[from] duckdb::Error),

    /// The storage medium could not be prepared (data dir creation).
    #[error("storage medium unavailable: {0}")]
    Io(#[from] std::io::Error),

    /// A stored document could not be encoded or decoded.
    #[error("invalid stored document: {0}")]
    Document(#[from] serde_json::Error),

    /// The named collection is not part of the schema.
    #[error("unknown collection '{0}'")]
    UnknownCollection(String),

    /// The named index is not declared on the collection.
    #[error("collection '{collection}' has no index on '{index}'")]
    UnknownIndex { collection: String, index: String },

    /// The document does not carry the collection's key field.
    #[error("document for '{collection}' is missing key field '{field}'")]
    MissingKeyField { collection: String, field: String },

    /// The supplied key does not match the collection's key type.
    #[error("invalid key for collection '{0}'")]
    InvalidKey(String),

    /// `add` was called on a collection without an auto-increment key.
    #[error("collection '{0}' is not auto-keyed")]
    NotAutoKeyed(String),
}

/// Convenience alias for storage-layer results.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
