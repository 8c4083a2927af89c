//! Common error types for Groundwork

use thiserror::Error;

/// Common result type for Groundwork operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds shared by the dispatch engine and the CSV importer.
///
/// Both engines fail fast: the first error aborts the current document or
/// file and is returned to the caller unchanged.
#[derive(Error, Debug)]
pub enum Error {
    /// Entity type, record, or request identifier absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Update target did not resolve to exactly one record
    #[error("Ambiguous record: {0}")]
    AmbiguousRecord(String),

    /// Submitted fields failed entity-level validation
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Referenced field is not a declared field or association
    #[error("Invalid field: {0}")]
    InvalidField(String),

    /// Operation not supported by the entity type (e.g. soft delete without archive field)
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Storage failure (wraps sqlx::Error)
    #[error("Persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    /// Malformed CSV input
    #[error("Format error: {0}")]
    Format(String),

    /// Accessor or property lookup failed for a registered type
    #[error("Introspection error: {0}")]
    Introspection(String),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON decoding error (wraps serde_json::Error)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed request document or parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
