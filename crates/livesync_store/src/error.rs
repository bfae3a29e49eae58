//! Error types for record store operations.

use thiserror::Error;

/// Result type for record store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in record store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Record not found.
    #[error("record not found: {name} in {collection}")]
    NotFound {
        /// The collection searched.
        collection: String,
        /// The record identity that was not found.
        name: String,
    },

    /// Collection has no schema registered.
    #[error("unknown collection: {0}")]
    UnknownCollection(String),

    /// A record with the same identity already exists.
    #[error("duplicate record: {name} in {collection}")]
    Duplicate {
        /// The collection written to.
        collection: String,
        /// The conflicting identity.
        name: String,
    },

    /// The collection's own business rules rejected the write.
    #[error("validation failed for {collection}: {message}")]
    Validation {
        /// The collection written to.
        collection: String,
        /// Description of the rejected rule.
        message: String,
    },

    /// A low-level write was missing required system fields.
    #[error("missing system field {field} on {collection}")]
    MissingSystemField {
        /// The collection written to.
        collection: String,
        /// The missing field.
        field: &'static str,
    },

    /// The store is unavailable or timed out.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Operation not permitted in the record's current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl StoreError {
    /// Creates a not-found error.
    pub fn not_found(collection: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            collection: collection.into(),
            name: name.into(),
        }
    }

    /// Creates a validation error.
    pub fn validation(collection: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            collection: collection.into(),
            message: message.into(),
        }
    }

    /// Returns true if this is a business-rule rejection.
    pub fn is_validation(&self) -> bool {
        matches!(self, StoreError::Validation { .. })
    }

    /// Returns true if the record did not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}
