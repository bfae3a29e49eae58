//! Error types for the sync engine.

use livesync_store::StoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Kind of user-supplied function looked up in the hook registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookKind {
    /// `before_sync` / `after_sync` hook.
    Hook,
    /// `sync_name` hook.
    NameHook,
    /// Value transform.
    Transform,
    /// Computed field.
    Compute,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HookKind::Hook => "hook",
            HookKind::NameHook => "name hook",
            HookKind::Transform => "transform",
            HookKind::Compute => "compute",
        })
    }
}

/// Classification written to the `error_type` column of a sync log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorType {
    /// Target business-rule rejection.
    Validation,
    /// Missing or inconsistent data.
    Data,
    /// Failure inside a hook or transform.
    Hook,
    /// Store or infrastructure failure.
    System,
    /// Invalid configuration.
    Configuration,
}

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Configuration failed validation.
    #[error("invalid configuration {name}: {}", issues.join("; "))]
    Configuration {
        /// Configuration name.
        name: String,
        /// Every problem found.
        issues: Vec<String>,
    },

    /// The target collection rejected the write.
    #[error("validation failed for {collection}: {message}")]
    Validation {
        /// Target collection.
        collection: String,
        /// Rejection message.
        message: String,
    },

    /// A value transform failed.
    #[error("transform {name} failed on {field}: {message}")]
    Transform {
        /// Transform name.
        name: String,
        /// Source field path.
        field: String,
        /// Failure message.
        message: String,
    },

    /// A lifecycle hook failed.
    #[error("hook {name} failed: {message}")]
    Hook {
        /// Hook name.
        name: String,
        /// Failure message.
        message: String,
    },

    /// A referenced hook, transform or compute function is not registered.
    #[error("unknown {kind}: {name}")]
    UnknownHook {
        /// What was looked up.
        kind: HookKind,
        /// The unregistered name.
        name: String,
    },

    /// Underlying store error.
    #[error("store error: {0}")]
    Store(#[source] StoreError),

    /// No configuration with this name.
    #[error("sync configuration not found: {0}")]
    ConfigurationNotFound(String),

    /// Configuration is disabled.
    #[error("sync configuration {0} is disabled")]
    Disabled(String),

    /// No job with this id.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// Collection is not a valid sync source for the configuration.
    #[error("collection {collection} cannot be synced by {configuration}")]
    InvalidDirection {
        /// Configuration name.
        configuration: String,
        /// Requested source collection.
        collection: String,
    },

    /// Malformed field path.
    #[error("invalid field path {path:?}: {reason}")]
    Path {
        /// The offending path.
        path: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Background job infrastructure failure.
    #[error("job queue error: {0}")]
    Queue(String),

    /// Encoding or decoding failure.
    #[error("codec error: {0}")]
    Codec(String),
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation {
                collection,
                message,
            } => SyncError::Validation {
                collection,
                message,
            },
            other => SyncError::Store(other),
        }
    }
}

impl SyncError {
    /// Creates a configuration error.
    pub fn configuration(name: impl Into<String>, issues: Vec<String>) -> Self {
        Self::Configuration {
            name: name.into(),
            issues,
        }
    }

    /// Creates a path error.
    pub fn path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Path {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if the error blocks every operation using the
    /// configuration, rather than a single record.
    pub fn is_fatal(&self) -> bool {
        self.error_type() == ErrorType::Configuration
    }

    /// Classifies the error for the sync log.
    pub fn error_type(&self) -> ErrorType {
        match self {
            SyncError::Validation { .. } => ErrorType::Validation,
            SyncError::Transform { .. } | SyncError::Hook { .. } | SyncError::UnknownHook { .. } => {
                ErrorType::Hook
            }
            SyncError::Store(StoreError::NotFound { .. })
            | SyncError::Store(StoreError::Duplicate { .. })
            | SyncError::Store(StoreError::MissingSystemField { .. }) => ErrorType::Data,
            SyncError::Store(_)
            | SyncError::JobNotFound(_)
            | SyncError::Queue(_)
            | SyncError::Codec(_) => ErrorType::System,
            SyncError::Configuration { .. }
            | SyncError::ConfigurationNotFound(_)
            | SyncError::Disabled(_)
            | SyncError::InvalidDirection { .. }
            | SyncError::Path { .. } => ErrorType::Configuration,
        }
    }
}

/// Error returned by user-supplied hooks, transforms and compute functions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct HookError {
    /// Failure message.
    pub message: String,
}

impl HookError {
    /// Creates a hook error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for HookError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for HookError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}
