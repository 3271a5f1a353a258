//! Error types for the idempotency engine.
//!
//! Two layers:
//! - [`StoreError`] is what a [`PersistenceStore`](crate::store::PersistenceStore)
//!   reports. `ItemAlreadyExists` is an ordinary value here, consumed by the
//!   orchestrator and never surfaced to callers.
//! - [`IdempotencyError`] is what callers of the orchestrator see.
//!
//! Errors produced by the wrapped work itself never pass through either type.

use std::fmt;

use thiserror::Error;

/// Result type for orchestrator-level operations.
pub type Result<T> = std::result::Result<T, IdempotencyError>;

/// Result type for persistence store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Failures reported to the caller of the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdempotencyError {
    /// The fingerprint could not be derived from the payload.
    #[error("idempotency key could not be derived: {reason}")]
    Key { reason: String },

    /// A live duplicate is currently executing.
    #[error("execution already in progress for idempotency key '{key}'")]
    AlreadyInProgress { key: String },

    /// Same fingerprint, different payload content.
    #[error("payload does not match the stored record for idempotency key '{key}'")]
    Validation { key: String },

    /// The backing store is unreachable or returned an unexpected error.
    #[error("persistence layer failed during {operation}: {reason}")]
    PersistenceLayer { operation: String, reason: String },

    /// The store moved to a state the protocol cannot reconcile.
    #[error("inconsistent idempotency state for key '{key}': {reason}")]
    InconsistentState { key: String, reason: String },

    /// Invalid configuration or path expression.
    #[error("invalid idempotency configuration: {reason}")]
    Configuration { reason: String },

    /// The serialized result exceeds the configured bound.
    #[error("response for idempotency key '{key}' is {size} bytes, limit is {limit}")]
    ResponseTooLarge {
        key: String,
        size: usize,
        limit: usize,
    },

    /// A result could not be serialized, or a cached one could not be read back.
    #[error("response serialization failed: {reason}")]
    Serialization { reason: String },
}

impl IdempotencyError {
    /// Create a key derivation error.
    pub fn key(reason: impl Into<String>) -> Self {
        Self::Key {
            reason: reason.into(),
        }
    }

    /// Create an already-in-progress error.
    pub fn already_in_progress(key: impl Into<String>) -> Self {
        Self::AlreadyInProgress { key: key.into() }
    }

    /// Create a payload validation error.
    pub fn validation(key: impl Into<String>) -> Self {
        Self::Validation { key: key.into() }
    }

    /// Create a persistence layer error.
    pub fn persistence_layer(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PersistenceLayer {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create an inconsistent state error.
    pub fn inconsistent_state(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InconsistentState {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a serialization error.
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }

    /// Whether retrying the whole invocation later can succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AlreadyInProgress { .. } | Self::PersistenceLayer { .. }
        )
    }
}

/// Failures reported by a persistence store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A live record already occupies the key.
    #[error("idempotency record already exists for key '{key}'")]
    ItemAlreadyExists { key: String },

    /// A conditional write found the record in an unexpected state.
    #[error("inconsistent record state for key '{key}': {reason}")]
    InconsistentState { key: String, reason: String },

    /// The backend failed.
    #[error("store operation '{operation}' failed: {reason}")]
    Backend { operation: String, reason: String },
}

impl StoreError {
    /// Create an item-already-exists error.
    pub fn item_already_exists(key: impl Into<String>) -> Self {
        Self::ItemAlreadyExists { key: key.into() }
    }

    /// Create an inconsistent state error.
    pub fn inconsistent_state(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InconsistentState {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a backend error.
    pub fn backend(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Backend {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}

impl From<StoreError> for IdempotencyError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InconsistentState { key, reason } => Self::InconsistentState { key, reason },
            StoreError::Backend { operation, reason } => Self::PersistenceLayer { operation, reason },
            // Only reachable if a caller bypasses the orchestrator's collision handling.
            StoreError::ItemAlreadyExists { key } => Self::InconsistentState {
                key,
                reason: "unexpected collision outside the acquisition protocol".to_string(),
            },
        }
    }
}

/// Wrap a SurrealDB error as a backend failure of `operation`.
pub fn from_surrealdb_error(operation: &str, err: impl fmt::Display) -> StoreError {
    StoreError::backend(operation, err.to_string())
}

/// Classify a SurrealDB error raised by creating the record for `key`.
///
/// Duplicate-record failures become [`StoreError::ItemAlreadyExists`];
/// everything else is a backend failure. Only a create can collide, so other
/// operations go through [`from_surrealdb_error`].
pub fn from_surrealdb_create_error(key: &str, err: impl fmt::Display) -> StoreError {
    let msg = err.to_string();

    if msg.contains("already exists") || msg.contains("duplicate") {
        StoreError::item_already_exists(key)
    } else {
        StoreError::backend("put_in_progress", msg)
    }
}
