//! Error types for ShelfDB core.

use shelf_engine::EngineError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in ShelfDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Underlying engine error.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// `open` was called with an empty version-delta list.
    #[error("at least one version delta is required")]
    NoVersions,

    /// A version-delta callback failed.
    #[error("migration to version {version} failed: {message}")]
    MigrationFailed {
        /// Version whose delta failed.
        version: u32,
        /// Description of the failure.
        message: String,
    },

    /// A field names neither the primary key nor an index of a collection.
    #[error("unknown field {field} on collection {collection}")]
    UnknownField {
        /// Collection searched.
        collection: String,
        /// Field that could not be resolved.
        field: String,
    },

    /// A prefix scan's last character is already the maximum code point,
    /// so no exclusive upper bound exists.
    #[error("prefix {prefix:?} has no successor; cannot derive an upper bound")]
    PrefixOverflow {
        /// The offending prefix.
        prefix: String,
    },

    /// The connection has been closed.
    #[error("connection is closed")]
    ConnectionClosed,

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a migration-failed error.
    pub fn migration_failed(version: u32, message: impl Into<String>) -> Self {
        Self::MigrationFailed {
            version,
            message: message.into(),
        }
    }

    /// Creates an unknown-field error.
    pub fn unknown_field(collection: impl Into<String>, field: impl Into<String>) -> Self {
        Self::UnknownField {
            collection: collection.into(),
            field: field.into(),
        }
    }

    /// Creates an invalid-operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}

/// Terminal failure of an open attempt, delivered through the outcome
/// notifier.
///
/// Blocked is deliberately a distinct case: the caller must coordinate
/// with the conflicting session, and nothing here retries on its behalf.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OpenError {
    /// The engine failed to open the database.
    #[error("open failed: {0}")]
    Engine(EngineError),

    /// Another session holds an incompatible open handle.
    #[error("open blocked: {0}")]
    Blocked(EngineError),

    /// A version-delta callback failed during upgrade.
    #[error("migration to version {version} failed: {message}")]
    Migration {
        /// Version whose delta failed.
        version: u32,
        /// Description of the failure.
        message: String,
    },
}

impl OpenError {
    /// Wraps an engine error, routing blocked conditions to their own case.
    #[must_use]
    pub fn from_engine(error: EngineError) -> Self {
        if error.is_blocked() {
            Self::Blocked(error)
        } else {
            Self::Engine(error)
        }
    }

    /// True when the open attempt was blocked by another session.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked(_))
    }
}
