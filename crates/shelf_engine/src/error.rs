//! Error types for engine operations.

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors reported by an object-store engine.
///
/// These are clonable so an open failure can be replayed to every
/// subscriber of an outcome notifier.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// The named database does not exist.
    #[error("database not found: {name}")]
    DatabaseNotFound {
        /// Name of the database.
        name: String,
    },

    /// The database still has open handles.
    #[error("database in use: {name}")]
    DatabaseInUse {
        /// Name of the database.
        name: String,
    },

    /// A version upgrade is blocked by another open handle.
    #[error("upgrade of {name} blocked by a concurrently open handle")]
    UpgradeBlocked {
        /// Name of the database.
        name: String,
    },

    /// The requested version is lower than the on-disk version.
    #[error("version regression: on-disk version is {on_disk}, requested {requested}")]
    VersionRegression {
        /// Version currently persisted.
        on_disk: u32,
        /// Version the caller asked for.
        requested: u32,
    },

    /// A collection with this name already exists.
    #[error("collection already exists: {name}")]
    CollectionExists {
        /// Name of the collection.
        name: String,
    },

    /// The named collection does not exist.
    #[error("collection not found: {name}")]
    CollectionNotFound {
        /// Name of the collection.
        name: String,
    },

    /// An index with this name already exists on the collection.
    #[error("index already exists: {index} on {collection}")]
    IndexExists {
        /// Collection carrying the index.
        collection: String,
        /// Name of the index.
        index: String,
    },

    /// The named index does not exist on the collection.
    #[error("index not found: {index} on {collection}")]
    IndexNotFound {
        /// Collection searched.
        collection: String,
        /// Name of the index.
        index: String,
    },

    /// A unique index rejected a duplicate value.
    #[error("unique index violation: {index} on {collection}")]
    UniqueViolation {
        /// Collection carrying the index.
        collection: String,
        /// Name of the index.
        index: String,
    },

    /// A value cannot be used as a key.
    #[error("value not usable as a key: {message}")]
    InvalidKey {
        /// Why the value was rejected.
        message: String,
    },

    /// A record carries no value at the collection's key path.
    #[error("record has no value at key path {path}")]
    MissingKey {
        /// The collection's key path.
        path: String,
    },

    /// A write was attempted in a read-only transaction.
    #[error("write attempted in a read-only transaction")]
    ReadOnlyTransaction,

    /// A collection was accessed outside the transaction's declared scope.
    #[error("collection {name} is outside this transaction's scope")]
    OutOfScope {
        /// Name of the collection.
        name: String,
    },

    /// An internal engine failure.
    #[error("engine error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

impl EngineError {
    /// Creates a database-not-found error.
    pub fn database_not_found(name: impl Into<String>) -> Self {
        Self::DatabaseNotFound { name: name.into() }
    }

    /// Creates a collection-not-found error.
    pub fn collection_not_found(name: impl Into<String>) -> Self {
        Self::CollectionNotFound { name: name.into() }
    }

    /// Creates a collection-exists error.
    pub fn collection_exists(name: impl Into<String>) -> Self {
        Self::CollectionExists { name: name.into() }
    }

    /// Creates an index-exists error.
    pub fn index_exists(collection: impl Into<String>, index: impl Into<String>) -> Self {
        Self::IndexExists {
            collection: collection.into(),
            index: index.into(),
        }
    }

    /// Creates an index-not-found error.
    pub fn index_not_found(collection: impl Into<String>, index: impl Into<String>) -> Self {
        Self::IndexNotFound {
            collection: collection.into(),
            index: index.into(),
        }
    }

    /// Creates an invalid-key error.
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Creates an out-of-scope error.
    pub fn out_of_scope(name: impl Into<String>) -> Self {
        Self::OutOfScope { name: name.into() }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// True when this error reports an upgrade blocked by another handle.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::UpgradeBlocked { .. })
    }
}
