//! Engine capability traits.

use crate::error::EngineResult;
use crate::key::{Key, KeyRange};
use crate::types::{IndexSpec, KeyOptions, TransactionMode};
use crate::EngineError;
use serde_json::Value;

/// A versioned, transactional object-store engine.
///
/// Engines are **opaque record stores with schema metadata**. They own
/// durability, transaction atomicity, cursors and key ranges; the layer
/// above owns migrations, reflection and query composition. Implementors
/// must be `Send + Sync`; one engine serves many named databases.
///
/// # Invariants
///
/// - Opening at a version above the persisted one surfaces either an
///   upgrade scope ([`OpenOutcome::UpgradeNeeded`]) or, for obsolete
///   engine generations, a stale handle whose
///   [`DatabaseHandle::set_version`] probe answers.
/// - A pending upgrade conflicting with another open handle is reported
///   as [`OpenOutcome::Blocked`], never silently retried or queued.
/// - Opening below the persisted version fails.
pub trait Engine: Send + Sync {
    /// Opens (or creates) the named database at the requested version.
    fn open(&self, name: &str, requested_version: u32) -> OpenOutcome;

    /// Deletes the named database. Fails while handles remain open.
    fn delete_database(&self, name: &str) -> EngineResult<()>;
}

/// Terminal result of asking an engine to open a database.
pub enum OpenOutcome {
    /// Opened directly at the requested version; no schema work needed.
    Open(Box<dyn DatabaseHandle>),
    /// The engine detected a version bump and handed out an upgrade scope.
    UpgradeNeeded {
        /// Version persisted before this open.
        old_version: u32,
        /// Version being upgraded to.
        new_version: u32,
        /// Handle to the database, already usable for data transactions.
        db: Box<dyn DatabaseHandle>,
        /// Schema-mutation scope for the upgrade.
        scope: Box<dyn UpgradeScope>,
    },
    /// Another session holds an incompatible open handle.
    Blocked(EngineError),
    /// The open attempt failed.
    Failed(EngineError),
}

/// An open handle to one versioned database.
///
/// Exactly one connection owns a handle at a time; all collections
/// reflected from the database share it and it is closed once, not per
/// collection.
pub trait DatabaseHandle: Send + Sync {
    /// Name of the database.
    fn name(&self) -> String;

    /// Version currently persisted.
    fn version(&self) -> u32;

    /// Names of all existing collections.
    fn collection_names(&self) -> Vec<String>;

    /// Starts a transaction scoped to the given collections.
    ///
    /// # Errors
    ///
    /// Returns an error if any named collection does not exist.
    fn transaction(
        &self,
        collections: &[&str],
        mode: TransactionMode,
    ) -> EngineResult<Box<dyn EngineTransaction>>;

    /// Legacy capability probe.
    ///
    /// Obsolete engine generations cannot report upgrades at open time;
    /// they instead expose an explicit version-set primitive on the stale
    /// handle. Modern engines answer `None`.
    fn set_version(&self, version: u32) -> Option<EngineResult<UpgradeHandoff>> {
        let _ = version;
        None
    }

    /// Closes the handle, releasing its claim on the database.
    fn close(&self);
}

/// Old/new version markers plus the upgrade scope, as synthesized by a
/// legacy engine's version-set primitive.
pub struct UpgradeHandoff {
    /// Version persisted before the version-set call.
    pub old_version: u32,
    /// Version being upgraded to.
    pub new_version: u32,
    /// Schema-mutation scope for the upgrade.
    pub scope: Box<dyn UpgradeScope>,
}

/// Schema-mutation scope, valid only while a version upgrade is running.
///
/// All mutations performed through one scope belong to one atomic upgrade:
/// either the whole scope commits or none of it is visible afterwards.
pub trait UpgradeScope {
    /// Creates a collection. Fails if the name is taken.
    fn create_collection(&mut self, name: &str, options: &KeyOptions) -> EngineResult<()>;

    /// Deletes a collection. Fails if it does not exist.
    fn delete_collection(&mut self, name: &str) -> EngineResult<()>;

    /// Adds an index to a collection. Fails if the index already exists.
    fn create_index(&mut self, collection: &str, spec: &IndexSpec) -> EngineResult<()>;

    /// Names of collections as currently visible inside the upgrade.
    fn collection_names(&self) -> Vec<String>;

    /// Commits the upgrade, persisting the new version and schema.
    fn commit(self: Box<Self>) -> EngineResult<()>;

    /// Abandons the upgrade, restoring the pre-upgrade schema and version.
    fn abort(self: Box<Self>);
}

/// One engine transaction over a declared set of collections.
///
/// Committing fires strictly after every sub-operation issued through the
/// transaction has completed; a failed commit leaves none of the staged
/// writes visible.
pub trait EngineTransaction {
    /// Resolves a collection reference within the transaction's scope.
    fn collection(&self, name: &str) -> EngineResult<Box<dyn CollectionRef + '_>>;

    /// Commits the transaction.
    fn commit(self: Box<Self>) -> EngineResult<()>;
}

/// A collection as seen from inside a transaction.
pub trait CollectionRef {
    /// Name of the collection.
    fn name(&self) -> &str;

    /// The collection's key path, if records carry their own keys.
    fn key_path(&self) -> Option<String>;

    /// Names of the collection's indexes.
    fn index_names(&self) -> Vec<String>;

    /// Reads the record stored under a key.
    fn get(&self, key: &Key) -> EngineResult<Option<Value>>;

    /// Upserts a record, returning the key it landed under.
    fn put(&self, record: Value) -> EngineResult<Key>;

    /// Deletes the record under a key. Absent keys are a no-op.
    fn delete(&self, key: &Key) -> EngineResult<()>;

    /// Counts records, optionally bounded by a key range.
    fn count(&self, range: Option<&KeyRange>) -> EngineResult<u64>;

    /// Opens an ordered cursor over the collection's records.
    fn open_cursor(&self, range: Option<&KeyRange>) -> EngineResult<Cursor>;

    /// Resolves one of the collection's indexes.
    fn index(&self, name: &str) -> EngineResult<Box<dyn IndexRef + '_>>;
}

/// A secondary index as seen from inside a transaction.
pub trait IndexRef {
    /// Name of the index.
    fn name(&self) -> &str;

    /// Opens a cursor over records in indexed-value order, ties broken by
    /// primary key.
    fn open_cursor(&self, range: Option<&KeyRange>) -> EngineResult<Cursor>;

    /// Counts index entries, optionally bounded by a key range.
    fn count(&self, range: Option<&KeyRange>) -> EngineResult<u64>;
}

/// An ordered stream of records produced by a cursor.
///
/// Engines materialize a consistent snapshot at open time, so the cursor
/// owns its data and outlives the reference it was opened from.
pub struct Cursor(Box<dyn Iterator<Item = Value>>);

impl Cursor {
    /// Wraps an iterator of records.
    pub fn new(records: impl Iterator<Item = Value> + 'static) -> Self {
        Self(Box::new(records))
    }
}

impl Iterator for Cursor {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        self.0.next()
    }
}
