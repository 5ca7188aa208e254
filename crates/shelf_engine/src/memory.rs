//! In-memory engine for testing.

use crate::engine::{
    CollectionRef, Cursor, DatabaseHandle, Engine, EngineTransaction, IndexRef, OpenOutcome,
    UpgradeHandoff, UpgradeScope,
};
use crate::error::{EngineError, EngineResult};
use crate::key::{Key, KeyRange};
use crate::types::{IndexSpec, KeyOptions, TransactionMode};
use parking_lot::RwLock;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// An in-memory object-store engine.
///
/// Databases live for the lifetime of the engine value and survive
/// close/reopen cycles, which is what migration tests need. The engine is
/// cheap to clone; clones share the same databases.
///
/// Two generations exist:
/// - [`MemoryEngine::new`] reports upgrades at open time via
///   [`OpenOutcome::UpgradeNeeded`].
/// - [`MemoryEngine::legacy`] never does; it hands out a stale handle whose
///   [`DatabaseHandle::set_version`] probe drives the upgrade instead.
///
/// # Example
///
/// ```rust
/// use shelf_engine::{Engine, MemoryEngine, OpenOutcome};
///
/// let engine = MemoryEngine::new();
/// match engine.open("inventory", 1) {
///     OpenOutcome::UpgradeNeeded { old_version, new_version, .. } => {
///         assert_eq!((old_version, new_version), (0, 1));
///     }
///     _ => panic!("fresh database needs an upgrade"),
/// }
/// ```
#[derive(Clone)]
pub struct MemoryEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    databases: RwLock<HashMap<String, Arc<DbShared>>>,
    legacy: bool,
}

struct DbShared {
    name: String,
    state: RwLock<DbState>,
}

#[derive(Default)]
struct DbState {
    version: u32,
    open_handles: usize,
    collections: BTreeMap<String, CollectionState>,
}

#[derive(Clone)]
struct CollectionState {
    key_path: Option<String>,
    auto_increment: bool,
    next_key: i64,
    indexes: BTreeMap<String, IndexSpec>,
    records: BTreeMap<Key, Value>,
}

impl CollectionState {
    fn new(options: &KeyOptions) -> Self {
        Self {
            key_path: options.key_path().map(str::to_string),
            auto_increment: options.auto_increment(),
            next_key: 1,
            indexes: BTreeMap::new(),
            records: BTreeMap::new(),
        }
    }

    /// `(indexed value, primary key, record)` triples in cursor order.
    fn index_entries(&self, spec: &IndexSpec) -> Vec<(Key, Key, Value)> {
        let mut entries = Vec::new();
        for (pk, record) in &self.records {
            let Some(field_value) = record.get(&spec.field) else {
                continue;
            };
            if spec.multi_entry {
                if let Value::Array(elements) = field_value {
                    for element in elements {
                        if let Ok(entry_key) = Key::from_value(element) {
                            entries.push((entry_key, pk.clone(), record.clone()));
                        }
                    }
                    continue;
                }
            }
            // Records whose field is not keyable are absent from the index.
            if let Ok(entry_key) = Key::from_value(field_value) {
                entries.push((entry_key, pk.clone(), record.clone()));
            }
        }
        entries.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
        entries
    }
}

impl MemoryEngine {
    /// Creates a modern-generation in-memory engine.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EngineInner {
                databases: RwLock::new(HashMap::new()),
                legacy: false,
            }),
        }
    }

    /// Creates an obsolete-generation engine that lacks upgrade detection
    /// at open time and relies on the explicit version-set primitive.
    #[must_use]
    pub fn legacy() -> Self {
        Self {
            inner: Arc::new(EngineInner {
                databases: RwLock::new(HashMap::new()),
                legacy: true,
            }),
        }
    }

    /// Returns the names of all databases the engine currently holds.
    #[must_use]
    pub fn database_names(&self) -> Vec<String> {
        self.inner.databases.read().keys().cloned().collect()
    }

    fn database(&self, name: &str) -> Arc<DbShared> {
        let mut databases = self.inner.databases.write();
        Arc::clone(databases.entry(name.to_string()).or_insert_with(|| {
            Arc::new(DbShared {
                name: name.to_string(),
                state: RwLock::new(DbState::default()),
            })
        }))
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for MemoryEngine {
    fn open(&self, name: &str, requested_version: u32) -> OpenOutcome {
        let shared = self.database(name);
        let mut state = shared.state.write();
        tracing::debug!(
            database = name,
            requested_version,
            on_disk = state.version,
            "opening database"
        );

        if requested_version < state.version {
            return OpenOutcome::Failed(EngineError::VersionRegression {
                on_disk: state.version,
                requested: requested_version,
            });
        }

        if requested_version > state.version && !self.inner.legacy {
            if state.open_handles > 0 {
                return OpenOutcome::Blocked(EngineError::UpgradeBlocked {
                    name: name.to_string(),
                });
            }
            let old_version = state.version;
            let snapshot = state.collections.clone();
            state.open_handles += 1;
            drop(state);
            return OpenOutcome::UpgradeNeeded {
                old_version,
                new_version: requested_version,
                db: Box::new(MemoryHandle::new(Arc::clone(&shared), self.inner.legacy)),
                scope: Box::new(MemoryUpgradeScope {
                    shared: Arc::clone(&shared),
                    snapshot: Some(snapshot),
                    target_version: requested_version,
                    committed: false,
                }),
            };
        }

        // Equal version, or a legacy engine handing out a stale handle for
        // the caller to drive set_version on.
        state.open_handles += 1;
        drop(state);
        OpenOutcome::Open(Box::new(MemoryHandle::new(shared, self.inner.legacy)))
    }

    fn delete_database(&self, name: &str) -> EngineResult<()> {
        let mut databases = self.inner.databases.write();
        let shared = databases
            .get(name)
            .ok_or_else(|| EngineError::database_not_found(name))?;
        if shared.state.read().open_handles > 0 {
            tracing::warn!(database = name, "delete refused, handles still open");
            return Err(EngineError::DatabaseInUse {
                name: name.to_string(),
            });
        }
        databases.remove(name);
        Ok(())
    }
}

struct MemoryHandle {
    shared: Arc<DbShared>,
    legacy: bool,
    released: AtomicBool,
}

impl MemoryHandle {
    fn new(shared: Arc<DbShared>, legacy: bool) -> Self {
        Self {
            shared,
            legacy,
            released: AtomicBool::new(false),
        }
    }
}

impl DatabaseHandle for MemoryHandle {
    fn name(&self) -> String {
        self.shared.name.clone()
    }

    fn version(&self) -> u32 {
        self.shared.state.read().version
    }

    fn collection_names(&self) -> Vec<String> {
        self.shared.state.read().collections.keys().cloned().collect()
    }

    fn transaction(
        &self,
        collections: &[&str],
        mode: TransactionMode,
    ) -> EngineResult<Box<dyn EngineTransaction>> {
        let state = self.shared.state.read();
        for name in collections {
            if !state.collections.contains_key(*name) {
                return Err(EngineError::collection_not_found(*name));
            }
        }
        drop(state);
        Ok(Box::new(MemoryTransaction {
            shared: Arc::clone(&self.shared),
            scope: collections.iter().map(|n| n.to_string()).collect(),
            mode,
            staged: RefCell::new(Vec::new()),
        }))
    }

    fn set_version(&self, version: u32) -> Option<EngineResult<UpgradeHandoff>> {
        if !self.legacy {
            return None;
        }
        let state = self.shared.state.read();
        if version < state.version {
            return Some(Err(EngineError::VersionRegression {
                on_disk: state.version,
                requested: version,
            }));
        }
        if state.open_handles > 1 {
            return Some(Err(EngineError::UpgradeBlocked {
                name: self.shared.name.clone(),
            }));
        }
        Some(Ok(UpgradeHandoff {
            old_version: state.version,
            new_version: version,
            scope: Box::new(MemoryUpgradeScope {
                shared: Arc::clone(&self.shared),
                snapshot: Some(state.collections.clone()),
                target_version: version,
                committed: false,
            }),
        }))
    }

    fn close(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            let mut state = self.shared.state.write();
            state.open_handles = state.open_handles.saturating_sub(1);
        }
    }
}

struct MemoryUpgradeScope {
    shared: Arc<DbShared>,
    snapshot: Option<BTreeMap<String, CollectionState>>,
    target_version: u32,
    committed: bool,
}

impl UpgradeScope for MemoryUpgradeScope {
    fn create_collection(&mut self, name: &str, options: &KeyOptions) -> EngineResult<()> {
        let mut state = self.shared.state.write();
        if state.collections.contains_key(name) {
            return Err(EngineError::collection_exists(name));
        }
        state
            .collections
            .insert(name.to_string(), CollectionState::new(options));
        Ok(())
    }

    fn delete_collection(&mut self, name: &str) -> EngineResult<()> {
        let mut state = self.shared.state.write();
        if state.collections.remove(name).is_none() {
            return Err(EngineError::collection_not_found(name));
        }
        Ok(())
    }

    fn create_index(&mut self, collection: &str, spec: &IndexSpec) -> EngineResult<()> {
        let mut state = self.shared.state.write();
        let cs = state
            .collections
            .get_mut(collection)
            .ok_or_else(|| EngineError::collection_not_found(collection))?;
        if cs.indexes.contains_key(&spec.field) {
            return Err(EngineError::index_exists(collection, &spec.field));
        }
        cs.indexes.insert(spec.field.clone(), spec.clone());
        Ok(())
    }

    fn collection_names(&self) -> Vec<String> {
        self.shared.state.read().collections.keys().cloned().collect()
    }

    fn commit(mut self: Box<Self>) -> EngineResult<()> {
        let mut state = self.shared.state.write();
        state.version = self.target_version;
        drop(state);
        self.committed = true;
        tracing::debug!(
            database = %self.shared.name,
            version = self.target_version,
            "upgrade committed"
        );
        Ok(())
    }

    fn abort(self: Box<Self>) {}
}

impl Drop for MemoryUpgradeScope {
    fn drop(&mut self) {
        // Abandoned upgrades roll the whole schema back; no partial-version
        // state survives.
        if !self.committed {
            if let Some(snapshot) = self.snapshot.take() {
                self.shared.state.write().collections = snapshot;
            }
        }
    }
}

enum StagedOp {
    Put {
        collection: String,
        key: Key,
        record: Value,
    },
    Delete {
        collection: String,
        key: Key,
    },
}

impl StagedOp {
    fn collection(&self) -> &str {
        match self {
            StagedOp::Put { collection, .. } | StagedOp::Delete { collection, .. } => collection,
        }
    }
}

struct MemoryTransaction {
    shared: Arc<DbShared>,
    scope: Vec<String>,
    mode: TransactionMode,
    staged: RefCell<Vec<StagedOp>>,
}

impl EngineTransaction for MemoryTransaction {
    fn collection(&self, name: &str) -> EngineResult<Box<dyn CollectionRef + '_>> {
        if !self.scope.iter().any(|s| s == name) {
            return Err(EngineError::out_of_scope(name));
        }
        if !self.shared.state.read().collections.contains_key(name) {
            return Err(EngineError::collection_not_found(name));
        }
        Ok(Box::new(MemoryCollectionRef {
            txn: self,
            name: name.to_string(),
        }))
    }

    fn commit(self: Box<Self>) -> EngineResult<()> {
        let staged = self.staged.into_inner();
        if staged.is_empty() {
            return Ok(());
        }
        let mut state = self.shared.state.write();

        // Apply to working copies first so a failed batch leaves nothing
        // behind.
        let mut working: BTreeMap<String, CollectionState> = BTreeMap::new();
        for op in &staged {
            let name = op.collection();
            if !working.contains_key(name) {
                let cs = state
                    .collections
                    .get(name)
                    .ok_or_else(|| EngineError::collection_not_found(name))?;
                working.insert(name.to_string(), cs.clone());
            }
        }
        for op in staged {
            match op {
                StagedOp::Put {
                    collection,
                    key,
                    record,
                } => {
                    if let Some(cs) = working.get_mut(&collection) {
                        cs.records.insert(key, record);
                    }
                }
                StagedOp::Delete { collection, key } => {
                    if let Some(cs) = working.get_mut(&collection) {
                        cs.records.remove(&key);
                    }
                }
            }
        }
        for (name, cs) in &working {
            for spec in cs.indexes.values().filter(|s| s.unique) {
                let mut seen = BTreeSet::new();
                for (entry_key, _, _) in cs.index_entries(spec) {
                    if !seen.insert(entry_key) {
                        return Err(EngineError::UniqueViolation {
                            collection: name.clone(),
                            index: spec.field.clone(),
                        });
                    }
                }
            }
        }
        for (name, cs) in working {
            state.collections.insert(name, cs);
        }
        Ok(())
    }
}

struct MemoryCollectionRef<'a> {
    txn: &'a MemoryTransaction,
    name: String,
}

impl MemoryCollectionRef<'_> {
    fn ensure_writable(&self) -> EngineResult<()> {
        if self.txn.mode == TransactionMode::ReadOnly {
            return Err(EngineError::ReadOnlyTransaction);
        }
        Ok(())
    }
}

impl CollectionRef for MemoryCollectionRef<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn key_path(&self) -> Option<String> {
        let state = self.txn.shared.state.read();
        state.collections.get(&self.name).and_then(|cs| cs.key_path.clone())
    }

    fn index_names(&self) -> Vec<String> {
        let state = self.txn.shared.state.read();
        state
            .collections
            .get(&self.name)
            .map(|cs| cs.indexes.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn get(&self, key: &Key) -> EngineResult<Option<Value>> {
        let state = self.txn.shared.state.read();
        let cs = state
            .collections
            .get(&self.name)
            .ok_or_else(|| EngineError::collection_not_found(&self.name))?;
        Ok(cs.records.get(key).cloned())
    }

    fn put(&self, record: Value) -> EngineResult<Key> {
        self.ensure_writable()?;
        let mut record = record;
        let key = {
            let mut state = self.txn.shared.state.write();
            let cs = state
                .collections
                .get_mut(&self.name)
                .ok_or_else(|| EngineError::collection_not_found(&self.name))?;
            match cs.key_path.clone() {
                Some(path) => match record.get(&path) {
                    Some(value) => Key::from_value(value)?,
                    None if cs.auto_increment => {
                        let generated = cs.next_key;
                        cs.next_key += 1;
                        record
                            .as_object_mut()
                            .ok_or_else(|| {
                                EngineError::invalid_key("record with a key path must be an object")
                            })?
                            .insert(path, Value::from(generated));
                        Key::Int(generated)
                    }
                    None => return Err(EngineError::MissingKey { path }),
                },
                // Surrogate keys are assigned by the engine and not stored
                // inside the record.
                None => {
                    let generated = cs.next_key;
                    cs.next_key += 1;
                    Key::Int(generated)
                }
            }
        };
        self.txn.staged.borrow_mut().push(StagedOp::Put {
            collection: self.name.clone(),
            key: key.clone(),
            record,
        });
        Ok(key)
    }

    fn delete(&self, key: &Key) -> EngineResult<()> {
        self.ensure_writable()?;
        self.txn.staged.borrow_mut().push(StagedOp::Delete {
            collection: self.name.clone(),
            key: key.clone(),
        });
        Ok(())
    }

    fn count(&self, range: Option<&KeyRange>) -> EngineResult<u64> {
        let state = self.txn.shared.state.read();
        let cs = state
            .collections
            .get(&self.name)
            .ok_or_else(|| EngineError::collection_not_found(&self.name))?;
        let count = match range {
            Some(range) => cs.records.keys().filter(|k| range.contains(k)).count(),
            None => cs.records.len(),
        };
        Ok(count as u64)
    }

    fn open_cursor(&self, range: Option<&KeyRange>) -> EngineResult<Cursor> {
        let state = self.txn.shared.state.read();
        let cs = state
            .collections
            .get(&self.name)
            .ok_or_else(|| EngineError::collection_not_found(&self.name))?;
        let records: Vec<Value> = cs
            .records
            .iter()
            .filter(|(key, _)| range.is_none_or(|r| r.contains(key)))
            .map(|(_, record)| record.clone())
            .collect();
        Ok(Cursor::new(records.into_iter()))
    }

    fn index(&self, name: &str) -> EngineResult<Box<dyn IndexRef + '_>> {
        let state = self.txn.shared.state.read();
        let cs = state
            .collections
            .get(&self.name)
            .ok_or_else(|| EngineError::collection_not_found(&self.name))?;
        let spec = cs
            .indexes
            .get(name)
            .ok_or_else(|| EngineError::index_not_found(&self.name, name))?
            .clone();
        drop(state);
        Ok(Box::new(MemoryIndexRef {
            txn: self.txn,
            collection: self.name.clone(),
            spec,
        }))
    }
}

struct MemoryIndexRef<'a> {
    txn: &'a MemoryTransaction,
    collection: String,
    spec: IndexSpec,
}

impl MemoryIndexRef<'_> {
    fn entries(&self) -> EngineResult<Vec<(Key, Key, Value)>> {
        let state = self.txn.shared.state.read();
        let cs = state
            .collections
            .get(&self.collection)
            .ok_or_else(|| EngineError::collection_not_found(&self.collection))?;
        Ok(cs.index_entries(&self.spec))
    }
}

impl IndexRef for MemoryIndexRef<'_> {
    fn name(&self) -> &str {
        &self.spec.field
    }

    fn open_cursor(&self, range: Option<&KeyRange>) -> EngineResult<Cursor> {
        let records: Vec<Value> = self
            .entries()?
            .into_iter()
            .filter(|(entry_key, _, _)| range.is_none_or(|r| r.contains(entry_key)))
            .map(|(_, _, record)| record)
            .collect();
        Ok(Cursor::new(records.into_iter()))
    }

    fn count(&self, range: Option<&KeyRange>) -> EngineResult<u64> {
        let count = self
            .entries()?
            .iter()
            .filter(|(entry_key, _, _)| range.is_none_or(|r| r.contains(entry_key)))
            .count();
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn upgraded(engine: &MemoryEngine, name: &str, version: u32) -> Box<dyn DatabaseHandle> {
        match engine.open(name, version) {
            OpenOutcome::UpgradeNeeded { db, scope, .. } => {
                scope.commit().unwrap();
                db
            }
            OpenOutcome::Open(db) => db,
            _ => panic!("open failed"),
        }
    }

    fn items_db(engine: &MemoryEngine) -> Box<dyn DatabaseHandle> {
        match engine.open("shop", 1) {
            OpenOutcome::UpgradeNeeded { mut scope, db, .. } => {
                scope
                    .create_collection("items", &KeyOptions::path("id"))
                    .unwrap();
                scope
                    .create_index("items", &IndexSpec::new("category"))
                    .unwrap();
                scope.commit().unwrap();
                db
            }
            _ => panic!("expected upgrade on fresh database"),
        }
    }

    fn put_item(db: &dyn DatabaseHandle, record: Value) {
        let txn = db.transaction(&["items"], TransactionMode::ReadWrite).unwrap();
        txn.collection("items").unwrap().put(record).unwrap();
        txn.commit().unwrap();
    }

    #[test]
    fn fresh_open_reports_upgrade() {
        let engine = MemoryEngine::new();
        match engine.open("db", 3) {
            OpenOutcome::UpgradeNeeded {
                old_version,
                new_version,
                ..
            } => {
                assert_eq!(old_version, 0);
                assert_eq!(new_version, 3);
            }
            _ => panic!("expected upgrade"),
        }
    }

    #[test]
    fn version_persists_after_commit() {
        let engine = MemoryEngine::new();
        let db = upgraded(&engine, "db", 2);
        assert_eq!(db.version(), 2);
        db.close();

        match engine.open("db", 2) {
            OpenOutcome::Open(db) => assert_eq!(db.version(), 2),
            _ => panic!("expected direct open at existing version"),
        }
    }

    #[test]
    fn version_regression_fails() {
        let engine = MemoryEngine::new();
        upgraded(&engine, "db", 3).close();
        match engine.open("db", 1) {
            OpenOutcome::Failed(EngineError::VersionRegression { on_disk, requested }) => {
                assert_eq!((on_disk, requested), (3, 1));
            }
            _ => panic!("expected version regression"),
        }
    }

    #[test]
    fn upgrade_blocked_by_open_handle() {
        let engine = MemoryEngine::new();
        let held = upgraded(&engine, "db", 1);
        match engine.open("db", 2) {
            OpenOutcome::Blocked(e) => assert!(e.is_blocked()),
            _ => panic!("expected blocked"),
        }
        held.close();
        match engine.open("db", 2) {
            OpenOutcome::UpgradeNeeded { .. } => {}
            _ => panic!("expected upgrade after close"),
        }
    }

    #[test]
    fn aborted_scope_restores_schema_and_version() {
        let engine = MemoryEngine::new();
        let db = items_db(&engine);
        db.close();

        match engine.open("shop", 2) {
            OpenOutcome::UpgradeNeeded { mut scope, db, .. } => {
                scope.delete_collection("items").unwrap();
                scope
                    .create_collection("orders", &KeyOptions::default())
                    .unwrap();
                scope.abort();
                db.close();
            }
            _ => panic!("expected upgrade"),
        }

        match engine.open("shop", 1) {
            OpenOutcome::Open(db) => {
                assert_eq!(db.version(), 1);
                assert_eq!(db.collection_names(), vec!["items".to_string()]);
                db.close();
            }
            _ => panic!("schema should be rolled back"),
        }
    }

    #[test]
    fn duplicate_collection_and_index_are_fatal() {
        let engine = MemoryEngine::new();
        match engine.open("db", 1) {
            OpenOutcome::UpgradeNeeded { mut scope, db, .. } => {
                scope.create_collection("a", &KeyOptions::default()).unwrap();
                assert!(matches!(
                    scope.create_collection("a", &KeyOptions::default()),
                    Err(EngineError::CollectionExists { .. })
                ));
                scope.create_index("a", &IndexSpec::new("f")).unwrap();
                assert!(matches!(
                    scope.create_index("a", &IndexSpec::new("f")),
                    Err(EngineError::IndexExists { .. })
                ));
                assert!(matches!(
                    scope.delete_collection("missing"),
                    Err(EngineError::CollectionNotFound { .. })
                ));
                scope.abort();
                db.close();
            }
            _ => panic!("expected upgrade"),
        }
    }

    #[test]
    fn put_get_delete_round_trip() {
        let engine = MemoryEngine::new();
        let db = items_db(&engine);
        put_item(&*db, json!({"id": 1, "category": "tools"}));

        let txn = db.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
        let found = txn.collection("items").unwrap().get(&Key::Int(1)).unwrap();
        assert_eq!(found, Some(json!({"id": 1, "category": "tools"})));
        txn.commit().unwrap();

        let txn = db.transaction(&["items"], TransactionMode::ReadWrite).unwrap();
        txn.collection("items").unwrap().delete(&Key::Int(1)).unwrap();
        txn.commit().unwrap();

        let txn = db.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
        assert_eq!(txn.collection("items").unwrap().count(None).unwrap(), 0);
        txn.commit().unwrap();
    }

    #[test]
    fn writes_stay_invisible_until_commit() {
        let engine = MemoryEngine::new();
        let db = items_db(&engine);

        let txn = db.transaction(&["items"], TransactionMode::ReadWrite).unwrap();
        txn.collection("items")
            .unwrap()
            .put(json!({"id": 1, "category": "tools"}))
            .unwrap();
        // Not yet committed; a parallel read sees nothing.
        let peek = db.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
        assert_eq!(peek.collection("items").unwrap().count(None).unwrap(), 0);
        peek.commit().unwrap();
        txn.commit().unwrap();

        let txn = db.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
        assert_eq!(txn.collection("items").unwrap().count(None).unwrap(), 1);
        txn.commit().unwrap();
    }

    #[test]
    fn read_only_transaction_rejects_writes() {
        let engine = MemoryEngine::new();
        let db = items_db(&engine);
        let txn = db.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
        let result = txn.collection("items").unwrap().put(json!({"id": 1}));
        assert!(matches!(result, Err(EngineError::ReadOnlyTransaction)));
    }

    #[test]
    fn out_of_scope_collection_rejected() {
        let engine = MemoryEngine::new();
        let db = items_db(&engine);
        let txn = db.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
        assert!(matches!(
            txn.collection("orders"),
            Err(EngineError::OutOfScope { .. })
        ));
    }

    #[test]
    fn unique_violation_aborts_whole_batch() {
        let engine = MemoryEngine::new();
        match engine.open("db", 1) {
            OpenOutcome::UpgradeNeeded { mut scope, db, .. } => {
                scope
                    .create_collection("users", &KeyOptions::path("id"))
                    .unwrap();
                scope
                    .create_index("users", &IndexSpec::new("email").unique())
                    .unwrap();
                scope.commit().unwrap();

                let txn = db.transaction(&["users"], TransactionMode::ReadWrite).unwrap();
                {
                    let users = txn.collection("users").unwrap();
                    users.put(json!({"id": 1, "email": "a@x"})).unwrap();
                    users.put(json!({"id": 2, "email": "a@x"})).unwrap();
                }
                assert!(matches!(
                    txn.commit(),
                    Err(EngineError::UniqueViolation { .. })
                ));

                let txn = db.transaction(&["users"], TransactionMode::ReadOnly).unwrap();
                assert_eq!(txn.collection("users").unwrap().count(None).unwrap(), 0);
                txn.commit().unwrap();
            }
            _ => panic!("expected upgrade"),
        }
    }

    #[test]
    fn auto_increment_injects_key() {
        let engine = MemoryEngine::new();
        match engine.open("db", 1) {
            OpenOutcome::UpgradeNeeded { mut scope, db, .. } => {
                scope
                    .create_collection(
                        "logs",
                        &KeyOptions::Options {
                            path: "seq".into(),
                            auto_increment: true,
                        },
                    )
                    .unwrap();
                scope.commit().unwrap();

                let txn = db.transaction(&["logs"], TransactionMode::ReadWrite).unwrap();
                let key = txn
                    .collection("logs")
                    .unwrap()
                    .put(json!({"message": "hello"}))
                    .unwrap();
                assert_eq!(key, Key::Int(1));
                txn.commit().unwrap();

                let txn = db.transaction(&["logs"], TransactionMode::ReadOnly).unwrap();
                let stored = txn.collection("logs").unwrap().get(&Key::Int(1)).unwrap();
                assert_eq!(stored, Some(json!({"seq": 1, "message": "hello"})));
                txn.commit().unwrap();
            }
            _ => panic!("expected upgrade"),
        }
    }

    #[test]
    fn missing_key_without_auto_increment_fails() {
        let engine = MemoryEngine::new();
        let db = items_db(&engine);
        let txn = db.transaction(&["items"], TransactionMode::ReadWrite).unwrap();
        let result = txn.collection("items").unwrap().put(json!({"category": "tools"}));
        assert!(matches!(result, Err(EngineError::MissingKey { .. })));
    }

    #[test]
    fn index_cursor_orders_by_value_then_key() {
        let engine = MemoryEngine::new();
        let db = items_db(&engine);
        put_item(&*db, json!({"id": 3, "category": "b"}));
        put_item(&*db, json!({"id": 1, "category": "b"}));
        put_item(&*db, json!({"id": 2, "category": "a"}));

        let txn = db.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
        let items = txn.collection("items").unwrap();
        let index = items.index("category").unwrap();
        let ids: Vec<i64> = index
            .open_cursor(None)
            .unwrap()
            .map(|r| r["id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![2, 1, 3]);

        let b_only = index.count(Some(&KeyRange::only("b"))).unwrap();
        assert_eq!(b_only, 2);
    }

    #[test]
    fn records_without_indexed_field_are_skipped() {
        let engine = MemoryEngine::new();
        let db = items_db(&engine);
        put_item(&*db, json!({"id": 1}));
        put_item(&*db, json!({"id": 2, "category": "tools"}));

        let txn = db.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
        let items = txn.collection("items").unwrap();
        assert_eq!(items.count(None).unwrap(), 2);
        assert_eq!(items.index("category").unwrap().count(None).unwrap(), 1);
    }

    #[test]
    fn multi_entry_index_expands_arrays() {
        let engine = MemoryEngine::new();
        match engine.open("db", 1) {
            OpenOutcome::UpgradeNeeded { mut scope, db, .. } => {
                scope
                    .create_collection("posts", &KeyOptions::path("id"))
                    .unwrap();
                scope
                    .create_index("posts", &IndexSpec::new("tags").multi_entry())
                    .unwrap();
                scope.commit().unwrap();

                let txn = db.transaction(&["posts"], TransactionMode::ReadWrite).unwrap();
                txn.collection("posts")
                    .unwrap()
                    .put(json!({"id": 1, "tags": ["rust", "db"]}))
                    .unwrap();
                txn.commit().unwrap();

                let txn = db.transaction(&["posts"], TransactionMode::ReadOnly).unwrap();
                let posts = txn.collection("posts").unwrap();
                let index = posts.index("tags").unwrap();
                assert_eq!(index.count(None).unwrap(), 2);
                let hits: Vec<Value> =
                    index.open_cursor(Some(&KeyRange::only("rust"))).unwrap().collect();
                assert_eq!(hits.len(), 1);
            }
            _ => panic!("expected upgrade"),
        }
    }

    #[test]
    fn legacy_open_exposes_set_version() {
        let engine = MemoryEngine::legacy();
        match engine.open("db", 2) {
            OpenOutcome::Open(db) => {
                assert_eq!(db.version(), 0);
                let handoff = db.set_version(2).expect("legacy probe answers").unwrap();
                assert_eq!(handoff.old_version, 0);
                assert_eq!(handoff.new_version, 2);
                let mut scope = handoff.scope;
                scope.create_collection("a", &KeyOptions::default()).unwrap();
                scope.commit().unwrap();
                assert_eq!(db.version(), 2);
                db.close();
            }
            _ => panic!("legacy engine never reports upgrades at open"),
        }
    }

    #[test]
    fn modern_handle_lacks_set_version() {
        let engine = MemoryEngine::new();
        let db = upgraded(&engine, "db", 1);
        assert!(db.set_version(2).is_none());
        db.close();
    }

    #[test]
    fn delete_database_requires_all_handles_closed() {
        let engine = MemoryEngine::new();
        let db = upgraded(&engine, "db", 1);
        assert!(matches!(
            engine.delete_database("db"),
            Err(EngineError::DatabaseInUse { .. })
        ));
        db.close();
        engine.delete_database("db").unwrap();
        assert!(matches!(
            engine.delete_database("db"),
            Err(EngineError::DatabaseNotFound { .. })
        ));
    }
}
