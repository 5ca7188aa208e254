//! Connection facade over an open database handle.

use crate::error::{CoreError, CoreResult};
use crate::store::{Store, StoreMeta};
use parking_lot::RwLock;
use serde_json::Value;
use shelf_engine::{DatabaseHandle, Engine, Key, KeyRange, TransactionMode};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One element of a cursor scan: a matching record, or the explicit
/// end-of-stream marker delivered exactly once after the last record.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanItem {
    /// A record matched the scan.
    Record(Value),
    /// The scan is complete.
    Done,
}

/// A live connection to an opened, versioned database.
///
/// The connection owns the registry of reflected stores and composes every
/// query and mutation from engine transactions. Each operation opens its
/// own transaction scoped to just the collections it touches; results are
/// returned only after that transaction has committed, and no operation
/// spans more than one top-level transaction.
///
/// `Connection` is cheaply clonable; clones share the one physical
/// database handle, which is closed once via [`Connection::close`], never
/// per collection.
///
/// # Example
///
/// ```rust,ignore
/// let conn = shelf_core::open(engine, "shop", deltas)?;
/// conn.on_success(|conn| {
///     let key = conn.put("items", json!({"id": 1, "category": "tools"})).unwrap();
///     let hits = conn.find_value("items", Some("category"), "tools".into()).unwrap();
/// });
/// ```
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    engine: Arc<dyn Engine>,
    db: Arc<dyn DatabaseHandle>,
    stores: RwLock<BTreeMap<String, Arc<StoreMeta>>>,
    is_open: RwLock<bool>,
}

impl Connection {
    /// Wraps an open handle without reflecting collections yet.
    ///
    /// The migration driver uses this for the connection visible inside
    /// version-delta callbacks, where schema is still in flux.
    pub(crate) fn new(engine: Arc<dyn Engine>, db: Arc<dyn DatabaseHandle>) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                engine,
                db,
                stores: RwLock::new(BTreeMap::new()),
                is_open: RwLock::new(true),
            }),
        }
    }

    /// Builds one [`Store`] reflection per existing collection.
    pub(crate) fn reflect_all(&self) -> CoreResult<()> {
        for name in self.inner.db.collection_names() {
            let meta = StoreMeta::reflect(self, &name)?;
            self.inner.stores.write().insert(name, Arc::new(meta));
        }
        Ok(())
    }

    /// Reads a collection's schema metadata in its own read transaction.
    pub(crate) fn collection_meta(
        &self,
        collection: &str,
    ) -> CoreResult<(Option<String>, Vec<String>)> {
        self.ensure_open()?;
        let txn = self
            .inner
            .db
            .transaction(&[collection], TransactionMode::ReadOnly)?;
        let meta = {
            let col = txn.collection(collection)?;
            (col.key_path(), col.index_names())
        };
        txn.commit()?;
        Ok(meta)
    }

    /// Name of the underlying database.
    #[must_use]
    pub fn name(&self) -> String {
        self.inner.db.name()
    }

    /// Version the database is currently at.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.inner.db.version()
    }

    /// Names of all reflected stores.
    #[must_use]
    pub fn store_names(&self) -> Vec<String> {
        self.inner.stores.read().keys().cloned().collect()
    }

    /// Resolves the reflected store for a collection.
    #[must_use]
    pub fn store(&self, name: &str) -> Option<Store> {
        let meta = self.inner.stores.read().get(name).cloned()?;
        Some(Store::new(self.clone(), meta))
    }

    /// Reads the record stored under `key`.
    pub fn get(&self, collection: &str, key: &Key) -> CoreResult<Option<Value>> {
        self.ensure_open()?;
        let txn = self
            .inner
            .db
            .transaction(&[collection], TransactionMode::ReadOnly)?;
        let found = txn.collection(collection)?.get(key)?;
        txn.commit()?;
        Ok(found)
    }

    /// Reads many records in one read transaction.
    ///
    /// Keys with no stored record are omitted from the result map.
    pub fn get_many(&self, collection: &str, keys: &[Key]) -> CoreResult<BTreeMap<Key, Value>> {
        self.ensure_open()?;
        let txn = self
            .inner
            .db
            .transaction(&[collection], TransactionMode::ReadOnly)?;
        let mut found = BTreeMap::new();
        {
            let col = txn.collection(collection)?;
            for key in keys {
                if let Some(record) = col.get(key)? {
                    found.insert(key.clone(), record);
                }
            }
        }
        txn.commit()?;
        Ok(found)
    }

    /// Streams records in key order through `visit`.
    ///
    /// `visit` receives one [`ScanItem::Record`] per matching record and
    /// then exactly one [`ScanItem::Done`] after the transaction has
    /// completed. With an index name the cursor runs over that index; with
    /// a range it is bounded to matching keys.
    pub fn scan(
        &self,
        collection: &str,
        index: Option<&str>,
        range: Option<&KeyRange>,
        mut visit: impl FnMut(ScanItem),
    ) -> CoreResult<()> {
        self.ensure_open()?;
        let txn = self
            .inner
            .db
            .transaction(&[collection], TransactionMode::ReadOnly)?;
        {
            let col = txn.collection(collection)?;
            let cursor = match index {
                Some(index) => col.index(index)?.open_cursor(range)?,
                None => col.open_cursor(range)?,
            };
            for record in cursor {
                visit(ScanItem::Record(record));
            }
        }
        txn.commit()?;
        visit(ScanItem::Done);
        Ok(())
    }

    /// Collects records passing `predicate` into an ordered sequence.
    pub fn filter(
        &self,
        collection: &str,
        index: Option<&str>,
        range: Option<&KeyRange>,
        predicate: Option<&dyn Fn(&Value) -> bool>,
    ) -> CoreResult<Vec<Value>> {
        let mut matched = Vec::new();
        self.scan(collection, index, range, |item| {
            if let ScanItem::Record(record) = item {
                if predicate.is_none_or(|p| p(&record)) {
                    matched.push(record);
                }
            }
        })?;
        Ok(matched)
    }

    /// [`Connection::filter`] without a predicate.
    pub fn find(
        &self,
        collection: &str,
        index: Option<&str>,
        range: Option<&KeyRange>,
    ) -> CoreResult<Vec<Value>> {
        self.filter(collection, index, range, None)
    }

    /// [`Connection::find`] with an exact-match range.
    pub fn find_value(
        &self,
        collection: &str,
        index: Option<&str>,
        value: Key,
    ) -> CoreResult<Vec<Value>> {
        self.find(collection, index, Some(&KeyRange::only(value)))
    }

    /// [`Connection::find`] over the whole collection.
    pub fn get_all(&self, collection: &str) -> CoreResult<Vec<Value>> {
        self.find(collection, None, None)
    }

    /// Records whose key (or indexed value) starts with `prefix`.
    ///
    /// The match is lexicographic over a half-open range whose exclusive
    /// upper bound replaces the prefix's last character with its successor
    /// code point. An empty prefix scans unbounded.
    pub fn prefix_scan(
        &self,
        collection: &str,
        index: Option<&str>,
        prefix: &str,
    ) -> CoreResult<Vec<Value>> {
        let range = prefix_range(prefix)?;
        self.find(collection, index, range.as_ref())
    }

    /// Upserts a record, returning the key it landed under.
    pub fn put(&self, collection: &str, record: Value) -> CoreResult<Key> {
        let mut keys = self.put_all(collection, vec![record])?;
        keys.pop()
            .ok_or_else(|| CoreError::invalid_operation("put committed no record"))
    }

    /// Upserts many records in one write transaction.
    ///
    /// The whole batch commits atomically: per-record failures are not
    /// surfaced individually, an engine-level failure aborts every write.
    pub fn put_all(&self, collection: &str, records: Vec<Value>) -> CoreResult<Vec<Key>> {
        self.ensure_open()?;
        let txn = self
            .inner
            .db
            .transaction(&[collection], TransactionMode::ReadWrite)?;
        let mut keys = Vec::with_capacity(records.len());
        {
            let col = txn.collection(collection)?;
            for record in records {
                keys.push(col.put(record)?);
            }
        }
        txn.commit()?;
        Ok(keys)
    }

    /// Counts records, optionally over an index and bounded by a range.
    pub fn count(
        &self,
        collection: &str,
        index: Option<&str>,
        range: Option<&KeyRange>,
    ) -> CoreResult<u64> {
        self.ensure_open()?;
        let txn = self
            .inner
            .db
            .transaction(&[collection], TransactionMode::ReadOnly)?;
        let count = {
            let col = txn.collection(collection)?;
            match index {
                Some(index) => col.index(index)?.count(range)?,
                None => col.count(range)?,
            }
        };
        txn.commit()?;
        Ok(count)
    }

    /// Deletes the record under `key`.
    pub fn remove(&self, collection: &str, key: &Key) -> CoreResult<()> {
        self.remove_all(collection, std::slice::from_ref(key))
    }

    /// Deletes many records by key in one write transaction.
    pub fn remove_all(&self, collection: &str, keys: &[Key]) -> CoreResult<()> {
        self.ensure_open()?;
        let txn = self
            .inner
            .db
            .transaction(&[collection], TransactionMode::ReadWrite)?;
        {
            let col = txn.collection(collection)?;
            for key in keys {
                col.delete(key)?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Closes the connection, releasing the database handle.
    pub fn close(&self) -> CoreResult<()> {
        let mut is_open = self.inner.is_open.write();
        if !*is_open {
            return Ok(());
        }
        self.inner.db.close();
        *is_open = false;
        Ok(())
    }

    /// Deletes the whole database after closing the connection.
    pub fn destroy(&self) -> CoreResult<()> {
        let name = self.inner.db.name();
        self.close()?;
        self.inner.engine.delete_database(&name)?;
        Ok(())
    }

    /// Checks if the connection is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.inner.is_open.read()
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if *self.inner.is_open.read() {
            Ok(())
        } else {
            Err(CoreError::ConnectionClosed)
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name())
            .field("version", &self.version())
            .field("is_open", &self.is_open())
            .finish_non_exhaustive()
    }
}

/// Derives the half-open key range matching string keys with `prefix`.
///
/// Returns `None` for the empty prefix (unbounded scan). The upper bound
/// replaces the last character with its successor code point, stepping
/// over the surrogate gap; a last character of `char::MAX` has no
/// successor and is surfaced as [`CoreError::PrefixOverflow`].
pub(crate) fn prefix_range(prefix: &str) -> CoreResult<Option<KeyRange>> {
    let Some(last) = prefix.chars().next_back() else {
        return Ok(None);
    };
    if last == char::MAX {
        return Err(CoreError::PrefixOverflow {
            prefix: prefix.to_string(),
        });
    }
    let mut next = last as u32 + 1;
    if (0xD800..=0xDFFF).contains(&next) {
        next = 0xE000;
    }
    let successor = char::from_u32(next).ok_or_else(|| CoreError::PrefixOverflow {
        prefix: prefix.to_string(),
    })?;
    let mut upper = prefix[..prefix.len() - last.len_utf8()].to_string();
    upper.push(successor);
    Ok(Some(KeyRange::bound(prefix, upper.as_str(), false, true)))
}
