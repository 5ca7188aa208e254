//! Per-collection reflection and synthesized accessors.
//!
//! When a connection materializes, one [`StoreMeta`] is reflected per
//! existing collection from engine metadata: its key path and index names.
//! Each indexable field - the primary key counts as the unnamed index -
//! gets an entry in an explicit lookup table mapping the field name to its
//! operation bundle and derived accessor-name fragment. Callers resolve
//! operations by field name through a [`Store`] handle.

use crate::connection::{Connection, ScanItem};
use crate::error::{CoreError, CoreResult};
use parking_lot::RwLock;
use serde_json::Value;
use shelf_engine::{Key, KeyRange};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A pure transform applied to written records or queried index values.
pub type Normalizer = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Derives the accessor-name fragment for a field.
///
/// The character following the start of the name, an underscore run, or a
/// whitespace run is capitalized and the separators are dropped:
/// `user_id` becomes `UserId`, `first name` becomes `FirstName`.
/// Separators not followed by a lowercase ASCII letter are kept as-is.
#[must_use]
pub fn accessor_name(field: &str) -> String {
    let trimmed = field.trim();
    let mut out = String::with_capacity(trimmed.len());
    let mut separators = String::new();
    let mut at_boundary = true;
    for ch in trimmed.chars() {
        if ch == '_' || ch.is_whitespace() {
            separators.push(ch);
            at_boundary = true;
        } else if at_boundary && ch.is_ascii_lowercase() {
            separators.clear();
            out.push(ch.to_ascii_uppercase());
            at_boundary = false;
        } else {
            out.push_str(&separators);
            separators.clear();
            out.push(ch);
            at_boundary = false;
        }
    }
    out.push_str(&separators);
    out
}

/// One entry of the field-name lookup table: where queries for the field
/// go, what its accessor fragment is, and its normalization chain.
pub struct IndexBinding {
    /// Field the binding resolves.
    field: String,
    /// Index backing the field's queries; `None` means the primary key.
    index: Option<String>,
    /// Derived accessor-name fragment, e.g. `UserId`.
    accessor: String,
    /// Index-level normalization chain, in registration order.
    hooks: RwLock<Vec<Normalizer>>,
}

impl IndexBinding {
    fn new(field: &str, index: Option<String>) -> Self {
        Self {
            field: field.to_string(),
            index,
            accessor: accessor_name(field),
            hooks: RwLock::new(Vec::new()),
        }
    }

    /// Field this binding resolves.
    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Derived accessor-name fragment.
    #[must_use]
    pub fn accessor(&self) -> &str {
        &self.accessor
    }

    /// True when the binding targets the primary key rather than a named
    /// index.
    #[must_use]
    pub fn is_primary_key(&self) -> bool {
        self.index.is_none()
    }

    fn normalize(&self, value: Value) -> Value {
        let hooks = self.hooks.read();
        hooks.iter().fold(value, |value, hook| hook(value))
    }
}

/// Reflected schema and normalization state of one collection.
///
/// Owned by the connection's registry; [`Store`] handles borrow it via
/// `Arc`, so hooks registered through any handle are visible to all.
pub struct StoreMeta {
    name: String,
    key_path: Option<String>,
    bindings: BTreeMap<String, IndexBinding>,
    record_hooks: RwLock<Vec<Normalizer>>,
}

impl StoreMeta {
    /// Reads a collection's metadata and builds its lookup table.
    pub(crate) fn reflect(conn: &Connection, name: &str) -> CoreResult<Self> {
        let (key_path, index_names) = conn.collection_meta(name)?;
        tracing::trace!(collection = name, ?key_path, ?index_names, "reflecting collection");
        let mut bindings = BTreeMap::new();
        if let Some(pk) = &key_path {
            bindings.insert(pk.clone(), IndexBinding::new(pk, None));
        }
        for index in index_names {
            bindings.insert(index.clone(), IndexBinding::new(&index, Some(index.clone())));
        }
        Ok(Self {
            name: name.to_string(),
            key_path,
            bindings,
            record_hooks: RwLock::new(Vec::new()),
        })
    }

    fn binding(&self, field: &str) -> CoreResult<&IndexBinding> {
        self.bindings
            .get(field)
            .ok_or_else(|| CoreError::unknown_field(&self.name, field))
    }

    fn normalize_record(&self, record: Value) -> Value {
        let hooks = self.record_hooks.read();
        hooks.iter().fold(record, |record, hook| hook(record))
    }
}

/// Handle to one reflected collection.
///
/// Synthesized operations resolve by field name against the store's
/// lookup table; the primary key is addressed like any other field.
/// Writes run through the record-level normalization chain, lookups and
/// index queries through the relevant index-level chain.
///
/// # Example
///
/// ```rust,ignore
/// let items = conn.store("items").unwrap();
/// items.put(json!({"id": 1, "category": "Tools"}))?;
/// items.normalize_by("category", |v| lowercased(v))?;
/// let hits = items.find_value_by("category", "tools".into())?;
/// ```
#[derive(Clone)]
pub struct Store {
    conn: Connection,
    meta: Arc<StoreMeta>,
}

impl Store {
    pub(crate) fn new(conn: Connection, meta: Arc<StoreMeta>) -> Self {
        Self { conn, meta }
    }

    /// Name of the collection.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    /// The collection's primary-key field, if records carry their keys.
    #[must_use]
    pub fn key_path(&self) -> Option<&str> {
        self.meta.key_path.as_deref()
    }

    /// The lookup table of `(field, accessor fragment)` pairs, primary key
    /// included.
    #[must_use]
    pub fn accessor_names(&self) -> Vec<(String, String)> {
        self.meta
            .bindings
            .values()
            .map(|b| (b.field().to_string(), b.accessor().to_string()))
            .collect()
    }

    /// True when `field` resolves to the primary key or an index.
    #[must_use]
    pub fn has_field(&self, field: &str) -> bool {
        self.meta.bindings.contains_key(field)
    }

    /// Reads the record stored under the primary key `key`.
    ///
    /// The lookup key runs through the primary key's normalization chain
    /// before the read.
    pub fn get_by_key(&self, key: Key) -> CoreResult<Option<Value>> {
        let key = self.normalized_primary_key(key)?;
        self.conn.get(&self.meta.name, &key)
    }

    /// Alias for [`Store::get_by_key`].
    pub fn get(&self, key: Key) -> CoreResult<Option<Value>> {
        self.get_by_key(key)
    }

    /// Reads many records by primary key in one read transaction.
    pub fn get_many(&self, keys: Vec<Key>) -> CoreResult<BTreeMap<Key, Value>> {
        let keys = keys
            .into_iter()
            .map(|k| self.normalized_primary_key(k))
            .collect::<CoreResult<Vec<_>>>()?;
        self.conn.get_many(&self.meta.name, &keys)
    }

    /// Records matching `range` over `field`, in key order.
    pub fn find_by(&self, field: &str, range: Option<&KeyRange>) -> CoreResult<Vec<Value>> {
        let binding = self.meta.binding(field)?;
        self.conn.find(&self.meta.name, binding.index.as_deref(), range)
    }

    /// Raw cursor variant of [`Store::find_by`]: streams matching records
    /// through `visit`, ending with [`ScanItem::Done`].
    pub fn scan_by(
        &self,
        field: &str,
        range: Option<&KeyRange>,
        visit: impl FnMut(ScanItem),
    ) -> CoreResult<()> {
        let binding = self.meta.binding(field)?;
        self.conn
            .scan(&self.meta.name, binding.index.as_deref(), range, visit)
    }

    /// Records whose `field` exactly matches `value`.
    ///
    /// The probe value runs through the field's normalization chain, so a
    /// lookup matches what the write path stored.
    pub fn find_value_by(&self, field: &str, value: Key) -> CoreResult<Vec<Value>> {
        let binding = self.meta.binding(field)?;
        let value = Key::from_value(&binding.normalize(value.to_value()))?;
        self.conn
            .find_value(&self.meta.name, binding.index.as_deref(), value)
    }

    /// Records whose `field` starts with `prefix`.
    pub fn find_by_prefix_of(&self, field: &str, prefix: &str) -> CoreResult<Vec<Value>> {
        let binding = self.meta.binding(field)?;
        let normalized = binding.normalize(Value::from(prefix));
        let prefix = normalized.as_str().ok_or_else(|| {
            CoreError::invalid_operation("normalization turned a prefix into a non-string")
        })?;
        self.conn
            .prefix_scan(&self.meta.name, binding.index.as_deref(), prefix)
    }

    /// Records in `range` over `field` passing `predicate`.
    pub fn filter_by(
        &self,
        field: &str,
        range: Option<&KeyRange>,
        predicate: Option<&dyn Fn(&Value) -> bool>,
    ) -> CoreResult<Vec<Value>> {
        let binding = self.meta.binding(field)?;
        self.conn
            .filter(&self.meta.name, binding.index.as_deref(), range, predicate)
    }

    /// Counts records in `range` over `field`.
    pub fn count_by(&self, field: &str, range: Option<&KeyRange>) -> CoreResult<u64> {
        let binding = self.meta.binding(field)?;
        self.conn
            .count(&self.meta.name, binding.index.as_deref(), range)
    }

    /// Counts all records in the collection.
    pub fn count(&self) -> CoreResult<u64> {
        self.conn.count(&self.meta.name, None, None)
    }

    /// All records in the collection, in primary-key order.
    pub fn get_all(&self) -> CoreResult<Vec<Value>> {
        self.conn.get_all(&self.meta.name)
    }

    /// Upserts a record after running the record-level normalization
    /// chain, returning the key it landed under.
    pub fn put(&self, record: Value) -> CoreResult<Key> {
        self.conn.put(&self.meta.name, self.meta.normalize_record(record))
    }

    /// Upserts many normalized records in one write transaction.
    pub fn put_all(&self, records: Vec<Value>) -> CoreResult<Vec<Key>> {
        let records = records
            .into_iter()
            .map(|r| self.meta.normalize_record(r))
            .collect();
        self.conn.put_all(&self.meta.name, records)
    }

    /// Deletes the record under the primary key `key`.
    pub fn remove(&self, key: Key) -> CoreResult<()> {
        let key = self.normalized_primary_key(key)?;
        self.conn.remove(&self.meta.name, &key)
    }

    /// Deletes many records by primary key in one write transaction.
    pub fn remove_all(&self, keys: Vec<Key>) -> CoreResult<()> {
        let keys = keys
            .into_iter()
            .map(|k| self.normalized_primary_key(k))
            .collect::<CoreResult<Vec<_>>>()?;
        self.conn.remove_all(&self.meta.name, &keys)
    }

    /// Appends a record-level normalization transform.
    ///
    /// Transforms must be pure; they run in registration order against
    /// every record written through this store.
    pub fn normalize(&self, hook: impl Fn(Value) -> Value + Send + Sync + 'static) {
        self.meta.record_hooks.write().push(Arc::new(hook));
    }

    /// Appends an index-level normalization transform for `field`.
    ///
    /// The transform applies to every value used to query the field, and
    /// the record-level chain is auto-extended with a transform rewriting
    /// that one field, so the write path and the query path stay
    /// consistent.
    pub fn normalize_by(
        &self,
        field: &str,
        hook: impl Fn(Value) -> Value + Send + Sync + 'static,
    ) -> CoreResult<()> {
        let binding = self.meta.binding(field)?;
        let hook: Normalizer = Arc::new(hook);
        binding.hooks.write().push(Arc::clone(&hook));

        let field = field.to_string();
        self.meta.record_hooks.write().push(Arc::new(move |mut record: Value| {
            if let Some(object) = record.as_object_mut() {
                if let Some(value) = object.get(&field) {
                    let rewritten = hook(value.clone());
                    object.insert(field.clone(), rewritten);
                }
            }
            record
        }));
        Ok(())
    }

    /// Runs the primary key's normalization chain over a lookup key.
    fn normalized_primary_key(&self, key: Key) -> CoreResult<Key> {
        let Some(pk) = &self.meta.key_path else {
            // Surrogate-keyed collections have no chain to run.
            return Ok(key);
        };
        let binding = self.meta.binding(pk)?;
        Ok(Key::from_value(&binding.normalize(key.to_value()))?)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.meta.name)
            .field("key_path", &self.meta.key_path)
            .field("fields", &self.meta.bindings.keys().collect::<Vec<_>>())
            .finish()
    }
}
