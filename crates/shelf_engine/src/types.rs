//! Shared schema and transaction types.

/// Access mode of an engine transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// Reads only; writes are rejected.
    ReadOnly,
    /// Reads and writes.
    ReadWrite,
}

/// Primary-key configuration for a collection.
///
/// Mirrors the three shapes accepted when creating a collection: no
/// primary key at all (the engine assigns surrogate keys), a bare field
/// name, or an explicit options object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum KeyOptions {
    /// No key path; the engine assigns monotonically increasing surrogate
    /// keys that are not stored inside the record.
    #[default]
    Surrogate,
    /// Records carry their key at this field.
    Path(String),
    /// Explicit options: key path plus auto-increment behavior.
    Options {
        /// Field holding the key inside each record.
        path: String,
        /// Generate and inject a key when the field is absent.
        auto_increment: bool,
    },
}

impl KeyOptions {
    /// Key path configuration for records keyed by a field.
    pub fn path(field: impl Into<String>) -> Self {
        Self::Path(field.into())
    }

    /// Returns the key path, if one is configured.
    #[must_use]
    pub fn key_path(&self) -> Option<&str> {
        match self {
            Self::Surrogate => None,
            Self::Path(path) | Self::Options { path, .. } => Some(path),
        }
    }

    /// True when the engine may generate keys for records missing one.
    #[must_use]
    pub fn auto_increment(&self) -> bool {
        match self {
            Self::Surrogate => true,
            Self::Path(_) => false,
            Self::Options { auto_increment, .. } => *auto_increment,
        }
    }
}

impl From<&str> for KeyOptions {
    fn from(field: &str) -> Self {
        Self::Path(field.to_string())
    }
}

/// Declaration of a secondary index over one record field.
///
/// The index name is the field name; a collection has at most one index
/// per field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    /// Record field the index projects.
    pub field: String,
    /// Reject two records with the same indexed value.
    pub unique: bool,
    /// Index each element of an array-valued field separately.
    pub multi_entry: bool,
}

impl IndexSpec {
    /// A non-unique, single-entry index over `field`.
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            unique: false,
            multi_entry: false,
        }
    }

    /// Marks the index unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Marks the index multi-entry.
    #[must_use]
    pub fn multi_entry(mut self) -> Self {
        self.multi_entry = true;
        self
    }
}

impl From<&str> for IndexSpec {
    fn from(field: &str) -> Self {
        Self::new(field)
    }
}

impl From<String> for IndexSpec {
    fn from(field: String) -> Self {
        Self::new(field)
    }
}

/// Conversion into a list of index declarations.
///
/// Accepts a single field name, a list of field names, or explicit
/// [`IndexSpec`]s, so collection creation can name its indexes in
/// whichever shape is most convenient.
pub trait IntoIndexSpecs {
    /// Converts into the canonical list form.
    fn into_index_specs(self) -> Vec<IndexSpec>;
}

impl IntoIndexSpecs for () {
    fn into_index_specs(self) -> Vec<IndexSpec> {
        Vec::new()
    }
}

impl IntoIndexSpecs for &str {
    fn into_index_specs(self) -> Vec<IndexSpec> {
        vec![IndexSpec::new(self)]
    }
}

impl IntoIndexSpecs for String {
    fn into_index_specs(self) -> Vec<IndexSpec> {
        vec![IndexSpec::new(self)]
    }
}

impl IntoIndexSpecs for IndexSpec {
    fn into_index_specs(self) -> Vec<IndexSpec> {
        vec![self]
    }
}

impl<T: Into<IndexSpec>> IntoIndexSpecs for Vec<T> {
    fn into_index_specs(self) -> Vec<IndexSpec> {
        self.into_iter().map(Into::into).collect()
    }
}

impl<T: Into<IndexSpec> + Clone> IntoIndexSpecs for &[T] {
    fn into_index_specs(self) -> Vec<IndexSpec> {
        self.iter().cloned().map(Into::into).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_options_shapes() {
        assert_eq!(KeyOptions::default().key_path(), None);
        assert!(KeyOptions::default().auto_increment());

        let path = KeyOptions::path("id");
        assert_eq!(path.key_path(), Some("id"));
        assert!(!path.auto_increment());

        let options = KeyOptions::Options {
            path: "id".into(),
            auto_increment: true,
        };
        assert_eq!(options.key_path(), Some("id"));
        assert!(options.auto_increment());
    }

    #[test]
    fn index_spec_builders() {
        let spec = IndexSpec::new("category").unique();
        assert_eq!(spec.field, "category");
        assert!(spec.unique);
        assert!(!spec.multi_entry);
    }

    #[test]
    fn into_index_specs_shapes() {
        assert!(().into_index_specs().is_empty());
        assert_eq!("category".into_index_specs().len(), 1);
        assert_eq!(vec!["a", "b"].into_index_specs().len(), 2);
        let explicit = vec![IndexSpec::new("tags").multi_entry()];
        assert!(explicit.into_index_specs()[0].multi_entry);
    }
}
