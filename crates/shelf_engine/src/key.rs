//! Keys and key ranges.

use crate::error::{EngineError, EngineResult};
use serde_json::Value;
use std::fmt;

/// A totally ordered scalar key.
///
/// Keys are what collections and indexes sort by. Integers order before
/// strings, matching the ordering of browser-embedded object stores where
/// numbers sort before text. Integer keys compare numerically, string keys
/// lexicographically by code point.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    /// An integer key.
    Int(i64),
    /// A string key.
    Str(String),
}

impl Key {
    /// Derives a key from a JSON value.
    ///
    /// Integer numbers and strings are keyable; everything else is
    /// rejected with [`EngineError::InvalidKey`].
    pub fn from_value(value: &Value) -> EngineResult<Self> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .map(Key::Int)
                .ok_or_else(|| EngineError::invalid_key(format!("non-integer number: {n}"))),
            Value::String(s) => Ok(Key::Str(s.clone())),
            other => Err(EngineError::invalid_key(format!(
                "unsupported key type: {other}"
            ))),
        }
    }

    /// Renders the key back into a JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Key::Int(i) => Value::from(*i),
            Key::Str(s) => Value::from(s.clone()),
        }
    }

    /// Returns the string payload, if this is a string key.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Key::Str(s) => Some(s),
            Key::Int(_) => None,
        }
    }

    /// Returns the integer payload, if this is an integer key.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Key::Int(i) => Some(*i),
            Key::Str(_) => None,
        }
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key::Int(value)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Str(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Str(value)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(i) => write!(f, "{i}"),
            Key::Str(s) => write!(f, "{s:?}"),
        }
    }
}

/// A possibly open-ended interval over key values bounding a cursor scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    lower: Option<Key>,
    upper: Option<Key>,
    lower_exclusive: bool,
    upper_exclusive: bool,
}

impl KeyRange {
    /// An exact-match range containing a single key.
    pub fn only(key: impl Into<Key>) -> Self {
        let key = key.into();
        Self {
            lower: Some(key.clone()),
            upper: Some(key),
            lower_exclusive: false,
            upper_exclusive: false,
        }
    }

    /// A range bounded on both sides.
    pub fn bound(
        lower: impl Into<Key>,
        upper: impl Into<Key>,
        lower_exclusive: bool,
        upper_exclusive: bool,
    ) -> Self {
        Self {
            lower: Some(lower.into()),
            upper: Some(upper.into()),
            lower_exclusive,
            upper_exclusive,
        }
    }

    /// A range bounded only from below.
    pub fn lower_bound(lower: impl Into<Key>, exclusive: bool) -> Self {
        Self {
            lower: Some(lower.into()),
            upper: None,
            lower_exclusive: exclusive,
            upper_exclusive: false,
        }
    }

    /// A range bounded only from above.
    pub fn upper_bound(upper: impl Into<Key>, exclusive: bool) -> Self {
        Self {
            lower: None,
            upper: Some(upper.into()),
            lower_exclusive: false,
            upper_exclusive: exclusive,
        }
    }

    /// Tests whether a key falls inside the range.
    #[must_use]
    pub fn contains(&self, key: &Key) -> bool {
        if let Some(lower) = &self.lower {
            if key < lower || (self.lower_exclusive && key == lower) {
                return false;
            }
        }
        if let Some(upper) = &self.upper {
            if key > upper || (self.upper_exclusive && key == upper) {
                return false;
            }
        }
        true
    }

    /// Returns the lower bound, if any.
    #[must_use]
    pub fn lower(&self) -> Option<&Key> {
        self.lower.as_ref()
    }

    /// Returns the upper bound, if any.
    #[must_use]
    pub fn upper(&self) -> Option<&Key> {
        self.upper.as_ref()
    }
}
