#![forbid(unsafe_code)]

//! Path descriptors and canonical keys.
//!
//! A [`Path`] names a unit of remote data: a plain identifier (string), a
//! segment list (array), or a named query with arguments (object). Anything
//! else is rejected at construction. Logical equality is defined by the
//! canonical key, never by descriptor identity: two descriptors whose object
//! keys are ordered differently denote the same remote data and compare
//! equal.
//!
//! # Invariants
//!
//! 1. `canonical()` is pure and deterministic; repeated calls on equal
//!    descriptors return equal keys.
//! 2. Object key order never affects the key; array order always does.
//! 3. A `Path` that exists is well-shaped — validation happens once, in
//!    [`Path::new`].

use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::PathError;

/// Canonical string form of a [`Path`], used as a map key and for cheap
/// logical-equality checks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathKey(String);

impl PathKey {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated descriptor of "what data to fetch".
///
/// Value type: cloning is cheap enough for bookkeeping, equality and hashing
/// go through the canonical key computed once at construction.
#[derive(Debug, Clone)]
pub struct Path {
    descriptor: Value,
    key: PathKey,
}

impl Path {
    /// Validate and wrap a descriptor.
    ///
    /// Accepts strings, arrays, and objects; rejects null, booleans, and
    /// numbers, as well as empty strings and empty arrays.
    pub fn new(descriptor: Value) -> Result<Self, PathError> {
        let shape = match &descriptor {
            Value::String(s) if s.is_empty() => return Err(PathError::Empty),
            Value::Array(items) if items.is_empty() => return Err(PathError::Empty),
            Value::String(_) | Value::Array(_) | Value::Object(_) => None,
            Value::Null => Some("null"),
            Value::Bool(_) => Some("boolean"),
            Value::Number(_) => Some("number"),
        };
        if let Some(shape) = shape {
            return Err(PathError::UnsupportedShape { shape });
        }
        let key = PathKey(canonical_string(&descriptor));
        Ok(Self { descriptor, key })
    }

    /// A plain string-identifier path. Infallible for non-empty names.
    ///
    /// # Panics
    ///
    /// Panics if `name` is empty; use [`Path::new`] when the name is not
    /// statically known.
    #[must_use]
    pub fn ident(name: impl Into<String>) -> Self {
        let name = name.into();
        assert!(!name.is_empty(), "Path::ident requires a non-empty name");
        let descriptor = Value::String(name);
        let key = PathKey(canonical_string(&descriptor));
        Self { descriptor, key }
    }

    #[must_use]
    pub fn descriptor(&self) -> &Value {
        &self.descriptor
    }

    /// The canonical key. Computed once at construction.
    #[must_use]
    pub fn canonical(&self) -> &PathKey {
        &self.key
    }
}

impl PartialEq for Path {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Path {}

impl Hash for Path {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key.as_str())
    }
}

impl Serialize for Path {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.descriptor.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Path {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let descriptor = Value::deserialize(deserializer)?;
        Path::new(descriptor).map_err(D::Error::custom)
    }
}

/// How a destination's path is supplied: fixed at setup, or recomputed from
/// host state. Dispatched once at bind time.
#[derive(Clone)]
pub enum PathSpec {
    Constant(Path),
    Computed(Rc<dyn Fn() -> Option<Path>>),
}

impl PathSpec {
    #[must_use]
    pub fn computed(f: impl Fn() -> Option<Path> + 'static) -> Self {
        Self::Computed(Rc::new(f))
    }

    /// Current path named by this spec, if any.
    #[must_use]
    pub fn eval(&self) -> Option<Path> {
        match self {
            Self::Constant(path) => Some(path.clone()),
            Self::Computed(f) => f(),
        }
    }
}

impl fmt::Debug for PathSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(path) => f.debug_tuple("Constant").field(path).finish(),
            Self::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// Render a descriptor with recursively sorted object keys.
///
/// Array order is preserved; scalar rendering matches compact JSON.
fn canonical_string(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            out.push_str(&n.to_string());
        }
        Value::String(s) => push_json_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, k) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                push_json_string(k, out);
                out.push(':');
                // Key came from the map, so the entry exists.
                if let Some(v) = map.get(*k) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
    }
}

fn push_json_string(s: &str, out: &mut String) {
    use std::fmt::Write as _;

    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                // Infallible: writing into a String cannot fail.
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}
