#![forbid(unsafe_code)]

//! One-shot counterpart of the expansion binder.
//!
//! When no subscription channel exists (a single render from a pre-fetched
//! batch), the same expansion tree is resolved synchronously against a flat
//! [`ResultSet`]. All dependencies are assumed present in the initial fetch:
//! any lookup miss is a fatal [`SnapshotError::MissingPath`] — the caller
//! under-specified what to pre-fetch — never a retryable condition. No
//! subscriptions are created, so nothing needs disposal.
//!
//! The produced graph is structurally identical to the first stable
//! materialized value of the subscription-mode engine for the same data.

use ahash::AHashMap;
use serde_json::Value;

use tether_core::{FetchError, FetchResult, Path, PathKey, SnapshotError};

use crate::expansion::ExpansionSpec;
use crate::resolver::{Cardinality, Extraction, extract_pointers};

/// Flat collection of pre-fetched results, keyed by canonical path key.
#[derive(Debug, Default, Clone)]
pub struct ResultSet {
    entries: AHashMap<PathKey, FetchResult>,
}

impl ResultSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_results(results: Vec<FetchResult>) -> Self {
        let mut set = Self::new();
        for result in results {
            set.insert(result);
        }
        set
    }

    /// Parse a settled prefetch value (an array of `{what, data, error}`
    /// entries) into a result set.
    pub fn from_value(value: &Value) -> Result<Self, SnapshotError> {
        let results: Vec<FetchResult> = serde_json::from_value(value.clone()).map_err(|err| {
            SnapshotError::MalformedResults {
                reason: err.to_string(),
            }
        })?;
        Ok(Self::from_results(results))
    }

    pub fn insert(&mut self, result: FetchResult) {
        self.entries
            .insert(result.what.canonical().clone(), result);
    }

    #[must_use]
    pub fn lookup(&self, path: &Path) -> Option<&FetchResult> {
        self.entries.get(path.canonical())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Root outcome of a snapshot resolution: the expanded value plus the root's
/// own fetch error, mirroring a slot's paired sides.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub value: Option<Value>,
    pub error: Option<FetchError>,
}

/// Synchronously expand `root` per `specs` against `results`.
pub fn resolve_snapshot(
    root: &Path,
    specs: &[ExpansionSpec],
    results: &ResultSet,
) -> Result<Resolved, SnapshotError> {
    let entry = results.lookup(root).ok_or_else(|| SnapshotError::MissingPath {
        key: root.canonical().clone(),
    })?;
    let value = match &entry.data {
        None => None,
        Some(data) => Some(expand_value(data, specs, results)?),
    };
    Ok(Resolved {
        value,
        error: entry.error.clone(),
    })
}

fn expand_value(
    data: &Value,
    specs: &[ExpansionSpec],
    results: &ResultSet,
) -> Result<Value, SnapshotError> {
    match data {
        Value::Array(items) => Ok(Value::Array(
            items
                .iter()
                .map(|item| expand_element(item, specs, results))
                .collect::<Result<_, _>>()?,
        )),
        single => expand_element(single, specs, results),
    }
}

fn expand_element(
    raw: &Value,
    specs: &[ExpansionSpec],
    results: &ResultSet,
) -> Result<Value, SnapshotError> {
    if specs.is_empty() {
        return Ok(raw.clone());
    }
    let Value::Object(base) = raw else {
        return Ok(raw.clone());
    };
    let mut out = base.clone();

    for spec in specs {
        let resolve = |path: &Path| results.lookup(path).and_then(|r| r.data.clone());
        let paths = match extract_pointers(raw, spec.schema(), &resolve) {
            Extraction::Resolved(paths) => paths,
            Extraction::Missing(missing) => {
                // The one-shot fetch was supposed to contain everything.
                return Err(match missing.first() {
                    Some(path) => SnapshotError::MissingPath {
                        key: path.canonical().clone(),
                    },
                    None => SnapshotError::Unresolvable {
                        field: spec.field().to_string(),
                    },
                });
            }
        };

        match spec.schema().cardinality() {
            Cardinality::ToOne => match paths.first() {
                None => {
                    out.insert(spec.field().to_string(), Value::Null);
                }
                Some(path) => {
                    let child = lookup_required(results, path)?;
                    if let Some(error) = &child.error {
                        out.insert(spec.field().to_string(), Value::Null);
                        out.insert(format!("{}Error", spec.field()), error.to_value());
                    } else {
                        let value = match &child.data {
                            None => Value::Null,
                            Some(data) => expand_value(data, spec.children(), results)?,
                        };
                        out.insert(spec.field().to_string(), value);
                    }
                }
            },
            Cardinality::ToMany => {
                let mut items = Vec::with_capacity(paths.len());
                let mut errors = Vec::with_capacity(paths.len());
                let mut any_error = false;
                for path in &paths {
                    let child = lookup_required(results, path)?;
                    match (&child.data, &child.error) {
                        (_, Some(error)) => {
                            items.push(Value::Null);
                            errors.push(error.to_value());
                            any_error = true;
                        }
                        (Some(data), None) => {
                            items.push(expand_value(data, spec.children(), results)?);
                            errors.push(Value::Null);
                        }
                        (None, None) => {
                            items.push(Value::Null);
                            errors.push(Value::Null);
                        }
                    }
                }
                out.insert(spec.field().to_string(), Value::Array(items));
                if any_error {
                    out.insert(format!("{}Error", spec.field()), Value::Array(errors));
                }
            }
        }
    }
    Ok(Value::Object(out))
}

fn lookup_required<'a>(
    results: &'a ResultSet,
    path: &Path,
) -> Result<&'a FetchResult, SnapshotError> {
    results.lookup(path).ok_or_else(|| SnapshotError::MissingPath {
        key: path.canonical().clone(),
    })
}
