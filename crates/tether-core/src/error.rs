#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use crate::path::PathKey;

/// Structural error raised when a path descriptor has an unusable shape.
///
/// These fail fast at bind time; the engine performs no partial setup when
/// one is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("unsupported path shape: {shape} (expected string, array, or object)")]
    UnsupportedShape { shape: &'static str },

    #[error("empty path descriptor")]
    Empty,

    #[error("data source rejected path {key}: {reason}")]
    Rejected { key: PathKey, reason: String },
}

impl PathError {
    #[must_use]
    pub fn rejected(key: PathKey, reason: impl Into<String>) -> Self {
        Self::Rejected {
            key,
            reason: reason.into(),
        }
    }
}

/// Fatal configuration error raised by one-shot snapshot resolution.
///
/// There is no live retry channel in snapshot mode, so a referenced path that
/// is absent from the pre-fetched set aborts the whole resolution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("path missing from pre-fetched result set: {key}")]
    MissingPath { key: PathKey },

    #[error("malformed pre-fetched result set: {reason}")]
    MalformedResults { reason: String },

    #[error("pointer extraction for field `{field}` cannot complete against the pre-fetched set")]
    Unresolvable { field: String },
}

/// Data-plane error delivered through a slot's error side.
///
/// Unlike [`PathError`] and [`SnapshotError`], a `FetchError` is a plain
/// value: it is never returned as `Err` from a notification path, and it
/// never aborts sibling bindings.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    /// The data source could not find data at the path.
    NotFound,
    /// The data source refused to serve the path.
    Unauthorized,
    /// Transport-level failure reported by the data source.
    Transport,
    /// A pointer-extraction dependency never resolved.
    DependencyUnresolvable,
    /// The path has not settled yet and the caller cannot wait.
    Unavailable,
    /// The data source rejected a dynamically discovered path.
    InvalidPath,
    /// Anything else the data source reports.
    Other,
}

impl FetchErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Unauthorized => "unauthorized",
            Self::Transport => "transport",
            Self::DependencyUnresolvable => "dependency_unresolvable",
            Self::Unavailable => "unavailable",
            Self::InvalidPath => "invalid_path",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FetchError {
    #[must_use]
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::NotFound, message)
    }

    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Unavailable, message)
    }

    #[must_use]
    pub fn unresolvable(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::DependencyUnresolvable, message)
    }

    #[must_use]
    pub fn invalid_path(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::InvalidPath, message)
    }

    /// JSON form used when an error is embedded into a materialized graph.
    #[must_use]
    pub fn to_value(&self) -> Value {
        json!({ "kind": self.kind.as_str(), "message": self.message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_error_display() {
        let err = FetchError::not_found("user 7");
        assert_eq!(err.to_string(), "not_found: user 7");
    }

    #[test]
    fn fetch_error_json_form() {
        let err = FetchError::new(FetchErrorKind::Transport, "socket closed");
        assert_eq!(
            err.to_value(),
            json!({ "kind": "transport", "message": "socket closed" })
        );
    }

    #[test]
    fn fetch_error_serde_round_trip() {
        let err = FetchError::unresolvable("dependency never settled");
        let encoded = serde_json::to_value(&err).expect("serialize");
        let decoded: FetchError = serde_json::from_value(encoded).expect("deserialize");
        assert_eq!(decoded, err);
    }
}
