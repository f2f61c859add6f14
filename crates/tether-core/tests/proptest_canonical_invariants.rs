//! Property-based invariant tests for path canonicalization:
//!
//! 1. Never panics on arbitrary descriptor shapes
//! 2. Determinism: equal descriptors -> equal keys, across repeated calls
//! 3. Object key insertion order never affects the key
//! 4. Array order always affects the key (distinct element lists)
//! 5. Canonical keys parse back as JSON equal to the descriptor
//! 6. Serde round trip preserves logical identity

#![forbid(unsafe_code)]

use proptest::prelude::*;
use serde_json::{Map, Value, json};
use tether_core::Path;

// ── Strategies ───────────────────────────────────────────────────────

/// JSON scalars that may appear inside a descriptor.
fn arb_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        "[a-zA-Z0-9_ ]{0,12}".prop_map(Value::String),
    ]
}

/// Nested descriptor bodies: scalars, arrays, and objects up to depth 3.
fn arb_json() -> impl Strategy<Value = Value> {
    arb_scalar().prop_recursive(3, 24, 6, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            proptest::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

/// Valid top-level descriptors: non-empty strings, non-empty arrays, and
/// objects.
fn arb_descriptor() -> impl Strategy<Value = Value> {
    prop_oneof![
        "[a-zA-Z0-9_/]{1,16}".prop_map(Value::String),
        proptest::collection::vec(arb_json(), 1..4).prop_map(Value::Array),
        proptest::collection::btree_map("[a-z]{1,6}", arb_json(), 0..4)
            .prop_map(|m| Value::Object(m.into_iter().collect())),
    ]
}

/// Recursively shuffle object key insertion order without changing content.
fn reorder_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map
                .iter()
                .map(|(k, v)| (k.clone(), reorder_keys(v)))
                .collect();
            entries.reverse();
            let mut out = Map::new();
            for (k, v) in entries {
                out.insert(k, v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(reorder_keys).collect()),
        other => other.clone(),
    }
}

// ── Properties ───────────────────────────────────────────────────────

proptest! {
    #[test]
    fn construction_never_panics(descriptor in arb_json()) {
        // Valid or not, Path::new must return instead of panicking.
        let _ = Path::new(descriptor);
    }

    #[test]
    fn canonical_is_deterministic(descriptor in arb_descriptor()) {
        let a = Path::new(descriptor.clone()).expect("valid descriptor");
        let b = Path::new(descriptor).expect("valid descriptor");
        prop_assert_eq!(a.canonical(), b.canonical());
        prop_assert_eq!(a.canonical(), a.canonical());
    }

    #[test]
    fn key_order_never_affects_the_key(descriptor in arb_descriptor()) {
        let reordered = reorder_keys(&descriptor);
        let a = Path::new(descriptor).expect("valid descriptor");
        let b = Path::new(reordered).expect("valid descriptor");
        prop_assert_eq!(a.canonical(), b.canonical());
        prop_assert_eq!(a, b);
    }

    #[test]
    fn array_order_affects_the_key(items in proptest::collection::vec(arb_scalar(), 2..5)) {
        let mut reversed = items.clone();
        reversed.reverse();
        prop_assume!(items != reversed);

        let a = Path::new(Value::Array(items)).expect("valid descriptor");
        let b = Path::new(Value::Array(reversed)).expect("valid descriptor");
        prop_assert_ne!(a.canonical(), b.canonical());
    }

    #[test]
    fn canonical_form_is_parseable_json(descriptor in arb_descriptor()) {
        let path = Path::new(descriptor.clone()).expect("valid descriptor");
        let parsed: Value = serde_json::from_str(path.canonical().as_str())
            .expect("canonical form must be valid JSON");
        prop_assert_eq!(parsed, descriptor);
    }

    #[test]
    fn serde_round_trip_preserves_identity(descriptor in arb_descriptor()) {
        let path = Path::new(descriptor).expect("valid descriptor");
        let encoded = serde_json::to_string(&path).expect("serialize");
        let decoded: Path = serde_json::from_str(&encoded).expect("deserialize");
        prop_assert_eq!(&decoded, &path);
        prop_assert_eq!(decoded.canonical(), path.canonical());
    }
}
