#![forbid(unsafe_code)]

//! Live-binding and dependency-expansion engine.
//!
//! This crate wires slots to remote observables and keeps them current as
//! the data or the path itself changes, without leaking subscriptions:
//!
//! - [`Binding`]: one observable handle into one slot, with guaranteed
//!   unbind.
//! - [`PathWatcher`] / [`ExpansionWatcher`]: rebind-on-logical-path-change
//!   for computed path expressions, for plain values and whole expansion
//!   trees.
//! - [`ExtractionSchema`] / [`extract_pointers`]: discover embedded
//!   cross-references inside fetched data, with a missing-dependency
//!   fixed-point retry contract.
//! - [`ExpansionHandle`]: the live-query engine — recursive expansion with
//!   differential rebinding and exact teardown.
//! - [`resolve_snapshot`]: the one-shot counterpart for pre-fetched result
//!   sets.
//! - [`PrefetchBinding`]: keep a slot bound to a computed batch of paths.
//! - [`BindingScope`]: per-element registry pairing creation with teardown.

pub mod binding;
pub mod expansion;
pub mod prefetch;
pub mod resolver;
pub mod scope;
pub mod snapshot;
pub mod watcher;

pub use binding::{Binding, BindingId};
pub use expansion::{Expanded, ExpandedElement, ExpandedField, ExpansionHandle, ExpansionSpec};
pub use prefetch::{PrefetchBinding, batch_path};
pub use resolver::{
    Cardinality, Extraction, ExtractionSchema, LookupCtx, PointerList, extract_pointers,
};
pub use scope::BindingScope;
pub use snapshot::{Resolved, ResultSet, resolve_snapshot};
pub use watcher::{ExpansionWatcher, PathWatcher};
