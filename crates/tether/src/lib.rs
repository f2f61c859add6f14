#![forbid(unsafe_code)]

//! Tether public facade crate.
//!
//! This crate provides the stable, ergonomic surface area for users.

pub mod prelude {
    pub use tether_core as core;
    pub use tether_engine as engine;

    pub use tether_core::{
        DataSource, FetchError, FetchResult, ObservableHandle, Path, PathKey, PathSpec, Slot,
    };
    pub use tether_engine::{
        Binding, BindingScope, Expanded, ExpansionHandle, ExpansionSpec, ExtractionSchema,
        PathWatcher, ResultSet, resolve_snapshot,
    };
}
