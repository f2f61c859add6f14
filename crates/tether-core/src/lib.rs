#![forbid(unsafe_code)]

//! Core: path descriptors, canonical keys, value/error slots, and the
//! data-source capability seam.

pub mod error;
pub mod path;
pub mod slot;
pub mod source;

pub use error::{FetchError, FetchErrorKind, PathError, SnapshotError};
pub use path::{Path, PathKey, PathSpec};
pub use slot::{Slot, SlotSubscription};
pub use source::{
    ChangeCallback, ChangeNotifier, DataSource, FetchResult, ObservableHandle, Observer,
    SourceEvent,
};
