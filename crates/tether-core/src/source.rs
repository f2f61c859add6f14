#![forbid(unsafe_code)]

//! Capability traits for the external data source and the host.
//!
//! The engine never constructs observable handles itself: it asks a
//! [`DataSource`] for one per path and treats the handle's subscribe /
//! unsubscribe pair as atomic primitives. Subscription is registration-only —
//! a handle must **not** invoke an observer synchronously from
//! [`ObservableHandle::subscribe`]; current state is read explicitly via
//! [`ObservableHandle::value`] and [`ObservableHandle::error`]. This keeps
//! dispose-then-bind swaps non-reentrant.
//!
//! Observers and host callbacks are compared by identity (the `Rc` pointer),
//! so a subscriber can always be removed with the exact token it registered.

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FetchError, PathError};
use crate::path::Path;

/// A change delivered by an observable handle.
#[derive(Debug)]
pub enum SourceEvent<'a> {
    Value(&'a Value),
    Error(&'a FetchError),
}

/// Identity-carrying observer callback for [`ObservableHandle`].
#[derive(Clone)]
pub struct Observer {
    f: Rc<dyn Fn(&SourceEvent<'_>)>,
}

impl Observer {
    #[must_use]
    pub fn new(f: impl Fn(&SourceEvent<'_>) + 'static) -> Self {
        Self { f: Rc::new(f) }
    }

    pub fn notify(&self, event: &SourceEvent<'_>) {
        (self.f)(event);
    }

    /// Whether two observers are the same registration token.
    #[must_use]
    pub fn same(&self, other: &Observer) -> bool {
        Rc::ptr_eq(&self.f, &other.f)
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Observer(..)")
    }
}

/// Live handle onto one path's value stream, supplied by the data source.
///
/// Repeated [`DataSource::observable`] calls for an equal path may return
/// fresh handles, but their emitted streams must be equivalent.
pub trait ObservableHandle {
    fn path(&self) -> &Path;

    /// Current value, if one has settled.
    fn value(&self) -> Option<Value>;

    /// Current error, if the last fetch failed.
    fn error(&self) -> Option<FetchError>;

    /// Register an observer. Registration only: no synchronous callback.
    fn subscribe(&self, observer: &Observer);

    /// Remove a previously registered observer. Unknown observers are a
    /// no-op.
    fn unsubscribe(&self, observer: &Observer);

    /// Block the initiating call until an initial value or error settles.
    /// Used only by one-shot flows.
    fn wait(&self) -> Result<(), FetchError>;
}

/// One entry of a batch fetch: the requested path plus whichever of data and
/// error the source produced for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResult {
    pub what: Path,
    pub data: Option<Value>,
    pub error: Option<FetchError>,
}

/// The external data source capability.
pub trait DataSource {
    /// Obtain a live handle for `path`. Fails fast on paths the source
    /// cannot serve; no partial setup happens on error.
    fn observable(&self, path: &Path) -> Result<Rc<dyn ObservableHandle>, PathError>;

    /// One-shot batch fetch of the current results for `paths`.
    fn get(&self, paths: &[Path]) -> Vec<FetchResult>;
}

/// Identity-carrying callback for [`ChangeNotifier`].
#[derive(Clone)]
pub struct ChangeCallback {
    f: Rc<dyn Fn()>,
}

impl ChangeCallback {
    #[must_use]
    pub fn new(f: impl Fn() + 'static) -> Self {
        Self { f: Rc::new(f) }
    }

    pub fn invoke(&self) {
        (self.f)();
    }

    #[must_use]
    pub fn same(&self, other: &ChangeCallback) -> bool {
        Rc::ptr_eq(&self.f, &other.f)
    }
}

impl fmt::Debug for ChangeCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ChangeCallback(..)")
    }
}

/// Host capability: "watch my reactive state, call me back on change".
///
/// The engine registers a callback at bind time and deregisters the same
/// token at dispose time.
pub trait ChangeNotifier {
    fn subscribe(&self, callback: &ChangeCallback);
    fn unsubscribe(&self, callback: &ChangeCallback);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observer_identity() {
        let a = Observer::new(|_| {});
        let b = Observer::new(|_| {});
        assert!(a.same(&a.clone()));
        assert!(!a.same(&b));
    }

    #[test]
    fn change_callback_identity() {
        let a = ChangeCallback::new(|| {});
        let clone = a.clone();
        assert!(a.same(&clone));
        assert!(!a.same(&ChangeCallback::new(|| {})));
    }

    #[test]
    fn fetch_result_serde_shape() {
        let result = FetchResult {
            what: Path::ident("session"),
            data: Some(serde_json::json!({ "id": 1 })),
            error: None,
        };
        let value = serde_json::to_value(&result).expect("serialize");
        assert_eq!(value["what"], serde_json::json!("session"));
        assert_eq!(value["data"]["id"], 1);
        assert!(value["error"].is_null());

        let back: FetchResult = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, result);
    }
}
