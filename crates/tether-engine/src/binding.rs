#![forbid(unsafe_code)]

//! Property binding: one observable handle wired into one slot.
//!
//! # Invariants
//!
//! 1. Writes happen only while the binding is active: disposal removes the
//!    observer synchronously and drops an in-flight guard before returning,
//!    so a notification already queued by the source can never mutate the
//!    destination afterwards.
//! 2. `dispose()` is idempotent; dropping the binding disposes it.
//! 3. At most one live binding may target a slot. Callers swap with
//!    dispose-then-bind, never bind-then-dispose, so the old value is gone
//!    before the new subscription can write.
//!
//! The handle's current value and error are pushed into the slot at bind
//! time; after that every source event is forwarded as it arrives. A value
//! event clears the error side (the fetch evidently succeeded); an error
//! event leaves the last value in place so consumers can degrade gracefully.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tracing::trace;

use tether_core::{ObservableHandle, Observer, PathKey, Slot, SourceEvent};

static NEXT_BINDING_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a binding, stable for its whole lifetime. Used by callers
/// that need to assert a binding survived a rebind decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingId(u64);

/// An active association between one observable handle and one slot.
pub struct Binding {
    id: BindingId,
    handle: Rc<dyn ObservableHandle>,
    observer: Observer,
    slot: Slot<Value>,
    active: Rc<Cell<bool>>,
    disposed: Cell<bool>,
    key: PathKey,
}

impl Binding {
    /// Subscribe `handle` and start forwarding its stream into `slot`.
    #[must_use]
    pub fn bind(handle: Rc<dyn ObservableHandle>, slot: Slot<Value>) -> Self {
        let id = BindingId(NEXT_BINDING_ID.fetch_add(1, Ordering::Relaxed));
        let key = handle.path().canonical().clone();
        let active = Rc::new(Cell::new(true));

        let observer = {
            let slot = slot.clone();
            let active = Rc::clone(&active);
            Observer::new(move |event| {
                if !active.get() {
                    return;
                }
                match event {
                    SourceEvent::Value(value) => slot.publish(Some((*value).clone()), None),
                    SourceEvent::Error(error) => slot.set_error(Some((*error).clone())),
                }
            })
        };
        handle.subscribe(&observer);

        // Push the handle's settled state so the slot is current from the
        // first moment of the binding's life.
        match (handle.value(), handle.error()) {
            (value, Some(error)) => {
                if let Some(value) = value {
                    slot.set_value(Some(value));
                }
                slot.set_error(Some(error));
            }
            (Some(value), None) => slot.publish(Some(value), None),
            (None, None) => {}
        }

        trace!(path = %key, binding = id.0, "property bound");
        Self {
            id,
            handle,
            observer,
            slot,
            active,
            disposed: Cell::new(false),
            key,
        }
    }

    #[must_use]
    pub fn id(&self) -> BindingId {
        self.id
    }

    /// Canonical key of the path this binding was created from.
    #[must_use]
    pub fn path_key(&self) -> &PathKey {
        &self.key
    }

    #[must_use]
    pub fn slot(&self) -> &Slot<Value> {
        &self.slot
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    /// Unsubscribe and deactivate. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        self.active.set(false);
        self.handle.unsubscribe(&self.observer);
        trace!(path = %self.key, binding = self.id.0, "property unbound");
    }
}

impl Drop for Binding {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("id", &self.id)
            .field("path", &self.key)
            .field("disposed", &self.disposed.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tether_core::{DataSource, FetchError, Path};
    use tether_harness::MemorySource;

    #[test]
    fn bind_pushes_current_value() {
        let source = MemorySource::new();
        let path = Path::ident("session");
        source.emit(&path, json!({ "user": 1 }));

        let slot = Slot::new();
        let handle = source.observable(&path).expect("handle");
        let binding = Binding::bind(handle, slot.clone());

        assert_eq!(slot.get(), Some(json!({ "user": 1 })));
        assert!(!binding.is_disposed());
    }

    #[test]
    fn forwards_later_emissions() {
        let source = MemorySource::new();
        let path = Path::ident("counter");

        let slot = Slot::new();
        let _binding = Binding::bind(source.observable(&path).expect("handle"), slot.clone());
        assert_eq!(slot.get(), None);

        source.emit(&path, json!(1));
        assert_eq!(slot.get(), Some(json!(1)));

        source.emit(&path, json!(2));
        assert_eq!(slot.get(), Some(json!(2)));
    }

    #[test]
    fn error_lands_on_error_side_and_value_clears_it() {
        let source = MemorySource::new();
        let path = Path::ident("flaky");

        let slot = Slot::new();
        let _binding = Binding::bind(source.observable(&path).expect("handle"), slot.clone());

        source.fail(&path, FetchError::not_found("nothing here"));
        assert!(slot.error().is_some());

        source.emit(&path, json!("recovered"));
        assert_eq!(slot.get(), Some(json!("recovered")));
        assert!(slot.error().is_none(), "value event clears the error side");
    }

    #[test]
    fn dispose_stops_writes_and_is_idempotent() {
        let source = MemorySource::new();
        let path = Path::ident("stream");

        let slot = Slot::new();
        let binding = Binding::bind(source.observable(&path).expect("handle"), slot.clone());

        source.emit(&path, json!(1));
        binding.dispose();
        binding.dispose();
        assert!(binding.is_disposed());

        source.emit(&path, json!(2));
        assert_eq!(slot.get(), Some(json!(1)), "no writes after dispose");
        assert_eq!(source.stats(&path).active(), 0);
    }

    #[test]
    fn drop_unsubscribes() {
        let source = MemorySource::new();
        let path = Path::ident("stream");
        {
            let slot = Slot::new();
            let _binding = Binding::bind(source.observable(&path).expect("handle"), slot);
            assert_eq!(source.stats(&path).active(), 1);
        }
        assert_eq!(source.stats(&path).active(), 0);
    }

    #[test]
    fn binding_ids_are_distinct() {
        let source = MemorySource::new();
        let path = Path::ident("a");
        let a = Binding::bind(source.observable(&path).expect("handle"), Slot::new());
        let b = Binding::bind(source.observable(&path).expect("handle"), Slot::new());
        assert_ne!(a.id(), b.id());
    }
}
