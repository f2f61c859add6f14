#![forbid(unsafe_code)]

//! Test infrastructure: a deterministic, fully scripted in-memory data
//! source plus a manually-fired host notifier.
//!
//! [`MemorySource`] implements the [`DataSource`] capability over a map of
//! scripted entries. Tests drive it with [`MemorySource::emit`] and
//! [`MemorySource::fail`] and assert subscription hygiene through
//! per-path [`SubscriptionStats`] counters. Batch descriptors of the form
//! `{ "paths": [...] }` get a live handle whose value is the flat array of
//! member results, re-emitted whenever a member changes.
//!
//! Everything is single-threaded and synchronous: notifications are
//! delivered in registration order before the driving call returns, and the
//! observer list is snapshotted before delivery so callbacks may subscribe
//! or unsubscribe freely.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;
use serde_json::{Value, json};

use tether_core::{
    ChangeCallback, ChangeNotifier, DataSource, FetchError, FetchResult, ObservableHandle,
    Observer, Path, PathError, PathKey, SourceEvent,
};

/// Per-path subscribe/unsubscribe counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionStats {
    pub subscribes: u64,
    pub unsubscribes: u64,
}

impl SubscriptionStats {
    /// Currently registered observers.
    #[must_use]
    pub fn active(&self) -> u64 {
        self.subscribes.saturating_sub(self.unsubscribes)
    }
}

#[derive(Default)]
struct Entry {
    value: Option<Value>,
    error: Option<FetchError>,
    observers: Vec<Observer>,
}

struct BatchEntry {
    members: Vec<Path>,
    member_keys: Vec<PathKey>,
    observers: Vec<Observer>,
}

#[derive(Default)]
struct SourceInner {
    entries: AHashMap<PathKey, Entry>,
    batches: AHashMap<PathKey, BatchEntry>,
    stats: AHashMap<PathKey, SubscriptionStats>,
}

impl SourceInner {
    fn result_for(&self, path: &Path) -> FetchResult {
        match self.entries.get(path.canonical()) {
            Some(entry) => FetchResult {
                what: path.clone(),
                data: entry.value.clone(),
                error: entry.error.clone(),
            },
            None => FetchResult {
                what: path.clone(),
                data: None,
                error: Some(FetchError::not_found(format!(
                    "no data scripted for {}",
                    path.canonical()
                ))),
            },
        }
    }

    fn batch_value(&self, batch: &BatchEntry) -> Value {
        let results: Vec<Value> = batch
            .members
            .iter()
            .map(|path| {
                let (data, error) = match self.entries.get(path.canonical()) {
                    Some(entry) => (entry.value.clone(), entry.error.clone()),
                    None => (None, None),
                };
                json!({ "what": path.descriptor(), "data": data, "error": error })
            })
            .collect();
        Value::Array(results)
    }

    fn record_subscribe(&mut self, key: &PathKey) {
        self.stats.entry(key.clone()).or_default().subscribes += 1;
    }

    fn record_unsubscribe(&mut self, key: &PathKey) {
        self.stats.entry(key.clone()).or_default().unsubscribes += 1;
    }
}

/// Scripted in-memory data source.
///
/// Cloning shares the underlying store, and every handle for an equal path
/// reads and notifies through the same entry, so repeated
/// [`DataSource::observable`] calls yield equivalent value streams.
#[derive(Clone, Default)]
pub struct MemorySource {
    inner: Rc<RefCell<SourceInner>>,
}

impl MemorySource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script (or update) the value at `path` and notify its observers and
    /// every batch containing it.
    pub fn emit(&self, path: &Path, value: Value) {
        let (observers, batch_notifies) = {
            let mut inner = self.inner.borrow_mut();
            let key = path.canonical().clone();
            let entry = inner.entries.entry(key.clone()).or_default();
            entry.value = Some(value.clone());
            entry.error = None;
            let observers = entry.observers.clone();
            let inner = &*inner;
            let batch_notifies: Vec<(Vec<Observer>, Value)> = inner
                .batches
                .values()
                .filter(|b| b.member_keys.contains(&key))
                .map(|b| (b.observers.clone(), inner.batch_value(b)))
                .collect();
            (observers, batch_notifies)
        };
        for observer in observers {
            observer.notify(&SourceEvent::Value(&value));
        }
        for (observers, batch_value) in batch_notifies {
            for observer in observers {
                observer.notify(&SourceEvent::Value(&batch_value));
            }
        }
    }

    /// Script a fetch failure at `path`. The last value stays in place.
    pub fn fail(&self, path: &Path, error: FetchError) {
        let (observers, batch_notifies) = {
            let mut inner = self.inner.borrow_mut();
            let key = path.canonical().clone();
            let entry = inner.entries.entry(key.clone()).or_default();
            entry.error = Some(error.clone());
            let observers = entry.observers.clone();
            let inner = &*inner;
            let batch_notifies: Vec<(Vec<Observer>, Value)> = inner
                .batches
                .values()
                .filter(|b| b.member_keys.contains(&key))
                .map(|b| (b.observers.clone(), inner.batch_value(b)))
                .collect();
            (observers, batch_notifies)
        };
        for observer in observers {
            observer.notify(&SourceEvent::Error(&error));
        }
        for (observers, batch_value) in batch_notifies {
            for observer in observers {
                observer.notify(&SourceEvent::Value(&batch_value));
            }
        }
    }

    /// Subscribe/unsubscribe counters for `path` (zero if never observed).
    #[must_use]
    pub fn stats(&self, path: &Path) -> SubscriptionStats {
        self.inner
            .borrow()
            .stats
            .get(path.canonical())
            .copied()
            .unwrap_or_default()
    }
}

impl DataSource for MemorySource {
    fn observable(&self, path: &Path) -> Result<Rc<dyn ObservableHandle>, PathError> {
        // Batch descriptor: an object whose "paths" field lists members.
        if let Some(Value::Array(items)) = path.descriptor().get("paths") {
            let members: Vec<Path> = items
                .iter()
                .map(|item| Path::new(item.clone()))
                .collect::<Result<_, _>>()?;
            let key = path.canonical().clone();
            {
                let mut inner = self.inner.borrow_mut();
                inner.batches.entry(key.clone()).or_insert_with(|| BatchEntry {
                    member_keys: members.iter().map(|p| p.canonical().clone()).collect(),
                    members: members.clone(),
                    observers: Vec::new(),
                });
            }
            return Ok(Rc::new(BatchHandle {
                inner: Rc::clone(&self.inner),
                path: path.clone(),
                key,
            }));
        }

        let key = path.canonical().clone();
        self.inner.borrow_mut().entries.entry(key.clone()).or_default();
        Ok(Rc::new(EntryHandle {
            inner: Rc::clone(&self.inner),
            path: path.clone(),
            key,
        }))
    }

    fn get(&self, paths: &[Path]) -> Vec<FetchResult> {
        let inner = self.inner.borrow();
        paths.iter().map(|path| inner.result_for(path)).collect()
    }
}

struct EntryHandle {
    inner: Rc<RefCell<SourceInner>>,
    path: Path,
    key: PathKey,
}

impl ObservableHandle for EntryHandle {
    fn path(&self) -> &Path {
        &self.path
    }

    fn value(&self) -> Option<Value> {
        self.inner
            .borrow()
            .entries
            .get(&self.key)
            .and_then(|e| e.value.clone())
    }

    fn error(&self) -> Option<FetchError> {
        self.inner
            .borrow()
            .entries
            .get(&self.key)
            .and_then(|e| e.error.clone())
    }

    fn subscribe(&self, observer: &Observer) {
        let mut inner = self.inner.borrow_mut();
        inner
            .entries
            .entry(self.key.clone())
            .or_default()
            .observers
            .push(observer.clone());
        inner.record_subscribe(&self.key);
    }

    fn unsubscribe(&self, observer: &Observer) {
        let mut inner = self.inner.borrow_mut();
        let removed = inner.entries.get_mut(&self.key).is_some_and(|entry| {
            match entry.observers.iter().position(|o| o.same(observer)) {
                Some(pos) => {
                    entry.observers.remove(pos);
                    true
                }
                None => false,
            }
        });
        if removed {
            inner.record_unsubscribe(&self.key);
        }
    }

    fn wait(&self) -> Result<(), FetchError> {
        let inner = self.inner.borrow();
        let entry = inner.entries.get(&self.key);
        if let Some(error) = entry.and_then(|e| e.error.clone()) {
            return Err(error);
        }
        if entry.is_some_and(|e| e.value.is_some()) {
            return Ok(());
        }
        // Single-threaded harness: nothing will settle the value while we
        // block, so report instead of deadlocking.
        Err(FetchError::unavailable(format!(
            "{} has not settled",
            self.key
        )))
    }
}

struct BatchHandle {
    inner: Rc<RefCell<SourceInner>>,
    path: Path,
    key: PathKey,
}

impl ObservableHandle for BatchHandle {
    fn path(&self) -> &Path {
        &self.path
    }

    fn value(&self) -> Option<Value> {
        let inner = self.inner.borrow();
        inner.batches.get(&self.key).map(|b| inner.batch_value(b))
    }

    fn error(&self) -> Option<FetchError> {
        None
    }

    fn subscribe(&self, observer: &Observer) {
        let mut inner = self.inner.borrow_mut();
        if let Some(batch) = inner.batches.get_mut(&self.key) {
            batch.observers.push(observer.clone());
        }
        inner.record_subscribe(&self.key);
    }

    fn unsubscribe(&self, observer: &Observer) {
        let mut inner = self.inner.borrow_mut();
        let removed = inner.batches.get_mut(&self.key).is_some_and(|batch| {
            match batch.observers.iter().position(|o| o.same(observer)) {
                Some(pos) => {
                    batch.observers.remove(pos);
                    true
                }
                None => false,
            }
        });
        if removed {
            inner.record_unsubscribe(&self.key);
        }
    }

    fn wait(&self) -> Result<(), FetchError> {
        Ok(())
    }
}

/// Manually fired [`ChangeNotifier`] standing in for the host's reactive
/// recomputation.
#[derive(Default)]
pub struct ManualNotifier {
    listeners: RefCell<Vec<ChangeCallback>>,
}

impl ManualNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver one change notification to every registered callback.
    pub fn fire(&self) {
        let listeners = self.listeners.borrow().clone();
        for listener in listeners {
            listener.invoke();
        }
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }
}

impl ChangeNotifier for ManualNotifier {
    fn subscribe(&self, callback: &ChangeCallback) {
        self.listeners.borrow_mut().push(callback.clone());
    }

    fn unsubscribe(&self, callback: &ChangeCallback) {
        let mut listeners = self.listeners.borrow_mut();
        if let Some(pos) = listeners.iter().position(|c| c.same(callback)) {
            listeners.remove(pos);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn handles_share_one_entry_per_key() {
        let source = MemorySource::new();
        let a = Path::new(json!({ "what": "user", "id": 1 })).expect("valid");
        let b = Path::new(json!({ "id": 1, "what": "user" })).expect("valid");

        let ha = source.observable(&a).expect("handle");
        let hb = source.observable(&b).expect("handle");

        source.emit(&a, json!("shared"));
        assert_eq!(ha.value(), Some(json!("shared")));
        assert_eq!(hb.value(), Some(json!("shared")), "logically equal paths share data");
    }

    #[test]
    fn emit_notifies_in_registration_order() {
        let source = MemorySource::new();
        let path = Path::ident("x");
        let handle = source.observable(&path).expect("handle");

        let order = Rc::new(RefCell::new(Vec::new()));
        let o1 = Rc::clone(&order);
        let first = Observer::new(move |_| o1.borrow_mut().push(1));
        let o2 = Rc::clone(&order);
        let second = Observer::new(move |_| o2.borrow_mut().push(2));
        handle.subscribe(&first);
        handle.subscribe(&second);

        source.emit(&path, json!(0));
        assert_eq!(*order.borrow(), vec![1, 2]);
    }

    #[test]
    fn unsubscribe_stops_delivery_and_counts() {
        let source = MemorySource::new();
        let path = Path::ident("x");
        let handle = source.observable(&path).expect("handle");

        let fired = Rc::new(Cell::new(0u32));
        let f = Rc::clone(&fired);
        let observer = Observer::new(move |_| f.set(f.get() + 1));
        handle.subscribe(&observer);
        source.emit(&path, json!(1));
        assert_eq!(fired.get(), 1);

        handle.unsubscribe(&observer);
        source.emit(&path, json!(2));
        assert_eq!(fired.get(), 1);

        let stats = source.stats(&path);
        assert_eq!(stats.subscribes, 1);
        assert_eq!(stats.unsubscribes, 1);
        assert_eq!(stats.active(), 0);

        // Unknown observers are a no-op, not a double-count.
        handle.unsubscribe(&observer);
        assert_eq!(source.stats(&path).unsubscribes, 1);
    }

    #[test]
    fn fail_keeps_last_value() {
        let source = MemorySource::new();
        let path = Path::ident("x");
        let handle = source.observable(&path).expect("handle");

        source.emit(&path, json!(1));
        source.fail(&path, FetchError::not_found("gone"));
        assert_eq!(handle.value(), Some(json!(1)));
        assert!(handle.error().is_some());
    }

    #[test]
    fn wait_reflects_settled_state() {
        let source = MemorySource::new();
        let unsettled = Path::ident("pending");
        let handle = source.observable(&unsettled).expect("handle");
        assert!(handle.wait().is_err());

        source.emit(&unsettled, json!(1));
        assert!(handle.wait().is_ok());

        let failed = Path::ident("broken");
        let handle = source.observable(&failed).expect("handle");
        source.fail(&failed, FetchError::not_found("nope"));
        assert!(handle.wait().is_err());
    }

    #[test]
    fn batch_handle_tracks_member_changes() {
        let source = MemorySource::new();
        let a = Path::ident("a");
        let b = Path::ident("b");
        source.emit(&a, json!(1));

        let batch = Path::new(json!({ "paths": ["a", "b"] })).expect("valid");
        let handle = source.observable(&batch).expect("handle");

        let value = handle.value().expect("batch value");
        assert_eq!(value[0]["data"], json!(1));
        assert!(value[1]["data"].is_null());

        let seen = Rc::new(RefCell::new(None));
        let s = Rc::clone(&seen);
        let observer = Observer::new(move |event| {
            if let SourceEvent::Value(v) = event {
                *s.borrow_mut() = Some((*v).clone());
            }
        });
        handle.subscribe(&observer);

        source.emit(&b, json!(2));
        let latest = seen.borrow().clone().expect("batch re-emitted");
        assert_eq!(latest[1]["data"], json!(2));
    }

    #[test]
    fn batch_rejects_malformed_members() {
        let source = MemorySource::new();
        let batch = Path::new(json!({ "paths": [42] })).expect("valid descriptor");
        assert!(source.observable(&batch).is_err());
    }

    #[test]
    fn get_reports_unknown_paths_as_not_found() {
        let source = MemorySource::new();
        let known = Path::ident("known");
        source.emit(&known, json!(1));

        let results = source.get(&[known.clone(), Path::ident("unknown")]);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].data, Some(json!(1)));
        assert!(results[0].error.is_none());
        assert!(results[1].data.is_none());
        assert!(results[1].error.is_some());
    }

    #[test]
    fn notifier_fires_and_deregisters() {
        let notifier = ManualNotifier::new();
        let fired = Rc::new(Cell::new(0u32));
        let f = Rc::clone(&fired);
        let callback = ChangeCallback::new(move || f.set(f.get() + 1));

        notifier.subscribe(&callback);
        notifier.fire();
        assert_eq!(fired.get(), 1);
        assert_eq!(notifier.listener_count(), 1);

        notifier.unsubscribe(&callback);
        notifier.fire();
        assert_eq!(fired.get(), 1);
        assert_eq!(notifier.listener_count(), 0);
    }
}
