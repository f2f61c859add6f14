#![forbid(unsafe_code)]

//! Batch prefetch binding.
//!
//! Watches a computed list of paths and keeps one slot bound to the data
//! source's batch observable for `{ "paths": [...] }`. The settled value is
//! a flat array of `{what, data, error}` entries, convertible into a
//! [`ResultSet`](crate::snapshot::ResultSet) for one-shot snapshot
//! resolution.
//!
//! Rebinding follows the same rule as the path watcher: the canonical key of
//! the batch descriptor decides whether anything changed, so a recomputation
//! that merely reorders object keys inside individual paths does not churn
//! the subscription. An empty path list unbinds and clears the slot.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use serde_json::{Value, json};
use tracing::{debug, trace, warn};

use tether_core::{
    ChangeCallback, ChangeNotifier, DataSource, FetchError, Path, PathError, PathKey, Slot,
};

use crate::binding::Binding;

type PathsExpr = Rc<dyn Fn() -> Vec<Path>>;

struct PrefetchInner {
    source: Rc<dyn DataSource>,
    expr: PathsExpr,
    slot: Slot<Value>,
    binding: Option<Binding>,
    last: Option<Option<PathKey>>,
    disposed: bool,
}

/// Keeps a slot bound to the batch results of a computed path list.
pub struct PrefetchBinding {
    inner: Rc<RefCell<PrefetchInner>>,
    notifier: Rc<dyn ChangeNotifier>,
    callback: ChangeCallback,
}

impl PrefetchBinding {
    pub fn bind(
        source: Rc<dyn DataSource>,
        expr: impl Fn() -> Vec<Path> + 'static,
        notifier: Rc<dyn ChangeNotifier>,
        slot: Slot<Value>,
    ) -> Result<Self, PathError> {
        let inner = Rc::new(RefCell::new(PrefetchInner {
            source,
            expr: Rc::new(expr),
            slot,
            binding: None,
            last: None,
            disposed: false,
        }));

        let weak = Rc::downgrade(&inner);
        let callback = ChangeCallback::new(move || Self::reevaluate_weak(&weak));
        notifier.subscribe(&callback);

        let prefetch = Self {
            inner,
            notifier,
            callback,
        };
        if let Err(err) = prefetch.reevaluate() {
            prefetch.notifier.unsubscribe(&prefetch.callback);
            prefetch.inner.borrow_mut().disposed = true;
            return Err(err);
        }
        Ok(prefetch)
    }

    /// Re-run the path list expression and swap the batch binding if its
    /// logical content changed.
    pub fn reevaluate(&self) -> Result<(), PathError> {
        let mut inner = self.inner.borrow_mut();
        if inner.disposed {
            return Ok(());
        }
        Self::apply(&mut inner)
    }

    fn reevaluate_weak(weak: &Weak<RefCell<PrefetchInner>>) {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let mut inner = inner.borrow_mut();
        if inner.disposed {
            return;
        }
        if let Err(err) = Self::apply(&mut inner) {
            warn!(%err, "prefetch path recomputation failed");
            inner
                .slot
                .set_error(Some(FetchError::invalid_path(err.to_string())));
        }
    }

    fn apply(inner: &mut PrefetchInner) -> Result<(), PathError> {
        let paths = (inner.expr)();
        let batch = if paths.is_empty() {
            None
        } else {
            Some(batch_path(&paths)?)
        };
        let new_key = batch.as_ref().map(|p| p.canonical().clone());

        if inner.last.as_ref() == Some(&new_key) {
            trace!("prefetch recompute suppressed: canonical key unchanged");
            return Ok(());
        }

        if let Some(old) = inner.binding.take() {
            old.dispose();
            inner.slot.clear();
        }
        if let Some(batch) = batch {
            let handle = inner.source.observable(&batch)?;
            inner.binding = Some(Binding::bind(handle, inner.slot.clone()));
            debug!(paths = paths.len(), "prefetch rebound");
        }
        inner.last = Some(new_key);
        Ok(())
    }

    /// Deregister from the notifier and dispose the batch binding.
    /// Idempotent.
    pub fn dispose(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.disposed {
            return;
        }
        inner.disposed = true;
        if let Some(binding) = inner.binding.take() {
            binding.dispose();
        }
        drop(inner);
        self.notifier.unsubscribe(&self.callback);
        trace!("prefetch disposed");
    }
}

impl Drop for PrefetchBinding {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Batch descriptor for a set of member paths.
pub fn batch_path(paths: &[Path]) -> Result<Path, PathError> {
    let descriptors: Vec<Value> = paths.iter().map(|p| p.descriptor().clone()).collect();
    Path::new(json!({ "paths": descriptors }))
}
