#![forbid(unsafe_code)]

//! Dynamic path watcher: rebind a slot when a computed path expression
//! changes *logically*.
//!
//! The expression is re-evaluated on every host change notification, but the
//! underlying binding is only swapped when the new path's canonical key
//! differs from the last one. The equality check is mandatory, not an
//! optimization: the host recomputes on unrelated state changes, and naive
//! rebinding would destroy and recreate the subscription each time.
//!
//! Swap order on a real change: dispose the old binding, clear both slot
//! sides, then bind the new path (if present). Stale data must not remain
//! visible under a now-unrelated path.
//!
//! [`ExpansionWatcher`] applies the same state machine to a whole expansion
//! tree: the computed path plus its specs are swapped as one unit.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use serde_json::Value;
use tracing::{debug, trace, warn};

use tether_core::{
    ChangeCallback, ChangeNotifier, DataSource, FetchError, Path, PathError, PathKey, Slot,
};

use crate::binding::Binding;
use crate::expansion::{Expanded, ExpansionHandle, ExpansionSpec};

type PathExpr = Rc<dyn Fn() -> Option<Path>>;

struct WatcherInner {
    source: Rc<dyn DataSource>,
    expr: PathExpr,
    slot: Slot<Value>,
    binding: Option<Binding>,
    /// Outer `None` until the first evaluation; inner `None` when the last
    /// evaluation produced no path.
    last: Option<Option<PathKey>>,
    disposed: bool,
}

/// Watches a computed path expression and keeps one slot bound to it.
pub struct PathWatcher {
    inner: Rc<RefCell<WatcherInner>>,
    notifier: Rc<dyn ChangeNotifier>,
    callback: ChangeCallback,
}

impl PathWatcher {
    /// Evaluate the expression once, bind the initial path, and register
    /// with the host notifier for re-evaluation.
    ///
    /// A [`PathError`] from the initial evaluation aborts the whole setup:
    /// the notifier registration is rolled back and no binding exists.
    pub fn bind(
        source: Rc<dyn DataSource>,
        expr: impl Fn() -> Option<Path> + 'static,
        notifier: Rc<dyn ChangeNotifier>,
        slot: Slot<Value>,
    ) -> Result<Self, PathError> {
        let inner = Rc::new(RefCell::new(WatcherInner {
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

        let watcher = Self {
            inner,
            notifier,
            callback,
        };
        if let Err(err) = watcher.reevaluate() {
            watcher.notifier.unsubscribe(&watcher.callback);
            watcher.inner.borrow_mut().disposed = true;
            return Err(err);
        }
        Ok(watcher)
    }

    /// Re-run the expression and swap the binding if the logical path
    /// changed. Public so hosts without a notifier can poke directly.
    pub fn reevaluate(&self) -> Result<(), PathError> {
        let mut inner = self.inner.borrow_mut();
        if inner.disposed {
            return Ok(());
        }
        Self::apply(&mut inner)
    }

    fn reevaluate_weak(weak: &Weak<RefCell<WatcherInner>>) {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let mut inner = inner.borrow_mut();
        if inner.disposed {
            return;
        }
        // A notification-time failure has no caller to surface to; report it
        // on the slot's error side instead.
        if let Err(err) = Self::apply(&mut inner) {
            warn!(%err, "path recomputation failed");
            inner
                .slot
                .set_error(Some(FetchError::invalid_path(err.to_string())));
        }
    }

    fn apply(inner: &mut WatcherInner) -> Result<(), PathError> {
        let new_path = (inner.expr)();
        let new_key = new_path.as_ref().map(|p| p.canonical().clone());

        if inner.last.as_ref() == Some(&new_key) {
            trace!("path recompute suppressed: canonical key unchanged");
            return Ok(());
        }

        if let Some(old) = inner.binding.take() {
            old.dispose();
            inner.slot.clear();
        }
        if let Some(path) = new_path {
            let handle = inner.source.observable(&path)?;
            inner.binding = Some(Binding::bind(handle, inner.slot.clone()));
            debug!(path = %path, "rebound to new path");
        }
        inner.last = Some(new_key);
        Ok(())
    }

    /// Identity of the current binding, if one is active.
    #[must_use]
    pub fn binding_id(&self) -> Option<crate::binding::BindingId> {
        self.inner.borrow().binding.as_ref().map(Binding::id)
    }

    /// Deregister from the notifier and dispose the binding. Idempotent.
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
        trace!("path watcher disposed");
    }
}

impl Drop for PathWatcher {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for PathWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("PathWatcher")
            .field("bound", &inner.binding.is_some())
            .field("disposed", &inner.disposed)
            .finish()
    }
}

struct ExpansionWatcherInner {
    source: Rc<dyn DataSource>,
    expr: PathExpr,
    specs: Rc<[ExpansionSpec]>,
    dest: Slot<Expanded>,
    handle: Option<ExpansionHandle>,
    last: Option<Option<PathKey>>,
    disposed: bool,
}

/// The expansion counterpart of [`PathWatcher`]: a computed root path plus
/// an expansion tree, swapped as one unit when the path logically changes.
///
/// Same suppression rule: an equal canonical key leaves the whole expansion
/// subtree untouched.
pub struct ExpansionWatcher {
    inner: Rc<RefCell<ExpansionWatcherInner>>,
    notifier: Rc<dyn ChangeNotifier>,
    callback: ChangeCallback,
}

impl ExpansionWatcher {
    pub fn bind(
        source: Rc<dyn DataSource>,
        expr: impl Fn() -> Option<Path> + 'static,
        specs: Vec<ExpansionSpec>,
        notifier: Rc<dyn ChangeNotifier>,
        dest: Slot<Expanded>,
    ) -> Result<Self, PathError> {
        let inner = Rc::new(RefCell::new(ExpansionWatcherInner {
            source,
            expr: Rc::new(expr),
            specs: specs.into(),
            dest,
            handle: None,
            last: None,
            disposed: false,
        }));

        let weak = Rc::downgrade(&inner);
        let callback = ChangeCallback::new(move || Self::reevaluate_weak(&weak));
        notifier.subscribe(&callback);

        let watcher = Self {
            inner,
            notifier,
            callback,
        };
        if let Err(err) = watcher.reevaluate() {
            watcher.notifier.unsubscribe(&watcher.callback);
            watcher.inner.borrow_mut().disposed = true;
            return Err(err);
        }
        Ok(watcher)
    }

    pub fn reevaluate(&self) -> Result<(), PathError> {
        let mut inner = self.inner.borrow_mut();
        if inner.disposed {
            return Ok(());
        }
        Self::apply(&mut inner)
    }

    fn reevaluate_weak(weak: &Weak<RefCell<ExpansionWatcherInner>>) {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let mut inner = inner.borrow_mut();
        if inner.disposed {
            return;
        }
        if let Err(err) = Self::apply(&mut inner) {
            warn!(%err, "expansion path recomputation failed");
            inner
                .dest
                .set_error(Some(FetchError::invalid_path(err.to_string())));
        }
    }

    fn apply(inner: &mut ExpansionWatcherInner) -> Result<(), PathError> {
        let new_path = (inner.expr)();
        let new_key = new_path.as_ref().map(|p| p.canonical().clone());

        if inner.last.as_ref() == Some(&new_key) {
            trace!("expansion path recompute suppressed: canonical key unchanged");
            return Ok(());
        }

        if let Some(old) = inner.handle.take() {
            old.dispose();
            inner.dest.clear();
        }
        if let Some(path) = new_path {
            inner.handle = Some(ExpansionHandle::bind_shared(
                Rc::clone(&inner.source),
                &path,
                Rc::clone(&inner.specs),
                inner.dest.clone(),
            )?);
            debug!(path = %path, "expansion rebound to new root");
        }
        inner.last = Some(new_key);
        Ok(())
    }

    /// Dispose the current expansion subtree and deregister. Idempotent.
    pub fn dispose(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.disposed {
            return;
        }
        inner.disposed = true;
        if let Some(handle) = inner.handle.take() {
            handle.dispose();
        }
        drop(inner);
        self.notifier.unsubscribe(&self.callback);
        trace!("expansion watcher disposed");
    }
}

impl Drop for ExpansionWatcher {
    fn drop(&mut self) {
        self.dispose();
    }
}
