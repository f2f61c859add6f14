#![forbid(unsafe_code)]

//! A named registry of live bindings for one host element.
//!
//! Covers the create/teardown lifecycle pairing: the host declares a map of
//! destination names to paths at creation time and disposes the whole scope
//! at teardown. Rebinding a name disposes the previous member first.

use std::rc::Rc;

use ahash::AHashMap;
use serde_json::Value;
use tracing::trace;

use tether_core::{ChangeNotifier, DataSource, Path, PathError, PathSpec, Slot};

use crate::binding::Binding;
use crate::expansion::{Expanded, ExpansionHandle, ExpansionSpec};
use crate::watcher::PathWatcher;

enum Member {
    Constant { binding: Binding, slot: Slot<Value> },
    Computed { watcher: PathWatcher, slot: Slot<Value> },
    Expanded { handle: ExpansionHandle, slot: Slot<Expanded> },
}

impl Member {
    fn dispose(self) {
        match self {
            Self::Constant { binding, .. } => binding.dispose(),
            Self::Computed { watcher, .. } => watcher.dispose(),
            Self::Expanded { handle, .. } => handle.dispose(),
        }
    }
}

/// Owns every binding a host element declared, keyed by destination name.
pub struct BindingScope {
    source: Rc<dyn DataSource>,
    notifier: Rc<dyn ChangeNotifier>,
    members: AHashMap<String, Member>,
    disposed: bool,
}

impl BindingScope {
    #[must_use]
    pub fn new(source: Rc<dyn DataSource>, notifier: Rc<dyn ChangeNotifier>) -> Self {
        Self {
            source,
            notifier,
            members: AHashMap::new(),
            disposed: false,
        }
    }

    /// Bind `name` to a fixed path. Replaces (dispose-then-bind) any prior
    /// member under the same name.
    pub fn bind_constant(
        &mut self,
        name: impl Into<String>,
        path: &Path,
    ) -> Result<Slot<Value>, PathError> {
        let name = name.into();
        self.remove(&name);
        let slot = Slot::new();
        let handle = self.source.observable(path)?;
        let binding = Binding::bind(handle, slot.clone());
        self.members.insert(
            name,
            Member::Constant {
                binding,
                slot: slot.clone(),
            },
        );
        Ok(slot)
    }

    /// Bind `name` to a computed path expression re-evaluated on host
    /// change notifications.
    pub fn bind_computed(
        &mut self,
        name: impl Into<String>,
        expr: impl Fn() -> Option<Path> + 'static,
    ) -> Result<Slot<Value>, PathError> {
        let name = name.into();
        self.remove(&name);
        let slot = Slot::new();
        let watcher = PathWatcher::bind(
            Rc::clone(&self.source),
            expr,
            Rc::clone(&self.notifier),
            slot.clone(),
        )?;
        self.members.insert(
            name,
            Member::Computed {
                watcher,
                slot: slot.clone(),
            },
        );
        Ok(slot)
    }

    /// Bind `name` per a [`PathSpec`], dispatching once at setup.
    pub fn bind_spec(
        &mut self,
        name: impl Into<String>,
        spec: PathSpec,
    ) -> Result<Slot<Value>, PathError> {
        match spec {
            PathSpec::Constant(path) => self.bind_constant(name, &path),
            PathSpec::Computed(expr) => self.bind_computed(name, move || expr()),
        }
    }

    /// Bind `name` to an expansion of `path` per `specs`.
    pub fn bind_expanded(
        &mut self,
        name: impl Into<String>,
        path: &Path,
        specs: Vec<ExpansionSpec>,
    ) -> Result<Slot<Expanded>, PathError> {
        let name = name.into();
        self.remove(&name);
        let slot = Slot::new();
        let handle = ExpansionHandle::bind(Rc::clone(&self.source), path, specs, slot.clone())?;
        self.members.insert(
            name,
            Member::Expanded {
                handle,
                slot: slot.clone(),
            },
        );
        Ok(slot)
    }

    /// The value slot bound under `name`, if it is a plain binding.
    #[must_use]
    pub fn slot(&self, name: &str) -> Option<Slot<Value>> {
        match self.members.get(name) {
            Some(Member::Constant { slot, .. } | Member::Computed { slot, .. }) => {
                Some(slot.clone())
            }
            _ => None,
        }
    }

    /// The expanded slot bound under `name`, if it is an expansion.
    #[must_use]
    pub fn expanded_slot(&self, name: &str) -> Option<Slot<Expanded>> {
        match self.members.get(name) {
            Some(Member::Expanded { slot, .. }) => Some(slot.clone()),
            _ => None,
        }
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.members.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Unbind one member. No-op for unknown names.
    pub fn remove(&mut self, name: &str) {
        if let Some(member) = self.members.remove(name) {
            member.dispose();
        }
    }

    /// Tear down every member. Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        for (_, member) in self.members.drain() {
            member.dispose();
        }
        trace!("binding scope disposed");
    }
}

impl Drop for BindingScope {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for BindingScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingScope")
            .field("members", &self.members.len())
            .field("disposed", &self.disposed)
            .finish()
    }
}
