#![forbid(unsafe_code)]

//! The live-query engine: bind a root path plus a tree of expansion specs,
//! producing an object graph whose designated fields hold live sub-results.
//!
//! # Design
//!
//! A bound node owns a staging slot wired to the root observable. Every
//! emission is wrapped: each element of the root value (one element for an
//! object root, one per item for a list root) gets its pointers extracted per
//! [`ExpansionSpec`], each referenced path is recursively bound the same way,
//! and the wrapped [`Expanded`] value — never the raw root value — is what
//! lands in the destination slot.
//!
//! Bookkeeping lives in an explicit side table inside the node: one
//! [`ElementRecord`] per element index, one field state per spec, holding the
//! child bindings and the dependency subscriptions opened during pointer
//! resolution. The table exists purely for teardown and differential
//! rebinding; it is never part of the visible value.
//!
//! # Invariants
//!
//! 1. Differential rebinding: a child whose resolved path's canonical key is
//!    unchanged keeps its binding instance — no unsubscribe/resubscribe, no
//!    visible flicker. To-many relations diff the whole key set: kept keys
//!    keep their bindings, removed keys dispose, added keys bind fresh.
//! 2. Disposal is recursive, synchronous, idempotent, and exactly-once per
//!    element; removing an element from a shrinking list triggers the same
//!    per-element teardown as a top-level dispose.
//! 3. Partial-failure isolation: an element whose dependencies never resolve
//!    gets its own error cell set and halts; sibling elements are unaffected.
//! 4. Within one notification, dependent rebinding runs to completion before
//!    the next notification for the same node is processed.
//!
//! # Failure Modes
//!
//! - **Root path rejected**: [`ExpansionHandle::bind`] returns the
//!   [`PathError`] and performs no partial setup.
//! - **Dependency never resolves**: the fixed-point retry ends the first
//!   time a round discovers no new dependency while every known one has
//!   settled; the element reports a `dependency_unresolvable` fetch error.
//! - **Dynamically discovered child path rejected by the source**: the
//!   element reports an `invalid_path` fetch error; there is no caller to
//!   throw to inside a notification.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::Value;
use tracing::{debug, trace, warn};

use tether_core::{
    DataSource, FetchError, Observer, Path, PathError, PathKey, Slot, SlotSubscription,
};

use crate::binding::Binding;
use crate::resolver::{Cardinality, Extraction, ExtractionSchema, extract_pointers};

/// One node of the expansion tree: where to attach resolved children, how to
/// extract their pointers, and what further expansion applies to each child.
#[derive(Clone, Debug)]
pub struct ExpansionSpec {
    field: String,
    schema: ExtractionSchema,
    children: Rc<[ExpansionSpec]>,
}

impl ExpansionSpec {
    #[must_use]
    pub fn new(field: impl Into<String>, schema: ExtractionSchema) -> Self {
        Self {
            field: field.into(),
            schema,
            children: Vec::new().into(),
        }
    }

    #[must_use]
    pub fn with_children(mut self, children: Vec<ExpansionSpec>) -> Self {
        self.children = children.into();
        self
    }

    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }

    #[must_use]
    pub fn schema(&self) -> &ExtractionSchema {
        &self.schema
    }

    #[must_use]
    pub fn children(&self) -> &[ExpansionSpec] {
        &self.children
    }

    fn shared_children(&self) -> Rc<[ExpansionSpec]> {
        Rc::clone(&self.children)
    }
}

/// Shared per-element error cell. Live handles onto it stay valid across
/// re-emissions of the parent.
#[derive(Clone, Debug, Default)]
pub struct ErrorCell {
    inner: Rc<RefCell<Option<FetchError>>>,
}

impl ErrorCell {
    #[must_use]
    pub fn get(&self) -> Option<FetchError> {
        self.inner.borrow().clone()
    }

    fn set(&self, error: FetchError) {
        *self.inner.borrow_mut() = Some(error);
    }

    fn clear(&self) {
        *self.inner.borrow_mut() = None;
    }
}

/// A resolved child field of an [`ExpandedElement`].
#[derive(Clone, Debug)]
pub enum ExpandedField {
    /// To-one relation: the live slot of the related entity, if a pointer
    /// was present.
    One(Option<Slot<Expanded>>),
    /// To-many relation: one live slot per resolved pointer, in pointer
    /// order.
    Many(Vec<Slot<Expanded>>),
}

/// A shallow copy of a fetched element with its expansion fields attached.
#[derive(Clone, Debug)]
pub struct ExpandedElement {
    base: Value,
    fields: Vec<(String, ExpandedField)>,
    error: ErrorCell,
}

impl ExpandedElement {
    #[must_use]
    pub fn base(&self) -> &Value {
        &self.base
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&ExpandedField> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    /// The element's own error, set when its pointer resolution failed.
    #[must_use]
    pub fn error(&self) -> Option<FetchError> {
        self.error.get()
    }

    /// Merge the base object with the current child values into plain JSON:
    /// each expansion field plus a `<field>Error` sibling when a child
    /// carries an error. Non-object bases pass through unchanged.
    #[must_use]
    pub fn materialize(&self) -> Value {
        let Value::Object(base) = &self.base else {
            return self.base.clone();
        };
        let mut out = base.clone();
        for (name, field) in &self.fields {
            match field {
                ExpandedField::One(slot) => {
                    let value = slot
                        .as_ref()
                        .and_then(Slot::get)
                        .map(|child| child.materialize())
                        .unwrap_or(Value::Null);
                    out.insert(name.clone(), value);
                    if let Some(error) = slot.as_ref().and_then(|s| s.error()) {
                        out.insert(format!("{name}Error"), error.to_value());
                    }
                }
                ExpandedField::Many(slots) => {
                    let items = slots
                        .iter()
                        .map(|s| {
                            s.get()
                                .map(|child| child.materialize())
                                .unwrap_or(Value::Null)
                        })
                        .collect();
                    out.insert(name.clone(), Value::Array(items));
                    let errors: Vec<Value> = slots
                        .iter()
                        .map(|s| s.error().map(|e| e.to_value()).unwrap_or(Value::Null))
                        .collect();
                    if errors.iter().any(|e| !e.is_null()) {
                        out.insert(format!("{name}Error"), Value::Array(errors));
                    }
                }
            }
        }
        Value::Object(out)
    }
}

/// The wrapped value an expansion destination holds.
#[derive(Clone, Debug)]
pub enum Expanded {
    Element(ExpandedElement),
    List(Vec<ExpandedElement>),
}

impl Expanded {
    #[must_use]
    pub fn as_element(&self) -> Option<&ExpandedElement> {
        match self {
            Self::Element(el) => Some(el),
            Self::List(_) => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[ExpandedElement]> {
        match self {
            Self::List(els) => Some(els),
            Self::Element(_) => None,
        }
    }

    /// Recursively merge into plain JSON. See
    /// [`ExpandedElement::materialize`].
    #[must_use]
    pub fn materialize(&self) -> Value {
        match self {
            Self::Element(el) => el.materialize(),
            Self::List(els) => {
                Value::Array(els.iter().map(ExpandedElement::materialize).collect())
            }
        }
    }
}

struct DepWatch {
    key: PathKey,
    handle: Rc<dyn tether_core::ObservableHandle>,
    observer: Observer,
}

struct ChildBinding {
    key: PathKey,
    slot: Slot<Expanded>,
    handle: ExpansionHandle,
}

#[derive(Default)]
struct FieldState {
    children: Vec<ChildBinding>,
    deps: Vec<DepWatch>,
}

struct ElementRecord {
    raw: Value,
    fields: Vec<FieldState>,
    error: ErrorCell,
}

impl ElementRecord {
    fn new(field_count: usize) -> Self {
        Self {
            raw: Value::Null,
            fields: (0..field_count).map(|_| FieldState::default()).collect(),
            error: ErrorCell::default(),
        }
    }
}

struct NodeInner {
    source: Rc<dyn DataSource>,
    specs: Rc<[ExpansionSpec]>,
    dest: Slot<Expanded>,
    staging: Slot<Value>,
    root_binding: Option<Binding>,
    staging_sub: Option<SlotSubscription>,
    records: Vec<ElementRecord>,
    disposed: bool,
}

/// Dispose handle for one bound expansion tree. Dropping it disposes the
/// whole subtree.
pub struct ExpansionHandle {
    node: Rc<RefCell<NodeInner>>,
}

impl ExpansionHandle {
    /// Bind `path` plus `specs` into `dest`.
    ///
    /// Fails fast if the source rejects the root path; no partial setup
    /// happens on error.
    pub fn bind(
        source: Rc<dyn DataSource>,
        path: &Path,
        specs: Vec<ExpansionSpec>,
        dest: Slot<Expanded>,
    ) -> Result<Self, PathError> {
        Self::bind_shared(source, path, specs.into(), dest)
    }

    pub(crate) fn bind_shared(
        source: Rc<dyn DataSource>,
        path: &Path,
        specs: Rc<[ExpansionSpec]>,
        dest: Slot<Expanded>,
    ) -> Result<Self, PathError> {
        let handle = source.observable(path)?;
        let staging: Slot<Value> = Slot::new();
        let node = Rc::new(RefCell::new(NodeInner {
            source,
            specs,
            dest,
            staging: staging.clone(),
            root_binding: None,
            staging_sub: None,
            records: Vec::new(),
            disposed: false,
        }));

        let weak = Rc::downgrade(&node);
        let sub = staging.subscribe(move || {
            if let Some(node) = weak.upgrade() {
                on_staging_changed(&node);
            }
        });
        node.borrow_mut().staging_sub = Some(sub);

        // Binding the root pushes its settled state through staging, which
        // runs the first expansion synchronously.
        let binding = Binding::bind(handle, staging);
        node.borrow_mut().root_binding = Some(binding);

        trace!(path = %path, "expansion bound");
        Ok(Self { node })
    }

    /// Tear down every element record, child binding, dependency
    /// subscription, and the root binding. Idempotent.
    pub fn dispose(&self) {
        let records;
        let root;
        {
            let mut n = self.node.borrow_mut();
            if n.disposed {
                return;
            }
            n.disposed = true;
            records = std::mem::take(&mut n.records);
            root = n.root_binding.take();
            n.staging_sub = None;
        }
        for record in records {
            dispose_record(record);
        }
        if let Some(binding) = root {
            binding.dispose();
        }
        trace!("expansion disposed");
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.node.borrow().disposed
    }
}

impl Drop for ExpansionHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for ExpansionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.node.borrow();
        f.debug_struct("ExpansionHandle")
            .field("elements", &n.records.len())
            .field("disposed", &n.disposed)
            .finish()
    }
}

fn on_staging_changed(node: &Rc<RefCell<NodeInner>>) {
    let dest;
    let value;
    let error;
    {
        let mut n = node.borrow_mut();
        if n.disposed {
            return;
        }
        dest = n.dest.clone();
        error = n.staging.error();
        let staging_value = n.staging.get();
        let weak = Rc::downgrade(node);
        match &staging_value {
            None => {
                let records = std::mem::take(&mut n.records);
                drop(n);
                for record in records {
                    dispose_record(record);
                }
                dest.publish(None, error);
                return;
            }
            Some(Value::Array(items)) => sync_records(&mut n, &weak, items),
            Some(single) => sync_records(&mut n, &weak, std::slice::from_ref(single)),
        }
        value = build_value(&n);
    }
    // Publish outside the node borrow so destination callbacks may call
    // back into the engine.
    dest.publish(value, error);
}

/// Re-run pointer resolution for one element after a dependency notification.
fn refresh_element(node: &Rc<RefCell<NodeInner>>, index: usize) {
    let dest;
    let value;
    let error;
    {
        let mut n = node.borrow_mut();
        if n.disposed || index >= n.records.len() {
            return;
        }
        let source = Rc::clone(&n.source);
        let specs = Rc::clone(&n.specs);
        let weak = Rc::downgrade(node);
        let raw = n.records[index].raw.clone();
        expand_element(&source, &specs, &weak, &mut n.records[index], index, &raw);
        dest = n.dest.clone();
        error = n.staging.error();
        value = build_value(&n);
    }
    dest.publish(value, error);
}

fn sync_records(n: &mut NodeInner, weak: &Weak<RefCell<NodeInner>>, items: &[Value]) {
    while n.records.len() > items.len() {
        if let Some(record) = n.records.pop() {
            dispose_record(record);
        }
    }
    let field_count = n.specs.len();
    while n.records.len() < items.len() {
        n.records.push(ElementRecord::new(field_count));
    }
    let source = Rc::clone(&n.source);
    let specs = Rc::clone(&n.specs);
    for (index, raw) in items.iter().enumerate() {
        expand_element(&source, &specs, weak, &mut n.records[index], index, raw);
    }
}

fn expand_element(
    source: &Rc<dyn DataSource>,
    specs: &Rc<[ExpansionSpec]>,
    weak: &Weak<RefCell<NodeInner>>,
    record: &mut ElementRecord,
    index: usize,
    raw: &Value,
) {
    if !specs.is_empty() && !raw.is_object() {
        debug!(element = index, "non-object element left unexpanded");
    }
    record.raw = raw.clone();
    record.error.clear();
    for (fi, spec) in specs.iter().enumerate() {
        let halted = resolve_field(
            source,
            weak,
            raw,
            &mut record.fields[fi],
            &record.error,
            index,
            spec,
        );
        if halted {
            debug!(element = index, field = spec.field(), "expansion halted");
            break;
        }
    }
}

/// Run the fixed-point pointer resolution for one field of one element.
///
/// Returns `true` when the element must halt (unresolvable dependency or a
/// rejected child path). Each loop round either completes, strictly grows
/// the dependency set, or parks the field until a dependency notification
/// arrives.
fn resolve_field(
    source: &Rc<dyn DataSource>,
    weak: &Weak<RefCell<NodeInner>>,
    raw: &Value,
    fs: &mut FieldState,
    element_error: &ErrorCell,
    index: usize,
    spec: &ExpansionSpec,
) -> bool {
    loop {
        let extraction = {
            let deps = &fs.deps;
            let resolve = |path: &Path| -> Option<Value> {
                let key = path.canonical();
                deps.iter()
                    .find(|dep| &dep.key == key)
                    .and_then(|dep| dep.handle.value())
            };
            extract_pointers(raw, spec.schema(), &resolve)
        };

        match extraction {
            Extraction::Resolved(paths) => {
                rebind_children(source, fs, &paths, spec, element_error);
                return false;
            }
            Extraction::Missing(missing) => {
                let fresh: Vec<Path> = missing
                    .into_iter()
                    .filter(|p| !fs.deps.iter().any(|d| &d.key == p.canonical()))
                    .collect();

                if fresh.is_empty() {
                    let unsettled = fs
                        .deps
                        .iter()
                        .any(|d| d.handle.value().is_none() && d.handle.error().is_none());
                    if unsettled {
                        // Parked: a dependency observer will retry.
                        return false;
                    }
                    // Every known dependency has settled and the round still
                    // failed: the fixed point cannot close.
                    element_error.set(FetchError::unresolvable(format!(
                        "pointer extraction for field `{}` cannot complete",
                        spec.field()
                    )));
                    return true;
                }

                let mut settled = false;
                for path in fresh {
                    match source.observable(&path) {
                        Err(err) => {
                            warn!(%err, "dependency path rejected");
                            element_error.set(FetchError::invalid_path(err.to_string()));
                            return true;
                        }
                        Ok(handle) => {
                            let observer = dep_observer(weak.clone(), index);
                            handle.subscribe(&observer);
                            if handle.value().is_some() || handle.error().is_some() {
                                settled = true;
                            }
                            trace!(path = %path, "dependency subscribed");
                            fs.deps.push(DepWatch {
                                key: path.canonical().clone(),
                                handle,
                                observer,
                            });
                        }
                    }
                }
                if !settled {
                    return false;
                }
                // At least one fresh dependency already has data: retry now.
            }
        }
    }
}

fn dep_observer(weak: Weak<RefCell<NodeInner>>, index: usize) -> Observer {
    Observer::new(move |_event| {
        if let Some(node) = weak.upgrade() {
            refresh_element(&node, index);
        }
    })
}

/// Diff the resolved pointer set against the existing child bindings by
/// canonical key: kept keys keep their binding instances, removed keys are
/// disposed, added keys are bound fresh. Output order follows `paths`.
fn rebind_children(
    source: &Rc<dyn DataSource>,
    fs: &mut FieldState,
    paths: &[Path],
    spec: &ExpansionSpec,
    element_error: &ErrorCell,
) {
    let mut old = std::mem::take(&mut fs.children);
    let mut kept = 0usize;
    for path in paths {
        let key = path.canonical();
        if let Some(pos) = old.iter().position(|c| &c.key == key) {
            fs.children.push(old.remove(pos));
            kept += 1;
            continue;
        }
        let slot = Slot::new();
        match ExpansionHandle::bind_shared(
            Rc::clone(source),
            path,
            spec.shared_children(),
            slot.clone(),
        ) {
            Ok(handle) => fs.children.push(ChildBinding {
                key: key.clone(),
                slot,
                handle,
            }),
            Err(err) => {
                warn!(%err, path = %key, "child path rejected");
                element_error.set(FetchError::invalid_path(err.to_string()));
            }
        }
    }
    if !old.is_empty() || fs.children.len() > kept {
        trace!(
            field = spec.field(),
            kept,
            added = fs.children.len() - kept,
            removed = old.len(),
            "children rebound"
        );
    }
    for removed in old {
        removed.handle.dispose();
    }
}

fn build_value(n: &NodeInner) -> Option<Expanded> {
    let staging = n.staging.get()?;
    let elements: Vec<ExpandedElement> = n
        .records
        .iter()
        .map(|record| build_element(&n.specs, record))
        .collect();
    if staging.is_array() {
        Some(Expanded::List(elements))
    } else {
        elements.into_iter().next().map(Expanded::Element)
    }
}

fn build_element(specs: &[ExpansionSpec], record: &ElementRecord) -> ExpandedElement {
    let fields = specs
        .iter()
        .zip(&record.fields)
        .map(|(spec, fs)| {
            let field = match spec.schema().cardinality() {
                Cardinality::ToOne => {
                    ExpandedField::One(fs.children.first().map(|c| c.slot.clone()))
                }
                Cardinality::ToMany => {
                    ExpandedField::Many(fs.children.iter().map(|c| c.slot.clone()).collect())
                }
            };
            (spec.field().to_string(), field)
        })
        .collect();
    ExpandedElement {
        base: record.raw.clone(),
        fields,
        error: record.error.clone(),
    }
}

fn dispose_record(record: ElementRecord) {
    for fs in record.fields {
        for child in fs.children {
            child.handle.dispose();
        }
        for dep in fs.deps {
            dep.handle.unsubscribe(&dep.observer);
        }
    }
}
