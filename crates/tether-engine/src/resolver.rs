#![forbid(unsafe_code)]

//! Pointer extraction: turn embedded cross-references inside fetched data
//! into full paths.
//!
//! An [`ExtractionSchema`] owns a closure that reads the raw element and
//! produces the referenced paths. Extraction may need *other* already-fetched
//! results (a reference resolved relative to a sibling's data); those are
//! requested through the [`LookupCtx`], which records every miss. A schema
//! that cannot complete returns `None`, and [`extract_pointers`] reports the
//! recorded misses as [`Extraction::Missing`] so the caller can obtain
//! exactly those dependencies and retry.
//!
//! A schema that returns `None` without recording any miss is a schema bug;
//! callers treat the empty missing set as unresolvable rather than retrying
//! forever.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use ahash::AHashSet;
use serde_json::Value;
use smallvec::SmallVec;

use tether_core::Path;

/// Whether a pointer field denotes a single related entity or a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    ToOne,
    ToMany,
}

/// Ordered list of extracted pointer paths.
pub type PointerList = SmallVec<[Path; 2]>;

/// Source-lookup context handed to extraction closures.
///
/// [`LookupCtx::get`] resolves an already-known path to its fetched data and
/// records the path as missing when it is not known yet.
pub struct LookupCtx<'a> {
    resolve: &'a dyn Fn(&Path) -> Option<Value>,
    missing: RefCell<Vec<Path>>,
}

impl<'a> LookupCtx<'a> {
    #[must_use]
    pub fn new(resolve: &'a dyn Fn(&Path) -> Option<Value>) -> Self {
        Self {
            resolve,
            missing: RefCell::new(Vec::new()),
        }
    }

    /// Fetched data for `path`, or `None` (recorded as a miss).
    #[must_use]
    pub fn get(&self, path: &Path) -> Option<Value> {
        let found = (self.resolve)(path);
        if found.is_none() {
            self.missing.borrow_mut().push(path.clone());
        }
        found
    }

    fn into_missing(self) -> Vec<Path> {
        self.missing.into_inner()
    }
}

type ExtractFn = dyn Fn(&Value, &LookupCtx<'_>) -> Option<PointerList>;

/// Declarative description of one pointer field: its cardinality plus the
/// extraction closure.
#[derive(Clone)]
pub struct ExtractionSchema {
    cardinality: Cardinality,
    extract: Rc<ExtractFn>,
}

impl ExtractionSchema {
    #[must_use]
    pub fn new(
        cardinality: Cardinality,
        extract: impl Fn(&Value, &LookupCtx<'_>) -> Option<PointerList> + 'static,
    ) -> Self {
        Self {
            cardinality,
            extract: Rc::new(extract),
        }
    }

    #[must_use]
    pub fn to_one(extract: impl Fn(&Value, &LookupCtx<'_>) -> Option<PointerList> + 'static) -> Self {
        Self::new(Cardinality::ToOne, extract)
    }

    #[must_use]
    pub fn to_many(
        extract: impl Fn(&Value, &LookupCtx<'_>) -> Option<PointerList> + 'static,
    ) -> Self {
        Self::new(Cardinality::ToMany, extract)
    }

    /// To-one pointer stored in `field`: absent or null means no relation,
    /// anything else is mapped to a path by `map`. A raw value `map` cannot
    /// handle yields no pointer.
    #[must_use]
    pub fn to_one_field(
        field: impl Into<String>,
        map: impl Fn(&Value) -> Option<Path> + 'static,
    ) -> Self {
        let field = field.into();
        Self::to_one(move |data, _| {
            let mut out = PointerList::new();
            if let Some(raw) = data.get(&field)
                && !raw.is_null()
                && let Some(path) = map(raw)
            {
                out.push(path);
            }
            Some(out)
        })
    }

    /// To-many pointer array stored in `field`: each non-null item is mapped
    /// to a path. Absent or null fields mean an empty relation.
    #[must_use]
    pub fn to_many_field(
        field: impl Into<String>,
        map: impl Fn(&Value) -> Option<Path> + 'static,
    ) -> Self {
        let field = field.into();
        Self::to_many(move |data, _| {
            let mut out = PointerList::new();
            if let Some(Value::Array(items)) = data.get(&field) {
                for raw in items {
                    if !raw.is_null()
                        && let Some(path) = map(raw)
                    {
                        out.push(path);
                    }
                }
            }
            Some(out)
        })
    }

    #[must_use]
    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    fn run(&self, data: &Value, ctx: &LookupCtx<'_>) -> Option<PointerList> {
        (self.extract)(data, ctx)
    }
}

impl fmt::Debug for ExtractionSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionSchema")
            .field("cardinality", &self.cardinality)
            .finish()
    }
}

/// Outcome of one extraction attempt.
#[derive(Debug)]
pub enum Extraction {
    /// All pointers resolved, in extraction order.
    Resolved(PointerList),
    /// Extraction could not complete; these dependencies are outstanding
    /// (deduplicated by canonical key, discovery order preserved).
    Missing(Vec<Path>),
}

/// Run `schema` over `data`, resolving sibling lookups through `resolve`.
#[must_use]
pub fn extract_pointers(
    data: &Value,
    schema: &ExtractionSchema,
    resolve: &dyn Fn(&Path) -> Option<Value>,
) -> Extraction {
    let ctx = LookupCtx::new(resolve);
    match schema.run(data, &ctx) {
        Some(items) => Extraction::Resolved(items),
        None => {
            let mut seen = AHashSet::new();
            let mut missing = ctx.into_missing();
            missing.retain(|p| seen.insert(p.canonical().clone()));
            Extraction::Missing(missing)
        }
    }
}
