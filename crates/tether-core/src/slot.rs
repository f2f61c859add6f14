#![forbid(unsafe_code)]

//! Paired value/error destination slots.
//!
//! A [`Slot<T>`] is the settable property the host hands to the engine: a
//! shared cell holding the current value and the current data-plane error,
//! with change notification via subscriber callbacks.
//!
//! # Design
//!
//! `Slot<T>` uses `Rc<RefCell<..>>` for single-threaded shared ownership.
//! Subscribers are stored as `Weak` function pointers and cleaned up lazily
//! during notification; the [`SlotSubscription`] RAII guard keeps a callback
//! alive and removes it on drop.
//!
//! # Invariants
//!
//! 1. Version increments exactly once per write, including writes of an
//!    equal value — the slot never coalesces deliveries on its own.
//! 2. Subscribers are notified in registration order.
//! 3. Dropping a [`SlotSubscription`] removes the callback before the next
//!    notification cycle.
//! 4. Notification runs with no interior borrow held, so a callback may
//!    freely read (or write) the slot.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::FetchError;

type Listener = dyn Fn();

struct SlotInner<T> {
    value: Option<T>,
    error: Option<FetchError>,
    version: u64,
    listeners: Vec<Weak<Listener>>,
}

/// A shared destination slot pairing a value side with an error side.
///
/// Cloning a `Slot` creates a new handle to the **same** cell.
pub struct Slot<T> {
    inner: Rc<RefCell<SlotInner<T>>>,
}

/// RAII guard returned by [`Slot::subscribe`]. Dropping it unsubscribes.
pub struct SlotSubscription {
    _listener: Rc<Listener>,
}

impl<T> Slot<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(SlotInner {
                value: None,
                error: None,
                version: 0,
                listeners: Vec::new(),
            })),
        }
    }

    /// Register a change callback. Fires after every write to either side.
    #[must_use]
    pub fn subscribe(&self, f: impl Fn() + 'static) -> SlotSubscription {
        let listener: Rc<Listener> = Rc::new(f);
        self.inner
            .borrow_mut()
            .listeners
            .push(Rc::downgrade(&listener));
        SlotSubscription {
            _listener: listener,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<FetchError> {
        self.inner.borrow().error.clone()
    }

    #[must_use]
    pub fn has_value(&self) -> bool {
        self.inner.borrow().value.is_some()
    }

    /// Monotonic write counter. Each write to either side bumps it by one.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    /// Write the value side, leaving the error side untouched.
    pub fn set_value(&self, value: Option<T>) {
        {
            let mut inner = self.inner.borrow_mut();
            inner.value = value;
            inner.version += 1;
        }
        self.notify();
    }

    /// Write the error side, leaving the value side untouched.
    pub fn set_error(&self, error: Option<FetchError>) {
        {
            let mut inner = self.inner.borrow_mut();
            inner.error = error;
            inner.version += 1;
        }
        self.notify();
    }

    /// Write both sides in one delivery.
    pub fn publish(&self, value: Option<T>, error: Option<FetchError>) {
        {
            let mut inner = self.inner.borrow_mut();
            inner.value = value;
            inner.error = error;
            inner.version += 1;
        }
        self.notify();
    }

    /// Clear both sides in one delivery.
    pub fn clear(&self) {
        self.publish(None, None);
    }

    /// Whether two handles share the same cell.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.inner, &b.inner)
    }

    fn notify(&self) {
        // Collect strong callbacks first so no borrow is held during calls;
        // prune dead subscribers on the way.
        let listeners: Vec<Rc<Listener>> = {
            let mut inner = self.inner.borrow_mut();
            inner.listeners.retain(|w| w.strong_count() > 0);
            inner.listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in listeners {
            listener();
        }
    }
}

impl<T: Clone> Slot<T> {
    #[must_use]
    pub fn get(&self) -> Option<T> {
        self.inner.borrow().value.clone()
    }

    /// Access the current value by reference without cloning.
    pub fn with<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        f(self.inner.borrow().value.as_ref())
    }
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Slot")
            .field("value", &inner.value)
            .field("error", &inner.error)
            .field("version", &inner.version)
            .finish()
    }
}
