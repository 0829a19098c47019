#![forbid(unsafe_code)]

//! Observer lists with RAII unsubscription.
//!
//! # Design
//!
//! [`Emitter<E>`] keeps its subscribers as `Weak` callbacks; the strong `Rc`
//! lives inside the [`Subscription`] guard handed back to the subscriber.
//! Dropping the guard detaches the callback. Dead entries are pruned lazily
//! on the next [`Emitter::emit`].
//!
//! # Failure Modes
//!
//! - **Re-entrant emit**: a callback may emit on the same emitter or
//!   subscribe new callbacks; the subscriber list is snapshotted before any
//!   callback runs, so late subscribers only see later events.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

type CallbackRc<E> = Rc<dyn Fn(&E)>;
type CallbackWeak<E> = Weak<dyn Fn(&E)>;

/// A list of event subscribers.
///
/// Cloning an `Emitter` creates a new handle to the **same** subscriber list.
pub struct Emitter<E> {
    subscribers: Rc<RefCell<Vec<CallbackWeak<E>>>>,
}

impl<E> Clone for Emitter<E> {
    fn clone(&self) -> Self {
        Self {
            subscribers: Rc::clone(&self.subscribers),
        }
    }
}

impl<E> fmt::Debug for Emitter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("subscriber_count", &self.subscribers.borrow().len())
            .finish()
    }
}

impl<E: 'static> Default for Emitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: 'static> Emitter<E> {
    /// Create an emitter with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Register `callback`. It stays registered until the returned guard is
    /// dropped.
    #[must_use = "dropping the subscription detaches the callback immediately"]
    pub fn subscribe(&self, callback: impl Fn(&E) + 'static) -> Subscription {
        let strong: CallbackRc<E> = Rc::new(callback);
        self.subscribers.borrow_mut().push(Rc::downgrade(&strong));
        Subscription {
            _guard: Some(Box::new(strong)),
        }
    }

    /// Deliver `event` to every live subscriber in registration order.
    ///
    /// Returns the number of callbacks invoked.
    pub fn emit(&self, event: &E) -> usize {
        let callbacks: Vec<CallbackRc<E>> = {
            let mut subscribers = self.subscribers.borrow_mut();
            subscribers.retain(|w| w.strong_count() > 0);
            subscribers.iter().filter_map(Weak::upgrade).collect()
        };
        for cb in &callbacks {
            cb(event);
        }
        callbacks.len()
    }

    /// Number of subscribers whose guard is still alive.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.subscribers
            .borrow()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }
}

/// RAII guard for a subscriber callback.
///
/// Dropping the `Subscription` drops the only strong reference to the
/// callback, so the emitter's `Weak` stops upgrading.
#[derive(Default)]
pub struct Subscription {
    _guard: Option<Box<dyn Any>>,
}

impl Subscription {
    /// A guard that holds nothing. Useful for run implementations that
    /// finished before anyone subscribed.
    #[must_use]
    pub fn detached() -> Self {
        Self { _guard: None }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn emit_reaches_subscribers_in_order() {
        let emitter = Emitter::<u32>::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let l1 = Rc::clone(&log);
        let l2 = Rc::clone(&log);
        let _a = emitter.subscribe(move |v| l1.borrow_mut().push(("a", *v)));
        let _b = emitter.subscribe(move |v| l2.borrow_mut().push(("b", *v)));

        assert_eq!(emitter.emit(&7), 2);
        assert_eq!(*log.borrow(), vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn dropping_guard_detaches() {
        let emitter = Emitter::<()>::new();
        let hits = Rc::new(Cell::new(0u32));
        let h = Rc::clone(&hits);
        let sub = emitter.subscribe(move |_| h.set(h.get() + 1));

        emitter.emit(&());
        drop(sub);
        emitter.emit(&());

        assert_eq!(hits.get(), 1);
        assert_eq!(emitter.live_count(), 0);
    }

    #[test]
    fn subscribe_during_emit_sees_only_later_events() {
        let emitter = Emitter::<u8>::new();
        let late_hits = Rc::new(Cell::new(0u32));
        let holder: Rc<RefCell<Vec<Subscription>>> = Rc::new(RefCell::new(Vec::new()));

        let e2 = emitter.clone();
        let holder2 = Rc::clone(&holder);
        let late2 = Rc::clone(&late_hits);
        let _first = emitter.subscribe(move |_| {
            let late3 = Rc::clone(&late2);
            let sub = e2.subscribe(move |_| late3.set(late3.get() + 1));
            holder2.borrow_mut().push(sub);
        });

        emitter.emit(&1);
        assert_eq!(late_hits.get(), 0);
        emitter.emit(&2);
        assert_eq!(late_hits.get(), 1);
    }

    #[test]
    fn detached_subscription_is_inert() {
        let sub = Subscription::detached();
        drop(sub);
    }
}
