#![forbid(unsafe_code)]

//! One-shot outcome cells.
//!
//! A [`SettleSource`] is the write side, a [`Settle`] the read side of a cell
//! that eventually holds either a value or an [`Error`]. The first settle
//! wins; later `resolve`/`reject` calls are ignored.
//!
//! `Settle` implements [`Future`], so an async host can `.await` it. Headless
//! callers drive the [`Scheduler`](crate::Scheduler) and read the outcome
//! with [`Settle::peek`].

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::error::{Error, Result};

enum Outcome<T> {
    Pending(Vec<Waker>),
    Resolved(T),
    Rejected(Error),
}

type Cell<T> = Rc<RefCell<Outcome<T>>>;

/// Write side of a settle cell.
pub struct SettleSource<T> {
    cell: Cell<T>,
}

impl<T> Clone for SettleSource<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Rc::clone(&self.cell),
        }
    }
}

impl<T> fmt::Debug for SettleSource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettleSource")
            .field("settled", &self.is_settled())
            .finish()
    }
}

impl<T> Default for SettleSource<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SettleSource<T> {
    /// Create an unsettled cell.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cell: Rc::new(RefCell::new(Outcome::Pending(Vec::new()))),
        }
    }

    /// Read side of this cell.
    #[must_use]
    pub fn settle(&self) -> Settle<T> {
        Settle {
            cell: Rc::clone(&self.cell),
        }
    }

    /// Whether an outcome has been delivered.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !matches!(*self.cell.borrow(), Outcome::Pending(_))
    }

    /// Whether two sources share one cell.
    #[must_use]
    pub fn same_cell(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }

    /// Deliver a value. Ignored if already settled.
    pub fn resolve(&self, value: T) {
        self.complete(Outcome::Resolved(value));
    }

    /// Deliver an error. Ignored if already settled.
    pub fn reject(&self, error: Error) {
        self.complete(Outcome::Rejected(error));
    }

    fn complete(&self, outcome: Outcome<T>) {
        let wakers = {
            let mut cell = self.cell.borrow_mut();
            match &mut *cell {
                Outcome::Pending(wakers) => {
                    let wakers = std::mem::take(wakers);
                    *cell = outcome;
                    wakers
                }
                Outcome::Resolved(_) | Outcome::Rejected(_) => return,
            }
        };
        for waker in wakers {
            waker.wake();
        }
    }
}

/// Read side of a settle cell. Clones observe the same outcome.
pub struct Settle<T> {
    cell: Cell<T>,
}

impl<T> Clone for Settle<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Rc::clone(&self.cell),
        }
    }
}

impl<T> fmt::Debug for Settle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settle")
            .field("settled", &self.is_settled())
            .finish()
    }
}

impl<T> Settle<T> {
    /// An already-resolved cell.
    #[must_use]
    pub fn resolved(value: T) -> Self {
        Self {
            cell: Rc::new(RefCell::new(Outcome::Resolved(value))),
        }
    }

    /// Whether an outcome has been delivered.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !matches!(*self.cell.borrow(), Outcome::Pending(_))
    }

    /// Whether two handles observe one cell.
    #[must_use]
    pub fn same_cell(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }
}

impl<T: Clone> Settle<T> {
    /// Current outcome, or `None` while pending.
    #[must_use]
    pub fn peek(&self) -> Option<Result<T>> {
        match &*self.cell.borrow() {
            Outcome::Pending(_) => None,
            Outcome::Resolved(value) => Some(Ok(value.clone())),
            Outcome::Rejected(err) => Some(Err(err.clone())),
        }
    }
}

impl<T: Clone> Future for Settle<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut cell = self.cell.borrow_mut();
        match &mut *cell {
            Outcome::Pending(wakers) => {
                if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
            Outcome::Resolved(value) => Poll::Ready(Ok(value.clone())),
            Outcome::Rejected(err) => Poll::Ready(Err(err.clone())),
        }
    }
}
