#![forbid(unsafe_code)]

//! Single-threaded microtask queue.
//!
//! Everything in Stagehand is cooperative. The only suspension point is
//! "defer this to the next microtask", used to coalesce update requests and
//! to deliver finish notifications without re-entering the code that
//! produced them.
//!
//! # Usage
//!
//! ```
//! use stagehand_core::Scheduler;
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! let scheduler = Scheduler::new();
//! let hits = Rc::new(Cell::new(0));
//! let h = Rc::clone(&hits);
//! scheduler.defer(move || h.set(h.get() + 1));
//! assert_eq!(hits.get(), 0);
//! scheduler.run_until_idle().unwrap();
//! assert_eq!(hits.get(), 1);
//! ```
//!
//! # Invariants
//!
//! 1. Tasks run in FIFO order, including tasks queued while draining.
//! 2. A nested `run_until_idle` (from inside a task) is a no-op; the outer
//!    drain picks the work up.
//! 3. One drain runs at most `budget` tasks; a queue that keeps refilling
//!    past that is reported as [`Error::SchedulerStalled`].
//!
//! # Failure Modes
//!
//! - **Task panics**: remaining tasks still run. The first panic is re-raised
//!   after the queue is drained.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use tracing::debug_span;
use web_time::Instant;

use crate::error::{Error, Result};
use crate::policy::StagePolicy;

type Task = Box<dyn FnOnce()>;

struct SchedulerInner {
    queue: RefCell<VecDeque<Task>>,
    draining: Cell<bool>,
    budget: usize,
}

/// Handle to a microtask queue. Clones share the same queue.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<SchedulerInner>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.pending())
            .field("budget", &self.inner.budget)
            .finish()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Create a queue with the default policy budget.
    #[must_use]
    pub fn new() -> Self {
        Self::with_budget(StagePolicy::default().max_microtasks_per_drain)
    }

    /// Create a queue using the budget from `policy`.
    #[must_use]
    pub fn from_policy(policy: &StagePolicy) -> Self {
        Self::with_budget(policy.max_microtasks_per_drain)
    }

    /// Create a queue that runs at most `budget` tasks per drain.
    #[must_use]
    pub fn with_budget(budget: usize) -> Self {
        Self {
            inner: Rc::new(SchedulerInner {
                queue: RefCell::new(VecDeque::new()),
                draining: Cell::new(false),
                budget: budget.max(1),
            }),
        }
    }

    /// Queue `task` for the next microtask checkpoint.
    pub fn defer(&self, task: impl FnOnce() + 'static) {
        self.inner.queue.borrow_mut().push_back(Box::new(task));
    }

    /// Number of queued tasks.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.queue.borrow().len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    /// Run the next queued task, if any. Returns whether a task ran.
    pub fn tick(&self) -> bool {
        let task = self.inner.queue.borrow_mut().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Drain the queue, including tasks queued by tasks.
    ///
    /// Returns the number of tasks run.
    pub fn run_until_idle(&self) -> Result<usize> {
        if self.inner.draining.replace(true) {
            return Ok(0);
        }

        let start = Instant::now();
        let _span = debug_span!(
            "scheduler.drain",
            tasks = tracing::field::Empty,
            duration_us = tracing::field::Empty
        )
        .entered();

        let mut ran = 0usize;
        let mut first_panic: Option<Box<dyn std::any::Any + Send>> = None;
        let mut stalled = false;
        loop {
            if ran >= self.inner.budget && !self.is_idle() {
                stalled = true;
                break;
            }
            // Pop before running so the borrow is released inside the task.
            let Some(task) = self.inner.queue.borrow_mut().pop_front() else {
                break;
            };
            ran += 1;
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task));
            if let Err(payload) = result
                && first_panic.is_none()
            {
                first_panic = Some(payload);
            }
        }
        self.inner.draining.set(false);

        let span = tracing::Span::current();
        span.record("tasks", ran as u64);
        span.record("duration_us", start.elapsed().as_micros() as u64);

        if let Some(payload) = first_panic {
            std::panic::resume_unwind(payload);
        }
        if stalled {
            tracing::warn!(
                target: "stagehand.scheduler",
                budget = self.inner.budget,
                pending = self.pending(),
                "microtask drain exceeded its budget"
            );
            return Err(Error::SchedulerStalled {
                budget: self.inner.budget,
            });
        }
        Ok(ran)
    }
}
