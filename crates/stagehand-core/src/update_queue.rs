#![forbid(unsafe_code)]

//! Two-slot settle queue for coalescing update requests.
//!
//! An owner that re-renders on request (a fragment) keeps one
//! [`UpdateQueue`]. At any time there is at most one update executing
//! (`current`) and at most one queued behind it (`next`). Every request that
//! arrives while a slot is already occupied shares that slot's cell, so any
//! number of requests collapses into at most one extra execution.
//!
//! ```text
//!            request                     begin
//! Waiting{None} ──────▶ Waiting{Some(q)} ──────▶ Updating{current: q, next: None}
//!                                                     │ request
//!                                                     ▼
//!                            finish          Updating{current, next: Some(n)}
//!            Waiting{Some(n)} ◀───────────────────────┘
//! ```
//!
//! When `current` settles, it resolves to whether `next` is occupied, i.e.
//! whether another execution is already on its way.

use crate::error::Error;
use crate::settle::{Settle, SettleSource};

/// Coalescing state for one update owner.
#[derive(Debug)]
pub enum UpdateQueue {
    /// No update executing.
    Waiting {
        /// Cell of the execution scheduled for the next microtask, if any.
        queued: Option<SettleSource<bool>>,
    },
    /// An update is executing.
    Updating {
        /// Cell settled when the executing update finishes.
        current: Option<SettleSource<bool>>,
        /// Cell of the execution queued behind the current one.
        next: Option<SettleSource<bool>>,
    },
}

impl Default for UpdateQueue {
    fn default() -> Self {
        Self::Waiting { queued: None }
    }
}

/// Outcome of [`UpdateQueue::request`].
#[derive(Debug)]
pub struct Requested {
    /// Cell the requester should wait on.
    pub settle: Settle<bool>,
    /// Set when the request opened a new slot. The caller must schedule a
    /// flush that runs the update if this cell is still the queued one.
    pub scheduled: Option<SettleSource<bool>>,
}

impl UpdateQueue {
    /// Whether an update is executing.
    #[must_use]
    pub fn is_updating(&self) -> bool {
        matches!(self, Self::Updating { .. })
    }

    /// Whether an execution is queued (waiting for its microtask or behind
    /// the executing one).
    #[must_use]
    pub fn has_queued(&self) -> bool {
        match self {
            Self::Waiting { queued } => queued.is_some(),
            Self::Updating { next, .. } => next.is_some(),
        }
    }

    /// Ask for an update, joining an occupied slot when possible.
    pub fn request(&mut self) -> Requested {
        match self {
            Self::Waiting {
                queued: Some(source),
            }
            | Self::Updating {
                next: Some(source), ..
            } => Requested {
                settle: source.settle(),
                scheduled: None,
            },
            Self::Waiting { queued } => {
                let source = SettleSource::new();
                *queued = Some(source.clone());
                Requested {
                    settle: source.settle(),
                    scheduled: Some(source),
                }
            }
            Self::Updating { next, .. } => {
                let source = SettleSource::new();
                *next = Some(source.clone());
                Requested {
                    settle: source.settle(),
                    scheduled: Some(source),
                }
            }
        }
    }

    /// Whether `source` is the cell waiting for its microtask flush.
    #[must_use]
    pub fn is_queued(&self, source: &SettleSource<bool>) -> bool {
        matches!(self, Self::Waiting { queued: Some(q) } if q.same_cell(source))
    }

    /// Enter the executing state. Returns `false` (and changes nothing) if an
    /// update is already executing.
    pub fn begin(&mut self) -> bool {
        match self {
            Self::Updating { .. } => false,
            Self::Waiting { queued } => {
                let current = queued.take();
                *self = Self::Updating {
                    current,
                    next: None,
                };
                true
            }
        }
    }

    /// Cell of the executing update (created on demand), else the queued
    /// one, else an already-resolved `false`.
    pub fn current(&mut self) -> Settle<bool> {
        match self {
            Self::Waiting { queued: Some(q) } => q.settle(),
            Self::Waiting { queued: None } => Settle::resolved(false),
            Self::Updating { current, .. } => current.get_or_insert_with(SettleSource::new).settle(),
        }
    }

    /// Leave the executing state, settling `current` and promoting `next` to
    /// the queued slot. A no-op when not executing.
    pub fn finish(&mut self, outcome: Result<(), Error>) {
        if !self.is_updating() {
            return;
        }
        let Self::Updating { current, next } = std::mem::take(self) else {
            return;
        };
        if let Some(current) = current {
            match outcome {
                Ok(()) => current.resolve(next.is_some()),
                Err(err) => current.reject(err),
            }
        }
        *self = Self::Waiting { queued: next };
    }
}
