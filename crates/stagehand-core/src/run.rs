#![forbid(unsafe_code)]

//! Transition run collaborator.
//!
//! A [`TransitionRun`] is one playing animation supplied by the rendering
//! host. The scheduler never looks at timing; it only plays, cancels, polls
//! `is_finished`, and listens for the finish notification.
//!
//! # Contract for implementors
//!
//! - `play` starts (or resumes) the run. It may finish synchronously.
//! - `cancel` stops the run for good and must **not** fire the finish
//!   notification.
//! - Finish callbacks are delivered through [`Emitter`](crate::Emitter)
//!   style subscriptions: dropping the returned guard detaches the callback.

use std::rc::Rc;

use crate::events::{Emitter, Subscription};

/// A cancellable, host-driven animation effect.
pub trait TransitionRun {
    /// Start playing.
    fn play(&self);

    /// Stop playing. Never reports finished afterwards.
    fn cancel(&self);

    /// Whether the run has played to completion.
    fn is_finished(&self) -> bool;

    /// Register a callback invoked when the run finishes.
    fn on_finish(&self, callback: Box<dyn Fn()>) -> Subscription;
}

/// Shared handle to a run. Runs are owned by whoever created them; other
/// components only ever see clones of the handle.
pub type RunHandle = Rc<dyn TransitionRun>;

/// Returns `true` when every run in `runs` reports finished (vacuously for an
/// empty set).
#[must_use]
pub fn all_finished<'a>(runs: impl IntoIterator<Item = &'a RunHandle>) -> bool {
    runs.into_iter().all(|run| run.is_finished())
}

/// Finish notification that [`TransitionRun`] implementors can embed.
///
/// Cloning shares the listener list.
#[derive(Clone, Debug, Default)]
pub struct FinishSignal {
    listeners: Emitter<()>,
}

impl FinishSignal {
    /// A signal with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Body for [`TransitionRun::on_finish`].
    pub fn subscribe(&self, callback: Box<dyn Fn()>) -> Subscription {
        self.listeners.subscribe(move |_| callback())
    }

    /// Notify every live listener. Returns how many were called.
    pub fn fire(&self) -> usize {
        self.listeners.emit(&())
    }

    /// Listeners whose guard is still alive.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.live_count()
    }
}
