#![forbid(unsafe_code)]

//! Scripted transition runs.
//!
//! A [`ScriptedRun`] does nothing on its own: tests decide when it finishes.
//! [`ScriptedRun::instant`] builds one that finishes as soon as it plays.

use std::cell::Cell;
use std::rc::Rc;

use stagehand_core::run::FinishSignal;
use stagehand_core::{RunHandle, Subscription, TransitionRun};

/// Where a scripted run is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    /// Created, never played.
    Idle,
    /// Playing.
    Playing,
    /// Played to completion.
    Finished,
    /// Cancelled. Terminal.
    Cancelled,
}

/// A run finished by hand.
#[derive(Debug)]
pub struct ScriptedRun {
    label: String,
    state: Cell<RunState>,
    instant: bool,
    plays: Cell<u32>,
    cancels: Cell<u32>,
    signal: FinishSignal,
}

impl ScriptedRun {
    /// A run that waits for [`finish`](Self::finish).
    #[must_use]
    pub fn new(label: impl Into<String>) -> Rc<Self> {
        Rc::new(Self::build(label.into(), false))
    }

    /// A run that finishes inside `play`.
    #[must_use]
    pub fn instant(label: impl Into<String>) -> Rc<Self> {
        Rc::new(Self::build(label.into(), true))
    }

    fn build(label: String, instant: bool) -> Self {
        Self {
            label,
            state: Cell::new(RunState::Idle),
            instant,
            plays: Cell::new(0),
            cancels: Cell::new(0),
            signal: FinishSignal::new(),
        }
    }

    /// Erase to a [`RunHandle`].
    #[must_use]
    pub fn handle(self: &Rc<Self>) -> RunHandle {
        Rc::clone(self) as RunHandle
    }

    /// Label given at construction.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> RunState {
        self.state.get()
    }

    /// Times `play` was called.
    #[must_use]
    pub fn plays(&self) -> u32 {
        self.plays.get()
    }

    /// Times `cancel` was called.
    #[must_use]
    pub fn cancels(&self) -> u32 {
        self.cancels.get()
    }

    /// Listeners still attached.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.signal.listener_count()
    }

    /// Complete the run if it is playing. Returns whether it finished.
    pub fn finish(&self) -> bool {
        if self.state.get() != RunState::Playing {
            return false;
        }
        self.state.set(RunState::Finished);
        self.signal.fire();
        true
    }
}

impl TransitionRun for ScriptedRun {
    fn play(&self) {
        self.plays.set(self.plays.get() + 1);
        if matches!(self.state.get(), RunState::Idle | RunState::Playing) {
            self.state.set(RunState::Playing);
            if self.instant {
                self.finish();
            }
        }
    }

    fn cancel(&self) {
        self.cancels.set(self.cancels.get() + 1);
        self.state.set(RunState::Cancelled);
    }

    fn is_finished(&self) -> bool {
        self.state.get() == RunState::Finished
    }

    fn on_finish(&self, callback: Box<dyn Fn()>) -> Subscription {
        self.signal.subscribe(callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_run_never_finishes() {
        let run = ScriptedRun::new("fade");
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let _sub = run.on_finish(Box::new(move || h.set(h.get() + 1)));
        run.play();
        run.cancel();
        assert!(!run.finish());
        assert_eq!(hits.get(), 0);
        assert_eq!(run.state(), RunState::Cancelled);
    }

    #[test]
    fn instant_run_finishes_in_play() {
        let run = ScriptedRun::instant("snap");
        assert!(!run.is_finished());
        run.play();
        assert!(run.is_finished());
        assert_eq!(run.plays(), 1);
    }
}
