#![forbid(unsafe_code)]

//! Scripted fragment views.
//!
//! [`ScriptedView`] renders `"<label>:<state>"` and hands out
//! [`ScriptedRun`]s; its [`ViewRecorder`] lets a test inspect what happened and
//! inject failures.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use stagehand_core::{Content, RunHandle};
use stagehand_runtime::{AnimationKind, FragmentState, FragmentView, HookError, ViewContext};

use crate::run::{RunState, ScriptedRun};

/// Shared record of a [`ScriptedView`]'s hook calls, plus failure switches.
#[derive(Debug)]
pub struct ViewRecorder {
    renders: Cell<usize>,
    states: RefCell<Vec<FragmentState>>,
    visible: Cell<bool>,
    interactable: Cell<bool>,
    runs: RefCell<Vec<(AnimationKind, Rc<ScriptedRun>)>>,
    runs_per_phase: Cell<usize>,
    instant: Cell<bool>,
    fail_render: Cell<bool>,
    fail_animations: Cell<bool>,
}

impl Default for ViewRecorder {
    fn default() -> Self {
        Self {
            renders: Cell::new(0),
            states: RefCell::new(Vec::new()),
            visible: Cell::new(false),
            interactable: Cell::new(false),
            runs: RefCell::new(Vec::new()),
            runs_per_phase: Cell::new(1),
            instant: Cell::new(false),
            fail_render: Cell::new(false),
            fail_animations: Cell::new(false),
        }
    }
}

impl ViewRecorder {
    /// Render hook calls.
    #[must_use]
    pub fn render_count(&self) -> usize {
        self.renders.get()
    }

    /// State seen by each render, in order.
    #[must_use]
    pub fn states(&self) -> Vec<FragmentState> {
        self.states.borrow().clone()
    }

    /// Whether `state` was ever rendered.
    #[must_use]
    pub fn rendered(&self, state: FragmentState) -> bool {
        self.states.borrow().contains(&state)
    }

    /// `visible` as of the last render.
    #[must_use]
    pub fn last_visible(&self) -> bool {
        self.visible.get()
    }

    /// `interactable` as of the last render.
    #[must_use]
    pub fn last_interactable(&self) -> bool {
        self.interactable.get()
    }

    /// Every run handed out for `kind`, oldest first.
    #[must_use]
    pub fn runs(&self, kind: AnimationKind) -> Vec<Rc<ScriptedRun>> {
        self.runs
            .borrow()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, run)| Rc::clone(run))
            .collect()
    }

    /// Every run handed out.
    #[must_use]
    pub fn all_runs(&self) -> Vec<Rc<ScriptedRun>> {
        self.runs.borrow().iter().map(|(_, r)| Rc::clone(r)).collect()
    }

    /// Finish every playing run. Returns how many finished.
    pub fn finish_all(&self) -> usize {
        self.all_runs()
            .iter()
            .filter(|run| run.state() == RunState::Playing)
            .filter(|run| run.finish())
            .count()
    }

    /// Runs produced per showing/hiding phase (default 1, 0 means none).
    pub fn set_runs_per_phase(&self, n: usize) {
        self.runs_per_phase.set(n);
    }

    /// Produce runs that finish as soon as they play.
    pub fn set_instant(&self, instant: bool) {
        self.instant.set(instant);
    }

    /// Make `render` fail.
    pub fn set_fail_render(&self, fail: bool) {
        self.fail_render.set(fail);
    }

    /// Make `make_animations` fail.
    pub fn set_fail_animations(&self, fail: bool) {
        self.fail_animations.set(fail);
    }
}

/// View whose hooks are driven by a [`ViewRecorder`].
#[derive(Debug)]
pub struct ScriptedView {
    label: String,
    recorder: Rc<ViewRecorder>,
}

impl ScriptedView {
    /// A view and the recorder that observes it.
    #[must_use]
    pub fn new(label: impl Into<String>) -> (Self, Rc<ViewRecorder>) {
        let recorder = Rc::new(ViewRecorder::default());
        (
            Self {
                label: label.into(),
                recorder: Rc::clone(&recorder),
            },
            recorder,
        )
    }
}

impl FragmentView for ScriptedView {
    fn render(&self, cx: &ViewContext<'_>) -> Result<Option<Content>, HookError> {
        let recorder = &self.recorder;
        recorder.renders.set(recorder.renders.get() + 1);
        recorder.states.borrow_mut().push(cx.state);
        recorder.visible.set(cx.visible);
        recorder.interactable.set(cx.interactable);
        if recorder.fail_render.get() {
            return Err(format!("{} refused to render", self.label).into());
        }
        Ok(Some(Content::new(format!("{}:{}", self.label, cx.state))))
    }

    fn make_animations(
        &self,
        kind: AnimationKind,
        _cx: &ViewContext<'_>,
    ) -> Result<Vec<RunHandle>, HookError> {
        let recorder = &self.recorder;
        if recorder.fail_animations.get() {
            return Err(format!("{} has no animations", self.label).into());
        }
        let tag = match kind {
            AnimationKind::Showing => "show",
            AnimationKind::Hiding => "hide",
        };
        let runs: Vec<Rc<ScriptedRun>> = (0..recorder.runs_per_phase.get())
            .map(|i| {
                let label = format!("{}/{tag}/{i}", self.label);
                if recorder.instant.get() {
                    ScriptedRun::instant(label)
                } else {
                    ScriptedRun::new(label)
                }
            })
            .collect();
        recorder
            .runs
            .borrow_mut()
            .extend(runs.iter().map(|run| (kind, Rc::clone(run))));
        Ok(runs.iter().map(ScriptedRun::handle).collect())
    }
}
