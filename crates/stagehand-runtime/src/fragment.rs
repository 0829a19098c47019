#![forbid(unsafe_code)]

//! Per-fragment lifecycle state machine.
//!
//! A [`Fragment`] is one visual unit rendered inside a place. Its owner
//! creates it with a [`FragmentView`] (the content and animation hooks) and
//! registers it with a [`FragmentManager`](crate::FragmentManager); from then
//! on only the manager moves it between lifecycle states.
//!
//! # State machine
//!
//! ```text
//!            ┌────────── re-parent (any state) ──────────┐
//!            ▼                                            │
//!  Hidden ─▶ Showing ─▶ Visible ─▶ VisibleFreeze ─▶ Visible
//!    ▲          │          │                            │
//!    │          ▼          ▼                            ▼
//!    └────── Hiding ◀──────┴────────────────────────────┘
//!
//!  any ─▶ Disposed (terminal)
//! ```
//!
//! # Invariants
//!
//! 1. Runs are only held while `Showing`/`Hiding`; they are cancelled (and
//!    their finish listeners detached) before any other state is entered.
//! 2. A different insertion point than the previous manager call collapses
//!    the fragment to `Hidden` first; runs from before the move are never
//!    reused.
//! 3. Updates never nest. An update triggered from inside an update is
//!    [`Error::Reentrancy`].
//! 4. Any number of [`Fragment::request_update`] calls before the next
//!    microtask run the update once.
//!
//! # Failure Modes
//!
//! - **Hook error**: the update's settle cell is rejected with
//!   [`Error::RenderFailure`]; the fragment stays usable. If a
//!   `make_animations` hook fails the phase is treated as having no runs, so
//!   the manager is not left waiting.
//! - **Hook panic**: the update guard still leaves the executing state and
//!   rejects the settle cell while unwinding.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use stagehand_core::metrics;
use stagehand_core::run::all_finished;
use stagehand_core::{
    Content, Emitter, Error, FragmentId, InsertionPoint, RenderSlot, Result, RunHandle,
    Scheduler, Settle, StagePolicy, Subscription, UpdateQueue,
};
use tracing::{debug, debug_span, warn};

/// Error type returned by [`FragmentView`] hooks.
pub type HookError = Box<dyn std::error::Error>;

/// Observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FragmentState {
    /// Not shown.
    Hidden,
    /// Entrance runs playing.
    Showing,
    /// Shown and interactable.
    Visible,
    /// Shown, but held still while the manager reconciles other fragments.
    VisibleFreeze,
    /// Exit runs playing.
    Hiding,
    /// Terminal.
    Disposed,
}

impl FragmentState {
    /// Stable lowercase name, used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hidden => "hidden",
            Self::Showing => "showing",
            Self::Visible => "visible",
            Self::VisibleFreeze => "visibleFreeze",
            Self::Hiding => "hiding",
            Self::Disposed => "disposed",
        }
    }
}

impl fmt::Display for FragmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state the manager may move a fragment into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleTarget {
    /// Enter [`FragmentState::Hidden`].
    Hidden,
    /// Enter [`FragmentState::Showing`] and play entrance runs.
    Showing,
    /// Enter [`FragmentState::Visible`].
    Visible,
    /// Enter [`FragmentState::VisibleFreeze`].
    VisibleFreeze,
    /// Enter [`FragmentState::Hiding`] and play exit runs.
    Hiding,
}

impl From<LifecycleTarget> for FragmentState {
    fn from(target: LifecycleTarget) -> Self {
        match target {
            LifecycleTarget::Hidden => Self::Hidden,
            LifecycleTarget::Showing => Self::Showing,
            LifecycleTarget::Visible => Self::Visible,
            LifecycleTarget::VisibleFreeze => Self::VisibleFreeze,
            LifecycleTarget::Hiding => Self::Hiding,
        }
    }
}

/// Which runs [`FragmentView::make_animations`] is asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnimationKind {
    /// Entrance.
    Showing,
    /// Exit.
    Hiding,
}

/// Events a fragment emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentEvent {
    /// The current showing/hiding phase has no unfinished runs left.
    AnimationFinished,
}

/// What a hook sees of its fragment during an update.
pub struct ViewContext<'a> {
    /// Fragment being updated.
    pub fragment: FragmentId,
    /// State committed by this update.
    pub state: FragmentState,
    /// `state != Hidden`.
    pub visible: bool,
    /// `state == Visible`.
    pub interactable: bool,
    slot: Option<&'a Rc<dyn RenderSlot>>,
}

impl<'a> ViewContext<'a> {
    /// The fragment's render slot, if it is on-tree.
    #[must_use]
    pub fn slot(&self) -> Option<&'a Rc<dyn RenderSlot>> {
        self.slot
    }
}

impl fmt::Debug for ViewContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewContext")
            .field("fragment", &self.fragment)
            .field("state", &self.state)
            .field("visible", &self.visible)
            .field("interactable", &self.interactable)
            .field("on_tree", &self.slot.is_some())
            .finish()
    }
}

/// Hooks a concrete fragment supplies.
pub trait FragmentView {
    /// Produce the fragment's content. `None` renders nothing.
    fn render(&self, cx: &ViewContext<'_>) -> std::result::Result<Option<Content>, HookError> {
        let _ = cx;
        Ok(None)
    }

    /// Produce the runs for an entrance or exit. Only consulted when the
    /// fragment has a render slot. An empty list settles the phase at once.
    fn make_animations(
        &self,
        kind: AnimationKind,
        cx: &ViewContext<'_>,
    ) -> std::result::Result<Vec<RunHandle>, HookError> {
        let _ = (kind, cx);
        Ok(Vec::new())
    }
}

struct ActiveRun {
    run: RunHandle,
    _finish: Subscription,
}

enum Lifecycle {
    Hidden,
    Visible,
    VisibleFreeze,
    Animating {
        kind: AnimationKind,
        runs: Vec<ActiveRun>,
        finished: bool,
    },
    Disposed,
}

impl Lifecycle {
    fn state(&self) -> FragmentState {
        match self {
            Self::Hidden => FragmentState::Hidden,
            Self::Visible => FragmentState::Visible,
            Self::VisibleFreeze => FragmentState::VisibleFreeze,
            Self::Animating {
                kind: AnimationKind::Showing,
                ..
            } => FragmentState::Showing,
            Self::Animating {
                kind: AnimationKind::Hiding,
                ..
            } => FragmentState::Hiding,
            Self::Disposed => FragmentState::Disposed,
        }
    }

    fn enter(target: LifecycleTarget) -> Self {
        match target {
            LifecycleTarget::Hidden => Self::Hidden,
            LifecycleTarget::Visible => Self::Visible,
            LifecycleTarget::VisibleFreeze => Self::VisibleFreeze,
            LifecycleTarget::Showing => Self::Animating {
                kind: AnimationKind::Showing,
                runs: Vec::new(),
                finished: true,
            },
            LifecycleTarget::Hiding => Self::Animating {
                kind: AnimationKind::Hiding,
                runs: Vec::new(),
                finished: true,
            },
        }
    }

    fn take_runs(&mut self) -> Vec<ActiveRun> {
        match self {
            Self::Animating { runs, .. } => std::mem::take(runs),
            _ => Vec::new(),
        }
    }
}

/// Detach listeners first so a cancelled run can never report back.
fn cancel_runs(runs: Vec<ActiveRun>) -> usize {
    let count = runs.len();
    for ActiveRun {
        run,
        _finish: listener,
    } in runs
    {
        drop(listener);
        run.cancel();
    }
    if count > 0 {
        metrics::record_runs_cancelled(count);
    }
    count
}

struct FragmentCell {
    insertion_point: Option<Rc<dyn InsertionPoint>>,
    slot: Option<Rc<dyn RenderSlot>>,
    next_state: Option<LifecycleTarget>,
    queue: UpdateQueue,
    lifecycle: Lifecycle,
    visible: bool,
    interactable: bool,
}

struct FragmentInner {
    id: FragmentId,
    cell: RefCell<FragmentCell>,
    view: Box<dyn FragmentView>,
    scheduler: Scheduler,
    events: Emitter<FragmentEvent>,
    reduced_motion: bool,
}

/// Handle to a fragment. Clones refer to the same fragment; equality is
/// identity.
#[derive(Clone)]
pub struct Fragment {
    inner: Rc<FragmentInner>,
}

impl PartialEq for Fragment {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Fragment {}

impl std::hash::Hash for Fragment {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Fragment");
        s.field("id", &self.inner.id);
        match self.inner.cell.try_borrow() {
            Ok(cell) => s.field("state", &cell.lifecycle.state()),
            Err(_) => s.field("state", &"<updating>"),
        };
        s.finish()
    }
}

/// Leaves the executing state even if a hook unwinds.
struct UpdateGuard<'a> {
    fragment: &'a Fragment,
    armed: bool,
}

impl UpdateGuard<'_> {
    fn complete(mut self, outcome: Result<()>) {
        self.armed = false;
        self.fragment.inner.cell.borrow_mut().queue.finish(outcome);
    }
}

impl Drop for UpdateGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Ok(mut cell) = self.fragment.inner.cell.try_borrow_mut() {
            cell.queue.finish(Err(Error::RenderFailure {
                fragment: self.fragment.inner.id,
                message: "update panicked".into(),
            }));
        }
    }
}

impl Fragment {
    /// Create a hidden, unmounted fragment.
    pub fn new(view: impl FragmentView + 'static, scheduler: &Scheduler) -> Self {
        Self::with_policy(view, scheduler, &StagePolicy::default())
    }

    /// Create a fragment honouring `policy` (reduced motion).
    pub fn with_policy(
        view: impl FragmentView + 'static,
        scheduler: &Scheduler,
        policy: &StagePolicy,
    ) -> Self {
        Self {
            inner: Rc::new(FragmentInner {
                id: FragmentId::next(),
                cell: RefCell::new(FragmentCell {
                    insertion_point: None,
                    slot: None,
                    next_state: None,
                    queue: UpdateQueue::default(),
                    lifecycle: Lifecycle::Hidden,
                    visible: false,
                    interactable: false,
                }),
                view: Box::new(view),
                scheduler: scheduler.clone(),
                events: Emitter::new(),
                reduced_motion: policy.reduced_motion,
            }),
        }
    }

    /// Identity.
    #[inline]
    #[must_use]
    pub fn id(&self) -> FragmentId {
        self.inner.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> FragmentState {
        self.inner.cell.borrow().lifecycle.state()
    }

    /// `false` only while showing/hiding with unfinished runs.
    #[must_use]
    pub fn animation_finished(&self) -> bool {
        match &self.inner.cell.borrow().lifecycle {
            Lifecycle::Animating { finished, .. } => *finished,
            _ => true,
        }
    }

    /// Whether the last update rendered the fragment as visible.
    #[must_use]
    pub fn visible(&self) -> bool {
        self.inner.cell.borrow().visible
    }

    /// Whether the last update rendered the fragment as interactable.
    #[must_use]
    pub fn interactable(&self) -> bool {
        self.inner.cell.borrow().interactable
    }

    /// Number of runs currently owned.
    #[must_use]
    pub fn active_run_count(&self) -> usize {
        match &self.inner.cell.borrow().lifecycle {
            Lifecycle::Animating { runs, .. } => runs.len(),
            _ => 0,
        }
    }

    /// Listen for [`FragmentEvent`]s.
    pub fn subscribe(&self, callback: impl Fn(&FragmentEvent) + 'static) -> Subscription {
        self.inner.events.subscribe(callback)
    }

    /// Cancel all runs and enter the terminal `Disposed` state. Idempotent.
    pub fn dispose(&self) {
        let stale = {
            let mut cell = self.inner.cell.borrow_mut();
            if matches!(cell.lifecycle, Lifecycle::Disposed) {
                return;
            }
            let stale = cell.lifecycle.take_runs();
            cell.lifecycle = Lifecycle::Disposed;
            cell.next_state = None;
            cell.visible = false;
            cell.interactable = false;
            stale
        };
        let cancelled = cancel_runs(stale);
        debug!(
            target: "stagehand.fragment",
            fragment = %self.inner.id,
            cancelled,
            "fragment disposed"
        );
    }

    /// Manager entry point: place the fragment at `insertion_point` (or
    /// off-tree with `None`) and, if `next` is set, move it to that state.
    ///
    /// A different insertion point than last time collapses the fragment to
    /// `Hidden` (cancelling any runs) before `next` applies.
    pub fn update_by_fragment_manager(
        &self,
        insertion_point: Option<Rc<dyn InsertionPoint>>,
        next: Option<LifecycleTarget>,
    ) -> Result<()> {
        let stale = {
            let mut cell = self.inner.cell.borrow_mut();
            if cell.queue.is_updating() {
                return Err(Error::Reentrancy(self.inner.id));
            }
            if matches!(cell.lifecycle, Lifecycle::Disposed) {
                return Ok(());
            }
            let same_point = match (&cell.insertion_point, &insertion_point) {
                (None, None) => true,
                (Some(a), Some(b)) => a.id() == b.id(),
                _ => false,
            };
            let mut stale = Vec::new();
            if !same_point {
                stale = cell.lifecycle.take_runs();
                if !matches!(cell.lifecycle, Lifecycle::Hidden) {
                    debug!(
                        target: "stagehand.fragment",
                        fragment = %self.inner.id,
                        from = cell.lifecycle.state().as_str(),
                        "re-parented; collapsing to hidden"
                    );
                    cell.lifecycle = Lifecycle::Hidden;
                }
            }
            cell.insertion_point = insertion_point;
            cell.next_state = next;
            stale
        };
        cancel_runs(stale);
        self.update()
    }

    /// Re-render without changing lifecycle state.
    ///
    /// Calls made before the next microtask share one execution. The cell
    /// resolves to whether a further update was already queued behind it.
    pub fn request_update(&self) -> Settle<bool> {
        let requested = {
            let mut cell = self.inner.cell.borrow_mut();
            if matches!(cell.lifecycle, Lifecycle::Disposed) {
                return Settle::resolved(false);
            }
            cell.queue.request()
        };
        if let Some(source) = requested.scheduled {
            let weak = Rc::downgrade(&self.inner);
            self.inner.scheduler.defer(move || {
                let Some(fragment) = Self::upgrade(&weak) else {
                    return;
                };
                let due = fragment.inner.cell.borrow().queue.is_queued(&source);
                if due && let Err(err) = fragment.update() {
                    warn!(target: "stagehand.fragment", error = %err, "queued update refused");
                }
            });
        }
        requested.settle
    }

    /// Settle cell of the update currently executing (created on demand),
    /// else of the queued one, else an already-resolved `false`.
    pub fn update_complete(&self) -> Settle<bool> {
        self.inner.cell.borrow_mut().queue.current()
    }

    fn upgrade(weak: &Weak<FragmentInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    fn update(&self) -> Result<()> {
        let id = self.inner.id;
        let span = debug_span!(
            "fragment.update",
            fragment = %id,
            from = tracing::field::Empty,
            to = tracing::field::Empty
        );
        let _enter = span.enter();

        let (entered, slot, state, visible, interactable, stale) = {
            let mut cell = self.inner.cell.borrow_mut();
            if !cell.queue.begin() {
                return Err(Error::Reentrancy(id));
            }
            if matches!(cell.lifecycle, Lifecycle::Disposed) {
                cell.queue.finish(Ok(()));
                return Ok(());
            }

            let fresh_slot = match (&cell.insertion_point, &cell.slot) {
                (None, _) => None,
                (Some(_), None) => Some(true),
                (Some(point), Some(slot)) => Some(!point.holds(slot.as_ref())),
            };
            match fresh_slot {
                None => cell.slot = None,
                Some(true) => {
                    let slot = cell
                        .insertion_point
                        .as_ref()
                        .map(|point| point.attach_slot());
                    cell.slot = slot;
                }
                Some(false) => {}
            }

            let mut entered = None;
            let mut stale = Vec::new();
            if let Some(next) = cell.next_state.take() {
                stale = cell.lifecycle.take_runs();
                span.record("from", cell.lifecycle.state().as_str());
                cell.lifecycle = Lifecycle::enter(next);
                span.record("to", cell.lifecycle.state().as_str());
                entered = match next {
                    LifecycleTarget::Showing => Some(AnimationKind::Showing),
                    LifecycleTarget::Hiding => Some(AnimationKind::Hiding),
                    _ => None,
                };
            }

            let state = cell.lifecycle.state();
            cell.visible = state != FragmentState::Hidden;
            cell.interactable = state == FragmentState::Visible;
            (
                entered,
                cell.slot.clone(),
                state,
                cell.visible,
                cell.interactable,
                stale,
            )
        };
        cancel_runs(stale);

        let guard = UpdateGuard {
            fragment: self,
            armed: true,
        };
        let cx = ViewContext {
            fragment: id,
            state,
            visible,
            interactable,
            slot: slot.as_ref(),
        };
        let outcome = self.render_and_animate(&cx, entered);
        if let Err(err) = &outcome {
            warn!(target: "stagehand.fragment", fragment = %id, error = %err, "fragment hook failed");
        }
        guard.complete(outcome);
        Ok(())
    }

    fn render_and_animate(&self, cx: &ViewContext<'_>, entered: Option<AnimationKind>) -> Result<()> {
        let id = self.inner.id;
        let fail = |err: HookError| Error::RenderFailure {
            fragment: id,
            message: err.to_string(),
        };

        if let Some(slot) = cx.slot() {
            let content = self.inner.view.render(cx).map_err(fail)?;
            slot.set_content(content);
            slot.commit();
        }

        let Some(kind) = entered else {
            return Ok(());
        };
        let runs = if cx.slot().is_some() && !self.inner.reduced_motion {
            match self.inner.view.make_animations(kind, cx) {
                Ok(runs) => runs,
                Err(err) => {
                    self.dispatch_animation_finished();
                    return Err(fail(err));
                }
            }
        } else {
            Vec::new()
        };
        if runs.is_empty() {
            self.dispatch_animation_finished();
            return Ok(());
        }
        self.play_runs(runs);
        Ok(())
    }

    fn play_runs(&self, runs: Vec<RunHandle>) {
        let handles = runs.clone();
        let active: Vec<ActiveRun> = runs
            .into_iter()
            .map(|run| {
                let weak = Rc::downgrade(&self.inner);
                let finish = run.on_finish(Box::new(move || {
                    if let Some(fragment) = Self::upgrade(&weak) {
                        fragment.on_run_finished();
                    }
                }));
                ActiveRun {
                    run,
                    _finish: finish,
                }
            })
            .collect();

        {
            let mut cell = self.inner.cell.borrow_mut();
            if let Lifecycle::Animating { runs, finished, .. } = &mut cell.lifecycle {
                *runs = active;
                *finished = false;
            }
        }

        for run in &handles {
            run.play();
        }
        metrics::record_runs_started(handles.len());
        debug!(
            target: "stagehand.fragment",
            fragment = %self.inner.id,
            runs = handles.len(),
            "transition runs started"
        );

        // A run may have finished synchronously inside play().
        let settled_now = {
            let mut cell = self.inner.cell.borrow_mut();
            match &mut cell.lifecycle {
                Lifecycle::Animating { runs, finished, .. }
                    if !*finished && all_finished(runs.iter().map(|a| &a.run)) =>
                {
                    *finished = true;
                    true
                }
                _ => false,
            }
        };
        if settled_now {
            self.dispatch_animation_finished();
        }
    }

    fn on_run_finished(&self) {
        let settled = {
            let Ok(mut cell) = self.inner.cell.try_borrow_mut() else {
                debug!(
                    target: "stagehand.fragment",
                    fragment = %self.inner.id,
                    "run finished while fragment state was borrowed; notification dropped"
                );
                return;
            };
            match &mut cell.lifecycle {
                Lifecycle::Animating { runs, finished, .. }
                    if !*finished && all_finished(runs.iter().map(|a| &a.run)) =>
                {
                    *finished = true;
                    true
                }
                _ => false,
            }
        };
        if settled {
            let _ = self.request_update();
            self.dispatch_animation_finished();
        }
    }

    /// Deferred one microtask so a run that finished synchronously never
    /// re-enters whoever is updating us.
    fn dispatch_animation_finished(&self) {
        let weak = Rc::downgrade(&self.inner);
        self.inner.scheduler.defer(move || {
            if let Some(inner) = weak.upgrade() {
                inner.events.emit(&FragmentEvent::AnimationFinished);
            }
        });
    }
}
