#![forbid(unsafe_code)]

//! Forward/backward transition driver for single-widget components.
//!
//! A [`TransitionDriver`] animates a small set of keyed elements (a dialog's
//! scrim and panel, say) towards one of two ends. The host sets a
//! [`Direction`] and re-renders; each render evaluates a [`Control`] binding
//! per element, which starts the run for that key if one is due.
//!
//! ```text
//!   Start ──(forwards)──▶ Forwarding ──(all finished)──▶ End
//!     ▲                     │    ▲                        │
//!     │               flip  ▼    │ flip            (backwards)
//!     └──(all finished)── Backwarding ◀──────────────────┘
//! ```
//!
//! A flip while a run set is in flight cancels it immediately and switches to
//! the opposite in-progress phase with no runs; the next binding evaluations
//! start the replacements. Finished runs are kept (holding their end frame)
//! until the next binding evaluation cancels them.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use stagehand_core::metrics;
use stagehand_core::{Emitter, HostHook, RunHandle, Scheduler, StagePolicy, Subscription};
use tracing::{debug, debug_span};

/// Which end the driver is heading for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Direction {
    /// Towards [`DriverPhase::End`] (shown).
    Forwards,
    /// Towards [`DriverPhase::Start`] (hidden).
    #[default]
    Backwards,
}

/// Observable driver phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverPhase {
    /// At rest, hidden end.
    Start,
    /// Forward runs in flight.
    Forwarding,
    /// At rest, shown end.
    End,
    /// Backward runs in flight.
    Backwarding,
}

/// Events a driver emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverEvent {
    /// The driver needs its host to re-render.
    UpdateRequested,
}

/// Builds the run for one element. Receives the element and its key.
pub type RunFactory<K, E> = Box<dyn Fn(&E, &K) -> RunHandle>;

struct LiveRun {
    run: RunHandle,
    _finish: Subscription,
}

enum Progress<K> {
    Start,
    Forwarding(BTreeMap<K, LiveRun>),
    End,
    Backwarding(BTreeMap<K, LiveRun>),
}

impl<K> Progress<K> {
    fn phase(&self) -> DriverPhase {
        match self {
            Self::Start => DriverPhase::Start,
            Self::Forwarding(_) => DriverPhase::Forwarding,
            Self::End => DriverPhase::End,
            Self::Backwarding(_) => DriverPhase::Backwarding,
        }
    }

    fn take_runs(&mut self) -> Vec<LiveRun> {
        match self {
            Self::Forwarding(runs) | Self::Backwarding(runs) => {
                std::mem::take(runs).into_values().collect()
            }
            Self::Start | Self::End => Vec::new(),
        }
    }
}

struct DriverState<K> {
    progress: Progress<K>,
    to_cancel: Vec<RunHandle>,
}

struct DriverInner<K, E: ?Sized> {
    direction: Cell<Direction>,
    state: RefCell<DriverState<K>>,
    forward: RunFactory<K, E>,
    backward: RunFactory<K, E>,
    scheduler: Scheduler,
    events: Emitter<DriverEvent>,
    host: RefCell<Option<HostHook>>,
    reduced_motion: bool,
}

/// Coordinates forward/backward runs per key. Clones share the driver.
pub struct TransitionDriver<K, E: ?Sized> {
    inner: Rc<DriverInner<K, E>>,
}

impl<K, E: ?Sized> Clone for TransitionDriver<K, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<K, E: ?Sized> fmt::Debug for TransitionDriver<K, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("TransitionDriver");
        s.field("direction", &self.inner.direction.get());
        if let Ok(state) = self.inner.state.try_borrow() {
            s.field("phase", &state.progress.phase());
        }
        s.finish()
    }
}

/// Binding for one keyed element, evaluated when render output reaches it.
pub struct Control<K, E: ?Sized> {
    driver: TransitionDriver<K, E>,
    key: K,
}

impl<K, E> Control<K, E>
where
    K: Ord + Clone + fmt::Debug + 'static,
    E: ?Sized + 'static,
{
    /// Key this binding controls.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Evaluate the binding against the rendered element.
    pub fn apply(&self, element: &E) {
        self.driver.bind(&self.key, element);
    }
}

fn cancel_all(runs: impl IntoIterator<Item = RunHandle>) -> usize {
    let mut count = 0;
    for run in runs {
        run.cancel();
        count += 1;
    }
    if count > 0 {
        metrics::record_runs_cancelled(count);
    }
    count
}

fn cancel_live(runs: Vec<LiveRun>) -> usize {
    cancel_all(runs.into_iter().map(|live| live.run))
}

impl<K, E> TransitionDriver<K, E>
where
    K: Ord + Clone + fmt::Debug + 'static,
    E: ?Sized + 'static,
{
    /// Create a driver at `Start`, heading backwards.
    pub fn new(
        scheduler: &Scheduler,
        forward: impl Fn(&E, &K) -> RunHandle + 'static,
        backward: impl Fn(&E, &K) -> RunHandle + 'static,
    ) -> Self {
        Self::with_policy(scheduler, &StagePolicy::default(), forward, backward)
    }

    /// Create a driver honouring `policy` (reduced motion jumps straight to
    /// the target end).
    pub fn with_policy(
        scheduler: &Scheduler,
        policy: &StagePolicy,
        forward: impl Fn(&E, &K) -> RunHandle + 'static,
        backward: impl Fn(&E, &K) -> RunHandle + 'static,
    ) -> Self {
        Self {
            inner: Rc::new(DriverInner {
                direction: Cell::new(Direction::Backwards),
                state: RefCell::new(DriverState {
                    progress: Progress::Start,
                    to_cancel: Vec::new(),
                }),
                forward: Box::new(forward),
                backward: Box::new(backward),
                scheduler: scheduler.clone(),
                events: Emitter::new(),
                host: RefCell::new(None),
                reduced_motion: policy.reduced_motion,
            }),
        }
    }

    /// Builder form of [`set_host`](Self::set_host).
    #[must_use]
    pub fn with_host(self, host: HostHook) -> Self {
        self.set_host(host);
        self
    }

    /// Install the hook called whenever the driver wants a re-render.
    pub fn set_host(&self, host: HostHook) {
        *self.inner.host.borrow_mut() = Some(host);
    }

    /// Listen for [`DriverEvent`]s.
    pub fn subscribe(&self, callback: impl Fn(&DriverEvent) + 'static) -> Subscription {
        self.inner.events.subscribe(callback)
    }

    /// Current direction.
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.inner.direction.get()
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> DriverPhase {
        self.inner.state.borrow().progress.phase()
    }

    /// Change direction. A flip mid-transition cancels the in-flight runs
    /// and reverses the phase. No-op when unchanged.
    pub fn set_direction(&self, direction: Direction) {
        if self.inner.direction.replace(direction) == direction {
            return;
        }
        let stale = {
            let mut state = self.inner.state.borrow_mut();
            match state.progress.phase() {
                DriverPhase::Forwarding if direction == Direction::Backwards => {
                    let stale = state.progress.take_runs();
                    state.progress = Progress::Backwarding(BTreeMap::new());
                    stale
                }
                DriverPhase::Backwarding if direction == Direction::Forwards => {
                    let stale = state.progress.take_runs();
                    state.progress = Progress::Forwarding(BTreeMap::new());
                    stale
                }
                _ => Vec::new(),
            }
        };
        let cancelled = cancel_live(stale);
        debug!(
            target: "stagehand.driver",
            direction = ?direction,
            cancelled,
            "direction changed"
        );
        self.request_update();
    }

    /// `direction == Forwards || phase != Start`.
    #[must_use]
    pub fn visible(&self) -> bool {
        self.direction() == Direction::Forwards || self.phase() != DriverPhase::Start
    }

    /// `direction == Forwards && phase == End`.
    #[must_use]
    pub fn interactable(&self) -> bool {
        self.direction() == Direction::Forwards && self.phase() == DriverPhase::End
    }

    /// Runs currently in flight.
    #[must_use]
    pub fn live_run_count(&self) -> usize {
        match &self.inner.state.borrow().progress {
            Progress::Forwarding(runs) | Progress::Backwarding(runs) => runs.len(),
            Progress::Start | Progress::End => 0,
        }
    }

    /// Binding for the element keyed `key`.
    #[must_use]
    pub fn control(&self, key: K) -> Control<K, E> {
        Control {
            driver: self.clone(),
            key,
        }
    }

    /// Cancel everything and return to `Start`, heading backwards.
    pub fn reset(&self) {
        let (live, held) = {
            let mut state = self.inner.state.borrow_mut();
            let live = state.progress.take_runs();
            state.progress = Progress::Start;
            (live, std::mem::take(&mut state.to_cancel))
        };
        self.inner.direction.set(Direction::Backwards);
        let cancelled = cancel_live(live) + cancel_all(held);
        debug!(target: "stagehand.driver", cancelled, "driver reset");
    }

    /// Evaluate the binding for `key` against `element`.
    pub fn bind(&self, key: &K, element: &E) {
        let span = debug_span!("driver.bind", key = ?key, started = false);
        let _enter = span.enter();

        let held = std::mem::take(&mut self.inner.state.borrow_mut().to_cancel);
        cancel_all(held);

        let direction = self.direction();
        let due = {
            let state = self.inner.state.borrow();
            match (&state.progress, direction) {
                (Progress::Start, Direction::Forwards) | (Progress::End, Direction::Backwards) => {
                    true
                }
                (Progress::Forwarding(runs), Direction::Forwards)
                | (Progress::Backwarding(runs), Direction::Backwards) => !runs.contains_key(key),
                _ => false,
            }
        };
        if !due {
            return;
        }

        if self.inner.reduced_motion {
            self.inner.state.borrow_mut().progress = match direction {
                Direction::Forwards => Progress::End,
                Direction::Backwards => Progress::Start,
            };
            self.request_update();
            return;
        }

        let run = match direction {
            Direction::Forwards => (self.inner.forward)(element, key),
            Direction::Backwards => (self.inner.backward)(element, key),
        };
        let weak: Weak<DriverInner<K, E>> = Rc::downgrade(&self.inner);
        let finish = run.on_finish(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                TransitionDriver { inner }.on_run_finished();
            }
        }));

        let accepted = {
            let mut state = self.inner.state.borrow_mut();
            let progress = &mut state.progress;
            if matches!(
                (&*progress, direction),
                (Progress::Start, Direction::Forwards)
            ) {
                *progress = Progress::Forwarding(BTreeMap::new());
            } else if matches!(
                (&*progress, direction),
                (Progress::End, Direction::Backwards)
            ) {
                *progress = Progress::Backwarding(BTreeMap::new());
            }
            match (progress, direction) {
                (Progress::Forwarding(runs), Direction::Forwards)
                | (Progress::Backwarding(runs), Direction::Backwards)
                    if !runs.contains_key(key) =>
                {
                    runs.insert(
                        key.clone(),
                        LiveRun {
                            run: Rc::clone(&run),
                            _finish: finish,
                        },
                    );
                    true
                }
                _ => false,
            }
        };
        if !accepted {
            run.cancel();
            return;
        }

        span.record("started", true);
        metrics::record_runs_started(1);
        run.play();
        self.request_update();
    }

    fn on_run_finished(&self) {
        let advanced = {
            let Ok(mut state) = self.inner.state.try_borrow_mut() else {
                return;
            };
            let next = match &state.progress {
                Progress::Forwarding(runs) if runs.values().all(|r| r.run.is_finished()) => {
                    Progress::End
                }
                Progress::Backwarding(runs) if runs.values().all(|r| r.run.is_finished()) => {
                    Progress::Start
                }
                _ => return,
            };
            let finished = state.progress.take_runs();
            state.progress = next;
            state
                .to_cancel
                .extend(finished.into_iter().map(|LiveRun { run, .. }| run));
            state.progress.phase()
        };
        debug!(target: "stagehand.driver", phase = ?advanced, "transition settled");
        self.request_update();
    }

    fn request_update(&self) {
        let weak = Rc::downgrade(&self.inner);
        self.inner.scheduler.defer(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let host = inner.host.borrow().clone();
            if let Some(host) = host {
                host();
            }
            inner.events.emit(&DriverEvent::UpdateRequested);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagehand_core::{FinishSignal, TransitionRun};

    #[derive(Default)]
    struct Run {
        playing: Cell<bool>,
        finished: Cell<bool>,
        cancelled: Cell<bool>,
        signal: FinishSignal,
    }

    impl Run {
        fn finish(&self) {
            if self.playing.get() {
                self.finished.set(true);
                self.signal.fire();
            }
        }
    }

    impl TransitionRun for Run {
        fn play(&self) {
            self.playing.set(true);
        }
        fn cancel(&self) {
            self.playing.set(false);
            self.cancelled.set(true);
        }
        fn is_finished(&self) -> bool {
            self.finished.get()
        }
        fn on_finish(&self, callback: Box<dyn Fn()>) -> Subscription {
            self.signal.subscribe(callback)
        }
    }

    type Log = Rc<RefCell<Vec<(bool, &'static str, Rc<Run>)>>>;

    fn fixture() -> (Scheduler, TransitionDriver<&'static str, ()>, Log) {
        let scheduler = Scheduler::new();
        let log: Log = Rc::default();
        let (fw, bw) = (Rc::clone(&log), Rc::clone(&log));
        let driver = TransitionDriver::new(
            &scheduler,
            move |_: &(), key: &&'static str| {
                let run = Rc::new(Run::default());
                fw.borrow_mut().push((true, *key, Rc::clone(&run)));
                run as RunHandle
            },
            move |_: &(), key: &&'static str| {
                let run = Rc::new(Run::default());
                bw.borrow_mut().push((false, *key, Rc::clone(&run)));
                run as RunHandle
            },
        );
        (scheduler, driver, log)
    }

    #[test]
    fn initial_state_is_hidden_start() {
        let (_s, driver, _log) = fixture();
        assert_eq!(driver.direction(), Direction::Backwards);
        assert_eq!(driver.phase(), DriverPhase::Start);
        assert!(!driver.visible());
        assert!(!driver.interactable());
    }

    #[test]
    fn forward_runs_advance_to_end() {
        let (scheduler, driver, log) = fixture();
        driver.set_direction(Direction::Forwards);
        assert!(driver.visible());

        driver.control("scrim").apply(&());
        driver.control("panel").apply(&());
        driver.control("panel").apply(&());
        assert_eq!(driver.phase(), DriverPhase::Forwarding);
        assert_eq!(driver.live_run_count(), 2);
        assert_eq!(log.borrow().len(), 2);

        log.borrow()[0].2.finish();
        assert_eq!(driver.phase(), DriverPhase::Forwarding);
        log.borrow()[1].2.finish();
        assert_eq!(driver.phase(), DriverPhase::End);
        assert!(driver.interactable());

        // Finished runs hold until the next evaluation.
        assert!(!log.borrow()[0].2.cancelled.get());
        driver.bind(&"scrim", &());
        assert!(log.borrow()[0].2.cancelled.get());
        assert_eq!(log.borrow().len(), 2);
        scheduler.run_until_idle().unwrap();
    }

    #[test]
    fn flip_mid_transition_cancels_and_reverses() {
        let (_s, driver, log) = fixture();
        driver.set_direction(Direction::Forwards);
        driver.bind(&"panel", &());
        driver.set_direction(Direction::Backwards);

        assert_eq!(driver.phase(), DriverPhase::Backwarding);
        assert_eq!(driver.live_run_count(), 0);
        assert!(log.borrow()[0].2.cancelled.get());

        driver.bind(&"panel", &());
        assert_eq!(driver.live_run_count(), 1);
        let (forward, key, run) = log.borrow()[1].clone();
        assert!(!forward);
        assert_eq!(key, "panel");
        run.finish();
        assert_eq!(driver.phase(), DriverPhase::Start);
        assert!(!driver.visible());
    }

    #[test]
    fn reset_cancels_everything() {
        let (_s, driver, log) = fixture();
        driver.set_direction(Direction::Forwards);
        driver.bind(&"panel", &());
        driver.reset();
        assert_eq!(driver.phase(), DriverPhase::Start);
        assert_eq!(driver.direction(), Direction::Backwards);
        assert!(log.borrow()[0].2.cancelled.get());
    }

    #[test]
    fn reduced_motion_jumps_phases() {
        let scheduler = Scheduler::new();
        let driver: TransitionDriver<u8, ()> = TransitionDriver::with_policy(
            &scheduler,
            &StagePolicy::reduced_motion(),
            |_, _| Rc::new(Run::default()) as RunHandle,
            |_, _| Rc::new(Run::default()) as RunHandle,
        );
        driver.set_direction(Direction::Forwards);
        driver.bind(&0, &());
        assert_eq!(driver.phase(), DriverPhase::End);
        driver.set_direction(Direction::Backwards);
        driver.bind(&0, &());
        assert_eq!(driver.phase(), DriverPhase::Start);
    }
}
