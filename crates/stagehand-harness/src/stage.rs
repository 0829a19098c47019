#![forbid(unsafe_code)]

//! Headless host loop.
//!
//! A [`Stage`] owns a scheduler, a manager wired to a dirty flag, and a set
//! of [`MemoryPlace`]s. [`Stage::settle`] alternates microtask drains and
//! render passes until the manager stops asking for passes, which is what a
//! real host's frame loop does.
//!
//! Every pass appends one JSON record to the stage transcript (phase plus the
//! state of every fragment created through the stage).

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::rc::Rc;

use serde_json::json;
use stagehand_core::{Error, PlacePart, Result, Scheduler, StagePolicy};
use stagehand_runtime::{Fragment, FragmentManager, ManagerPhase, RenderReport};
use tracing::debug;

use crate::tree::MemoryPlace;
use crate::view::{ScriptedView, ViewRecorder};

/// Passes [`Stage::settle`] runs before giving up.
pub const SETTLE_PASS_BUDGET: usize = 256;

/// Scheduler + manager + in-memory places, driven like a host frame loop.
pub struct Stage {
    scheduler: Scheduler,
    manager: FragmentManager,
    policy: StagePolicy,
    places: RefCell<Vec<(String, Rc<MemoryPlace>)>>,
    offtree: RefCell<BTreeSet<String>>,
    dirty: Rc<Cell<bool>>,
    passes: Cell<usize>,
    disposed: Cell<usize>,
    tracked: RefCell<Vec<(String, Fragment)>>,
    transcript: RefCell<Vec<serde_json::Value>>,
}

impl Default for Stage {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage {
    /// A stage with the default policy.
    #[must_use]
    pub fn new() -> Self {
        Self::with_policy(StagePolicy::default())
    }

    /// A stage whose scheduler, manager and fragments follow `policy`.
    #[must_use]
    pub fn with_policy(policy: StagePolicy) -> Self {
        let scheduler = Scheduler::from_policy(&policy);
        let dirty = Rc::new(Cell::new(false));
        let flag = Rc::clone(&dirty);
        let manager = FragmentManager::with_policy(&scheduler, policy.clone())
            .with_host(Rc::new(move || flag.set(true)));
        Self {
            scheduler,
            manager,
            policy,
            places: RefCell::new(Vec::new()),
            offtree: RefCell::new(BTreeSet::new()),
            dirty,
            passes: Cell::new(0),
            disposed: Cell::new(0),
            tracked: RefCell::new(Vec::new()),
            transcript: RefCell::new(Vec::new()),
        }
    }

    /// The stage's scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// The stage's manager.
    #[must_use]
    pub fn manager(&self) -> &FragmentManager {
        &self.manager
    }

    /// A fragment driven by a [`ScriptedView`] labelled `label`, recorded in
    /// the transcript.
    pub fn fragment(&self, label: &str) -> (Fragment, Rc<ViewRecorder>) {
        let (view, recorder) = ScriptedView::new(label);
        let fragment = Fragment::with_policy(view, &self.scheduler, &self.policy);
        self.tracked
            .borrow_mut()
            .push((label.to_owned(), fragment.clone()));
        (fragment, recorder)
    }

    /// The place rendered as `id`, created (and marked on every pass) on
    /// first use.
    pub fn place(&self, id: &str) -> Rc<MemoryPlace> {
        let mut places = self.places.borrow_mut();
        if let Some((_, place)) = places.iter().find(|(pid, _)| pid == id) {
            return Rc::clone(place);
        }
        let place = MemoryPlace::new();
        places.push((id.to_owned(), Rc::clone(&place)));
        place
    }

    /// Stop marking `id`; its fragments are updated off-tree.
    pub fn unmark(&self, id: &str) {
        self.offtree.borrow_mut().insert(id.to_owned());
    }

    /// Mark `id` again.
    pub fn mark(&self, id: &str) {
        self.offtree.borrow_mut().remove(id);
    }

    /// Whether the manager asked for a pass since the last one.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.get()
    }

    /// Render passes run so far.
    #[must_use]
    pub fn passes(&self) -> usize {
        self.passes.get()
    }

    /// Fragments the manager disposed across all passes.
    #[must_use]
    pub fn disposed_total(&self) -> usize {
        self.disposed.get()
    }

    /// Drain the microtask queue.
    pub fn flush(&self) -> Result<usize> {
        self.scheduler.run_until_idle()
    }

    /// One render pass over every marked place.
    pub fn render(&self) -> Result<RenderReport> {
        self.dirty.set(false);
        let marked: Vec<(String, Rc<dyn PlacePart>)> = {
            let offtree = self.offtree.borrow();
            self.places
                .borrow()
                .iter()
                .filter(|(id, _)| !offtree.contains(id))
                .map(|(id, place)| (id.clone(), Rc::clone(place) as Rc<dyn PlacePart>))
                .collect()
        };
        let report = self.manager.render(|marker| {
            for (id, part) in marked {
                marker.place(id, part)?;
            }
            Ok(())
        })?;
        let pass = self.passes.get() + 1;
        self.passes.set(pass);
        self.disposed.set(self.disposed.get() + report.disposed);
        self.record(pass, &report);
        Ok(report)
    }

    /// Drain and render until the manager is quiet. Returns the number of
    /// passes run.
    ///
    /// # Errors
    ///
    /// Propagates render and scheduler errors, and returns
    /// [`Error::SchedulerStalled`] if the manager keeps asking for passes.
    pub fn settle(&self) -> Result<usize> {
        let mut passes = 0;
        loop {
            self.flush()?;
            if !self.dirty.get() {
                debug!(target: "stagehand.harness", passes, "stage settled");
                return Ok(passes);
            }
            if passes == SETTLE_PASS_BUDGET {
                return Err(Error::SchedulerStalled {
                    budget: SETTLE_PASS_BUDGET,
                });
            }
            self.render()?;
            passes += 1;
        }
    }

    /// Whether the manager is idle with nothing pending and no pass owed.
    #[must_use]
    pub fn is_quiet(&self) -> bool {
        self.scheduler.is_idle()
            && !self.dirty.get()
            && !self.manager.has_pending()
            && self.manager.phase() == ManagerPhase::Idle
    }

    fn record(&self, pass: usize, report: &RenderReport) {
        let fragments: Vec<serde_json::Value> = self
            .tracked
            .borrow()
            .iter()
            .map(|(label, f)| {
                json!({
                    "label": label,
                    "id": f.id().get(),
                    "state": f.state().as_str(),
                    "finished": f.animation_finished(),
                })
            })
            .collect();
        self.transcript.borrow_mut().push(json!({
            "pass": pass,
            "committed": report.committed,
            "phase": match report.phase {
                ManagerPhase::Idle => "idle",
                ManagerPhase::Animating => "animating",
            },
            "disposed": report.disposed,
            "fragments": fragments,
        }));
    }

    /// Transcript records so far.
    #[must_use]
    pub fn transcript(&self) -> Vec<serde_json::Value> {
        self.transcript.borrow().clone()
    }

    /// Transcript as JSON lines.
    #[must_use]
    pub fn transcript_jsonl(&self) -> String {
        self.transcript
            .borrow()
            .iter()
            .map(serde_json::Value::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}
