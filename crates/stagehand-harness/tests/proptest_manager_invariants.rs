#![forbid(unsafe_code)]

//! Property tests for the fragment manager.
//!
//! Random edit sequences interleaved with partial run completion and render
//! passes must always converge: once every run is finished and the stage is
//! quiet, each configured fragment sits at its target and each removed
//! fragment was disposed at most once.
//!
//! Run:
//!   cargo test -p stagehand-harness --test proptest_manager_invariants

use std::rc::Rc;

use proptest::prelude::*;
use stagehand_core::Error;
use stagehand_harness::{RunState, Stage, ViewRecorder};
use stagehand_runtime::{Fragment, FragmentState};

const POOL: usize = 5;
const PLACES: [&str; 2] = ["main", "aside"];

#[derive(Debug, Clone)]
enum Op {
    Add(usize),
    Show(usize),
    Hide(usize),
    Remove(usize),
    Finish(usize),
    Request(usize),
    Render,
    Settle,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..POOL).prop_map(Op::Add),
        4 => (0..POOL).prop_map(Op::Show),
        3 => (0..POOL).prop_map(Op::Hide),
        1 => (0..POOL).prop_map(Op::Remove),
        3 => (0..POOL).prop_map(Op::Finish),
        1 => (0..POOL).prop_map(Op::Request),
        2 => Just(Op::Render),
        2 => Just(Op::Settle),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Fresh,
    Hidden,
    Visible,
    Removed,
}

struct World {
    stage: Stage,
    fragments: Vec<(Fragment, Rc<ViewRecorder>)>,
    status: Vec<Status>,
}

impl World {
    fn new(runs_per_phase: usize) -> Self {
        let stage = Stage::new();
        for place in PLACES {
            stage.place(place);
        }
        let fragments: Vec<_> = (0..POOL)
            .map(|i| {
                let (f, recorder) = stage.fragment(&format!("f{i}"));
                recorder.set_runs_per_phase(runs_per_phase);
                (f, recorder)
            })
            .collect();
        Self {
            stage,
            fragments,
            status: vec![Status::Fresh; POOL],
        }
    }

    fn apply(&mut self, op: &Op) -> Result<(), TestCaseError> {
        let manager = self.stage.manager();
        match *op {
            Op::Add(i) => {
                let (f, _) = &self.fragments[i];
                match self.status[i] {
                    Status::Removed if f.state() == FragmentState::Disposed => {
                        let outcome = manager.add_fragment(f, PLACES[i % PLACES.len()]);
                        prop_assert!(
                            matches!(outcome, Err(Error::ContractViolation { .. })),
                            "disposed fragment was accepted again"
                        );
                    }
                    // Still mounted while it hides; re-adding would hit the
                    // uncommitted-edit row of the reconciliation table.
                    Status::Removed if manager.is_mounted(f.id()) => {}
                    Status::Removed | Status::Fresh => {
                        manager.add_fragment(f, PLACES[i % PLACES.len()]).map_err(fail)?;
                        self.status[i] = Status::Hidden;
                    }
                    Status::Hidden | Status::Visible => {
                        let outcome = manager.add_fragment(f, PLACES[i % PLACES.len()]);
                        prop_assert_eq!(outcome, Err(Error::AlreadyAdded(f.id())));
                    }
                }
            }
            Op::Show(i) | Op::Hide(i) => {
                let show = matches!(op, Op::Show(_));
                let (f, _) = &self.fragments[i];
                match self.status[i] {
                    Status::Fresh => {
                        let outcome = if show {
                            manager.show_fragment(f)
                        } else {
                            manager.hide_fragment(f)
                        };
                        prop_assert!(
                            matches!(outcome, Err(Error::ContractViolation { .. })),
                            "edit of an unknown fragment was accepted"
                        );
                    }
                    Status::Removed => {}
                    Status::Hidden | Status::Visible => {
                        if show {
                            manager.show_fragment(f).map_err(fail)?;
                            self.status[i] = Status::Visible;
                        } else {
                            manager.hide_fragment(f).map_err(fail)?;
                            self.status[i] = Status::Hidden;
                        }
                    }
                }
            }
            Op::Remove(i) => {
                let (f, _) = &self.fragments[i];
                let removed = manager.remove_fragment(f);
                let configured = matches!(self.status[i], Status::Hidden | Status::Visible);
                prop_assert_eq!(removed, configured);
                if configured {
                    self.status[i] = Status::Removed;
                }
            }
            Op::Finish(i) => {
                self.fragments[i].1.finish_all();
            }
            Op::Request(i) => {
                let _ = self.fragments[i].0.request_update();
            }
            Op::Render => {
                self.stage.render().map_err(fail)?;
            }
            Op::Settle => {
                self.stage.settle().map_err(fail)?;
            }
        }
        Ok(())
    }

    fn check_runs(&self) -> Result<(), TestCaseError> {
        for (f, recorder) in &self.fragments {
            let playing = recorder
                .all_runs()
                .iter()
                .filter(|r| r.state() == RunState::Playing)
                .count();
            prop_assert!(playing <= f.active_run_count());
            if !matches!(f.state(), FragmentState::Showing | FragmentState::Hiding) {
                prop_assert_eq!(f.active_run_count(), 0);
                prop_assert_eq!(playing, 0);
            }
        }
        Ok(())
    }

    fn converge(&self) -> Result<(), TestCaseError> {
        for _ in 0..64 {
            self.stage.settle().map_err(fail)?;
            let finished: usize = self.fragments.iter().map(|(_, p)| p.finish_all()).sum();
            if finished == 0 && self.stage.is_quiet() {
                return Ok(());
            }
        }
        Err(TestCaseError::fail("stage never became quiet"))
    }
}

fn fail(err: Error) -> TestCaseError {
    TestCaseError::fail(err.to_string())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn converges_to_targets(
        runs_per_phase in 0usize..3,
        ops in prop::collection::vec(op(), 1..80),
    ) {
        let mut world = World::new(runs_per_phase);
        for op in &ops {
            world.apply(op)?;
            world.check_runs()?;
        }
        world.converge()?;

        let manager = world.stage.manager();
        let mut disposed = 0;
        for (i, (f, recorder)) in world.fragments.iter().enumerate() {
            let state = f.state();
            match world.status[i] {
                Status::Fresh | Status::Hidden => {
                    prop_assert_eq!(state, FragmentState::Hidden);
                }
                Status::Visible => {
                    prop_assert_eq!(state, FragmentState::Visible);
                    prop_assert!(recorder.last_interactable());
                }
                Status::Removed => {
                    if state == FragmentState::Disposed {
                        disposed += 1;
                    } else {
                        // Added and removed before any pass committed it.
                        prop_assert_eq!(state, FragmentState::Hidden);
                        prop_assert_eq!(recorder.render_count(), 0);
                    }
                    prop_assert!(!manager.is_mounted(f.id()));
                }
            }
        }
        prop_assert_eq!(world.stage.disposed_total(), disposed);
        let configured = world
            .status
            .iter()
            .filter(|s| matches!(s, Status::Hidden | Status::Visible))
            .count();
        prop_assert_eq!(manager.mounted_count(), configured);
    }

    #[test]
    fn repeated_requests_render_once(n in 1usize..20) {
        let world = World::new(1);
        let (f, recorder) = &world.fragments[0];
        world.stage.manager().add_fragment(f, "main").map_err(fail)?;
        world.stage.settle().map_err(fail)?;
        let before = recorder.render_count();

        for _ in 0..n {
            let _ = f.request_update();
        }
        world.stage.flush().map_err(fail)?;
        prop_assert_eq!(recorder.render_count(), before + 1);
    }
}
