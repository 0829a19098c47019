#![forbid(unsafe_code)]

//! Stagehand public facade crate.
//!
//! Re-exports the types most hosts need from `stagehand-core` and
//! `stagehand-runtime`, plus a prelude for day-to-day usage.
//!
//! A host wires Stagehand in three steps:
//!
//! 1. create a [`Scheduler`] and a [`FragmentManager`] with a [`HostHook`]
//!    that schedules a render pass;
//! 2. implement [`FragmentView`] for each fragment and register fragments
//!    with [`FragmentManager::add_fragment`];
//! 3. on every render pass, call [`FragmentManager::render`] and mark each
//!    place with its [`PlacePart`], then drain the scheduler.

// --- Core re-exports -------------------------------------------------------

pub use stagehand_core::{
    Content, Emitter, Error, FinishSignal, FragmentId, HostHook, InsertionPoint, NodeId, PlacePart,
    PolicyError, RenderSlot, Result, RunHandle, Scheduler, Settle, SettleSource, StagePolicy,
    Subscription, TransitionRun, UpdateQueue,
};

pub use stagehand_core::metrics;

#[cfg(feature = "tracing-json")]
pub use stagehand_core::logging;

// --- Runtime re-exports ----------------------------------------------------

pub use stagehand_runtime::{
    AnimationKind, Control, Direction, DriverEvent, DriverPhase, Fragment, FragmentEvent,
    FragmentManager, FragmentState, FragmentView, HookError, LifecycleTarget, ManagerEvent,
    ManagerPhase, PlaceMarker, RenderReport, Target, TransitionDriver, ViewContext,
};

// --- Prelude --------------------------------------------------------------

pub mod prelude {
    pub use crate::{
        Direction, Error, Fragment, FragmentManager, FragmentState, FragmentView, HostHook,
        InsertionPoint, LifecycleTarget, PlacePart, RenderSlot, Result, RunHandle, Scheduler,
        StagePolicy, Target, TransitionDriver, TransitionRun, ViewContext,
    };

    pub use crate::{core, runtime};
}

pub use stagehand_core as core;
pub use stagehand_runtime as runtime;

#[cfg(test)]
mod tests {
    use crate::prelude::*;
    use stagehand_harness::Stage;

    #[test]
    fn prelude_covers_a_show_cycle() {
        let stage = Stage::new();
        stage.place("main");
        let (fragment, recorder): (Fragment, _) = stage.fragment("intro");
        let manager: &FragmentManager = stage.manager();
        manager.add_fragment(&fragment, "main").unwrap();
        manager.show_fragment(&fragment).unwrap();
        stage.settle().unwrap();
        recorder.finish_all();
        stage.settle().unwrap();
        assert_eq!(fragment.state(), FragmentState::Visible);
        assert_eq!(manager.target_of(fragment.id()), Some(Target::Visible));
    }

    #[test]
    fn facade_errors_are_core_errors() {
        let err: Error = crate::core::Error::SchedulerStalled { budget: 4 };
        assert!(matches!(err, crate::Error::SchedulerStalled { budget: 4 }));
    }
}
