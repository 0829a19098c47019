#![forbid(unsafe_code)]

//! Stagehand Runtime
//!
//! The fragment transition scheduler proper.
//!
//! # Key Components
//!
//! - [`Fragment`] - one independently animated unit with a visibility
//!   lifecycle (`hidden → showing → visible ⇄ visibleFreeze → hiding → hidden`,
//!   terminal `disposed`)
//! - [`FragmentView`] - the hooks a concrete fragment supplies
//! - [`FragmentManager`] - reconciles a declarative show/hide configuration
//!   against the mounted fragments, one render pass at a time
//! - [`TransitionDriver`] - forward/backward per-key transitions for
//!   single-widget components (dialogs, drawers)
//!
//! # How it fits in the system
//! Callers edit the manager's configuration; the manager defers a host
//! update request; the host calls [`FragmentManager::render`] with its place
//! parts; fragments render into their slots and play their runs. All of it
//! runs on one thread, with the [`Scheduler`](stagehand_core::Scheduler)
//! microtask queue as the only suspension point.

pub mod driver;
pub mod fragment;
pub mod manager;

pub use driver::{Control, Direction, DriverEvent, DriverPhase, TransitionDriver};
pub use fragment::{
    AnimationKind, Fragment, FragmentEvent, FragmentState, FragmentView, HookError,
    LifecycleTarget, ViewContext,
};
pub use manager::{FragmentManager, ManagerEvent, ManagerPhase, PlaceMarker, RenderReport, Target};
