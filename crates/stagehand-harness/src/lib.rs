#![forbid(unsafe_code)]

//! Stagehand Harness
//!
//! Headless collaborators for exercising the scheduler without a real
//! render tree or animation engine.
//!
//! - [`tree`]: keyed-list places, insertion points and slots in memory
//! - [`run`]: transition runs finished by hand
//! - [`view`]: fragment views that record their hook calls
//! - [`stage`]: a host loop that drains microtasks and renders until quiet

pub mod run;
pub mod stage;
pub mod tree;
pub mod view;

pub use run::{RunState, ScriptedRun};
pub use stage::{SETTLE_PASS_BUDGET, Stage};
pub use tree::{MemoryPlace, MemoryPoint, MemorySlot};
pub use view::{ScriptedView, ViewRecorder};
