#![forbid(unsafe_code)]

//! Stagehand Core
//!
//! The leaf layer of the fragment transition scheduler. Nothing in here knows
//! about fragments or managers; it provides the primitives they are built on.
//!
//! # Key Components
//!
//! - [`Error`] - the scheduler's error taxonomy
//! - [`TransitionRun`] - host-supplied, cancellable animation effect
//! - [`Scheduler`] - single-threaded microtask queue
//! - [`Settle`] / [`SettleSource`] - one-shot outcome cells (awaitable)
//! - [`UpdateQueue`] - two-slot coalescing queue for update requests
//! - [`Emitter`] / [`Subscription`] - observer lists with RAII detach
//! - [`render`] - render-tree collaborator traits
//! - [`StagePolicy`] - tunables, optionally loaded from TOML/JSON
//!
//! # Role in Stagehand
//! `stagehand-runtime` builds `Fragment`, `FragmentManager` and
//! `TransitionDriver` on top of these types. `stagehand-harness` implements
//! the collaborator traits headlessly for tests.

pub mod error;
pub mod events;
pub mod ids;
#[cfg(feature = "tracing-json")]
pub mod logging;
pub mod metrics;
pub mod policy;
pub mod render;
pub mod run;
pub mod scheduler;
pub mod settle;
pub mod update_queue;

pub use error::{Error, Result};
pub use events::{Emitter, Subscription};
pub use ids::{FragmentId, NodeId};
pub use policy::{PolicyError, StagePolicy};
pub use render::{Content, InsertionPoint, PlacePart, RenderSlot};
pub use run::{FinishSignal, RunHandle, TransitionRun};
pub use scheduler::Scheduler;
pub use settle::{Settle, SettleSource};
pub use update_queue::UpdateQueue;

/// Host "please re-render" callback.
///
/// Stagehand never renders on its own; when state changes it defers a call
/// to this hook and lets the host schedule the next render pass.
pub type HostHook = std::rc::Rc<dyn Fn()>;
