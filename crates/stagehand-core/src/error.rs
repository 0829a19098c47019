#![forbid(unsafe_code)]

//! Error taxonomy.
//!
//! Two kinds of failure exist and neither is ever retried:
//!
//! - **Caller bugs** ([`Error::ContractViolation`], [`Error::AlreadyAdded`],
//!   [`Error::Reentrancy`], [`Error::DuplicatePlace`]) are returned to the
//!   offending call immediately.
//! - **Local render failures** ([`Error::RenderFailure`]) come out of a
//!   fragment's own hooks. They reject that fragment's pending settle cell and
//!   leave the manager and sibling fragments alone.
//!
//! `Error` is `Clone` because one rejection may be observed by every caller
//! whose `request_update` was coalesced into the failing execution.

use crate::ids::FragmentId;

/// Errors produced by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A caller asked for something the configuration cannot express, such
    /// as showing a fragment that was never added.
    #[error("contract violation: cannot {op} {fragment}: {reason}")]
    ContractViolation {
        /// Operation that was attempted.
        op: &'static str,
        /// Fragment it was attempted on.
        fragment: FragmentId,
        /// What is wrong with the request.
        reason: &'static str,
    },

    /// `add_fragment` on a fragment that is already configured.
    #[error("{0} is already added")]
    AlreadyAdded(FragmentId),

    /// An update was triggered from inside the same fragment's update.
    #[error("{0} was updated from within its own update")]
    Reentrancy(FragmentId),

    /// A fragment's `render` or `make_animations` hook failed.
    #[error("{fragment} failed to render: {message}")]
    RenderFailure {
        /// Fragment whose hook failed.
        fragment: FragmentId,
        /// Hook error, rendered to text.
        message: String,
    },

    /// The same place id was marked twice in one render pass.
    #[error("place {0:?} was marked more than once in a render pass")]
    DuplicatePlace(String),

    /// The microtask queue kept refilling itself past its budget.
    #[error("microtask queue did not drain within {budget} tasks")]
    SchedulerStalled {
        /// Budget that was exhausted.
        budget: usize,
    },
}

impl Error {
    /// Whether the error indicates a caller bug (as opposed to a local
    /// render failure or a runaway queue).
    #[must_use]
    pub fn is_contract_error(&self) -> bool {
        matches!(
            self,
            Self::ContractViolation { .. }
                | Self::AlreadyAdded(_)
                | Self::Reentrancy(_)
                | Self::DuplicatePlace(_)
        )
    }
}

/// Standard result type for Stagehand APIs.
pub type Result<T> = std::result::Result<T, Error>;
