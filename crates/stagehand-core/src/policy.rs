#![forbid(unsafe_code)]

//! Policy-as-data configuration for the scheduler.
//!
//! [`StagePolicy`] gathers every tunable in one struct that can be loaded
//! from TOML or JSON at startup.
//!
//! # Loading
//!
//! ```toml
//! # stagehand.toml
//! default_place = "main"
//! max_stack_depth = 32
//! reduced_motion = false
//! ```
//!
//! ```rust,ignore
//! let policy = StagePolicy::from_toml_file("stagehand.toml")?;
//! let policy = StagePolicy::from_json_str(json)?;
//! ```
//!
//! # Defaults
//!
//! `StagePolicy::default()` is what every constructor without an explicit
//! policy uses.

#[cfg(feature = "policy-config")]
use std::path::Path;

#[cfg(feature = "policy-config")]
use serde::{Deserialize, Serialize};

/// Scheduler tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "policy-config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "policy-config", serde(default))]
pub struct StagePolicy {
    /// Place used by `add_fragment_default`.
    pub default_place: String,

    /// Maximum number of snapshots kept on the manager's config stack. The
    /// oldest snapshot is dropped when a push would exceed it.
    pub max_stack_depth: usize,

    /// Maximum microtasks one `Scheduler::run_until_idle` may run.
    pub max_microtasks_per_drain: usize,

    /// Skip transition runs entirely: fragments settle their
    /// showing/hiding phases immediately and drivers jump phases.
    pub reduced_motion: bool,
}

impl Default for StagePolicy {
    fn default() -> Self {
        Self {
            default_place: String::new(),
            max_stack_depth: 64,
            max_microtasks_per_drain: 10_000,
            reduced_motion: false,
        }
    }
}

impl StagePolicy {
    /// Policy with `reduced_motion` set.
    #[must_use]
    pub fn reduced_motion() -> Self {
        Self {
            reduced_motion: true,
            ..Self::default()
        }
    }

    /// Load from a TOML string.
    #[cfg(feature = "policy-config")]
    pub fn from_toml_str(s: &str) -> Result<Self, PolicyError> {
        let policy: Self = toml::from_str(s)?;
        policy.checked()
    }

    /// Load from a TOML file on disk.
    #[cfg(feature = "policy-config")]
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Load from a JSON string.
    #[cfg(feature = "policy-config")]
    pub fn from_json_str(s: &str) -> Result<Self, PolicyError> {
        let policy: Self = serde_json::from_str(s)?;
        policy.checked()
    }

    /// Load from a JSON file on disk.
    #[cfg(feature = "policy-config")]
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    /// Validate all parameters.
    ///
    /// Returns a list of problems; empty means valid.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.max_stack_depth == 0 {
            errors.push("max_stack_depth must be > 0".into());
        }
        if self.max_microtasks_per_drain == 0 {
            errors.push("max_microtasks_per_drain must be > 0".into());
        }
        errors
    }

    /// `self` if valid, else a [`PolicyError::Validation`].
    pub fn checked(self) -> Result<Self, PolicyError> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(PolicyError::Validation(errors))
        }
    }
}

/// Errors that can occur when loading a policy.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// I/O error reading a file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parse error.
    #[cfg(feature = "policy-config")]
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    /// JSON parse error.
    #[cfg(feature = "policy-config")]
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    /// Validation errors.
    #[error("validation errors: {}", .0.join("; "))]
    Validation(Vec<String>),
}
