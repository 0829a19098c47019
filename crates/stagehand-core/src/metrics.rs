#![forbid(unsafe_code)]

//! Monotonic scheduler counters.
//!
//! Process-wide, relaxed `AtomicU64` counters that dashboards or tests can
//! sample. They only ever increase.

use std::sync::atomic::{AtomicU64, Ordering};

static RUNS_STARTED_TOTAL: AtomicU64 = AtomicU64::new(0);
static RUNS_CANCELLED_TOTAL: AtomicU64 = AtomicU64::new(0);
static RECONCILIATIONS_TOTAL: AtomicU64 = AtomicU64::new(0);
static FRAGMENTS_DISPOSED_TOTAL: AtomicU64 = AtomicU64::new(0);

/// Transition runs played by fragments and drivers.
#[must_use]
pub fn runs_started_total() -> u64 {
    RUNS_STARTED_TOTAL.load(Ordering::Relaxed)
}

/// Transition runs cancelled because they were superseded.
#[must_use]
pub fn runs_cancelled_total() -> u64 {
    RUNS_CANCELLED_TOTAL.load(Ordering::Relaxed)
}

/// Manager reconciliations that committed a pending configuration.
#[must_use]
pub fn reconciliations_total() -> u64 {
    RECONCILIATIONS_TOTAL.load(Ordering::Relaxed)
}

/// Fragments disposed by a manager.
#[must_use]
pub fn fragments_disposed_total() -> u64 {
    FRAGMENTS_DISPOSED_TOTAL.load(Ordering::Relaxed)
}

/// Record `n` runs started.
pub fn record_runs_started(n: usize) {
    RUNS_STARTED_TOTAL.fetch_add(n as u64, Ordering::Relaxed);
}

/// Record `n` runs cancelled.
pub fn record_runs_cancelled(n: usize) {
    RUNS_CANCELLED_TOTAL.fetch_add(n as u64, Ordering::Relaxed);
}

/// Record one committed reconciliation.
pub fn record_reconciliation() {
    RECONCILIATIONS_TOTAL.fetch_add(1, Ordering::Relaxed);
}

/// Record one disposal.
pub fn record_fragment_disposed() {
    FRAGMENTS_DISPOSED_TOTAL.fetch_add(1, Ordering::Relaxed);
}
