//! Read-only counters exposed by [`crate::session::Session::metrics`]
//! (`spec.md` §4.F). Plain atomics rather than a mutex-guarded struct: the
//! session's own lock already serializes writers, but readers of `metrics`
//! should never block on it (`spec.md` §5's "reads observe a consistent
//! snapshot" applies to checkpoints, not counters, so relaxed atomics are
//! enough here).

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Metrics {
    checkpoints_created: AtomicU64,
    rollbacks: AtomicU64,
    recoveries: AtomicU64,
    branches_created: AtomicU64,
    errors_caught: AtomicU64,
    time_saved_estimate_millis: AtomicU64,
}

/// A point-in-time copy of [`Metrics`]'s counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub checkpoints_created: u64,
    pub rollbacks: u64,
    pub recoveries: u64,
    pub branches_created: u64,
    pub errors_caught: u64,
    pub time_saved_estimate_millis: u64,
}

impl Metrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn checkpoint_created(&self) {
        self.checkpoints_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn branch_created(&self) {
        self.branches_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn rollback(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn error_caught(&self) {
        self.errors_caught.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn recovery(&self, time_saved_millis: u64) {
        self.recoveries.fetch_add(1, Ordering::Relaxed);
        self.time_saved_estimate_millis
            .fetch_add(time_saved_millis, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            checkpoints_created: self.checkpoints_created.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
            branches_created: self.branches_created.load(Ordering::Relaxed),
            errors_caught: self.errors_caught.load(Ordering::Relaxed),
            time_saved_estimate_millis: self.time_saved_estimate_millis.load(Ordering::Relaxed),
        }
    }
}
