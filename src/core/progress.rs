//! core::progress
//!
//! Cooperative cancellation and progress reporting.
//!
//! A [`Progress`] is cheap to clone; clones share one cancel flag, so a
//! caller can hand a clone to an operation and cancel it from another
//! thread. Operations poll the flag at operation start and between major
//! steps, never inside a single tree edit.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use log::trace;

#[derive(Debug, Default)]
struct Shared {
    cancelled: AtomicBool,
    worked: AtomicU64,
}

/// A shared cancel flag plus a work counter.
#[derive(Debug, Clone, Default)]
pub struct Progress {
    shared: Arc<Shared>,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::SeqCst)
    }

    /// Record `units` of completed work.
    pub fn worked(&self, units: u64, task: &str) {
        let total = self.shared.worked.fetch_add(units, Ordering::Relaxed) + units;
        trace!("progress: {task} (+{units}, total {total})");
    }

    pub fn work_done(&self) -> u64 {
        self.shared.worked.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_cancellation() {
        let progress = Progress::new();
        let clone = progress.clone();
        assert!(!clone.is_cancelled());
        progress.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn work_accumulates() {
        let progress = Progress::new();
        progress.worked(2, "a");
        progress.clone().worked(3, "b");
        assert_eq!(progress.work_done(), 5);
    }
}
