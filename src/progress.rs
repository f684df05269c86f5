//! Progress reporting for running tasks.
//!
//! Progress is advisory: it feeds logging and external observers and has no
//! effect on scheduling or correctness. A task establishes its total work
//! size once it is known, then bumps the processed count as it goes. Reads
//! are lock-free and safe from any thread.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Monotonic fraction-complete reporter owned by one task.
///
/// The reported fraction is `processed / total`, clamped to `[0.0, 1.0]`.
/// When the total is unknown (or genuinely zero) the fraction is reported as
/// 0.0 — never a division by zero. The processed count only moves forward:
/// updates go through `fetch_max`, so a stale writer can never make observed
/// progress go backwards.
#[derive(Debug, Default)]
pub struct ProgressReporter {
    processed: AtomicUsize,
    total: AtomicUsize,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Establish the total number of work units. Intended to be called once,
    /// as soon as the work size is known.
    pub fn set_total(&self, total: usize) {
        self.total.store(total, Ordering::Release);
    }

    /// Bump the processed count by `units`.
    pub fn advance(&self, units: usize) {
        self.processed.fetch_add(units, Ordering::AcqRel);
    }

    /// Set the absolute processed count. Monotone: a value below the current
    /// count is ignored.
    pub fn set_processed(&self, processed: usize) {
        self.processed.fetch_max(processed, Ordering::AcqRel);
    }

    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::Acquire)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::Acquire)
    }

    /// Current fraction complete in `[0.0, 1.0]`; 0.0 while the total is
    /// unset or zero.
    pub fn fraction(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let processed = self.processed().min(total);
        processed as f64 / total as f64
    }
}
