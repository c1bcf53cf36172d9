//! Controller statistics
//!
//! Atomic counters updated on the call path and by the compile worker.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::entry::Tier;

#[derive(Debug, Default)]
pub(crate) struct TierStats {
    invocations: AtomicU64,
    baseline_executions: AtomicU64,
    optimized_executions: AtomicU64,
    execution_failures: AtomicU64,
    promotions_requested: AtomicU64,
    promotions_succeeded: AtomicU64,
    promotions_failed: AtomicU64,
}

/// Snapshot of controller counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierStatsSnapshot {
    /// Completed `invoke` calls that resolved a record
    pub invocations: u64,
    /// Calls served by a baseline entry
    pub baseline_executions: u64,
    /// Calls served by an optimized entry
    pub optimized_executions: u64,
    /// Calls whose entry trapped
    pub execution_failures: u64,
    /// Budget exhaustions that won the promotion transition
    pub promotions_requested: u64,
    /// Optimized entries published
    pub promotions_succeeded: u64,
    /// Compilations that failed and fell back to baseline
    pub promotions_failed: u64,
    /// Records currently registered
    pub live_functions: u64,
    /// Registered records on the optimized tier
    pub optimized_functions: u64,
}

impl TierStats {
    #[inline]
    pub(crate) fn record_execution(&self, tier: Tier, failed: bool) {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        match tier {
            Tier::Baseline => self.baseline_executions.fetch_add(1, Ordering::Relaxed),
            Tier::Optimized => self.optimized_executions.fetch_add(1, Ordering::Relaxed),
        };
        if failed {
            self.execution_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_request(&self) {
        self.promotions_requested.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_success(&self) {
        self.promotions_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.promotions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, live_functions: u64, optimized_functions: u64) -> TierStatsSnapshot {
        TierStatsSnapshot {
            invocations: self.invocations.load(Ordering::Relaxed),
            baseline_executions: self.baseline_executions.load(Ordering::Relaxed),
            optimized_executions: self.optimized_executions.load(Ordering::Relaxed),
            execution_failures: self.execution_failures.load(Ordering::Relaxed),
            promotions_requested: self.promotions_requested.load(Ordering::Relaxed),
            promotions_succeeded: self.promotions_succeeded.load(Ordering::Relaxed),
            promotions_failed: self.promotions_failed.load(Ordering::Relaxed),
            live_functions,
            optimized_functions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_counting_splits_by_tier() {
        let stats = TierStats::default();
        stats.record_execution(Tier::Baseline, false);
        stats.record_execution(Tier::Baseline, true);
        stats.record_execution(Tier::Optimized, false);

        let snapshot = stats.snapshot(1, 0);
        assert_eq!(snapshot.invocations, 3);
        assert_eq!(snapshot.baseline_executions, 2);
        assert_eq!(snapshot.optimized_executions, 1);
        assert_eq!(snapshot.execution_failures, 1);
        assert_eq!(snapshot.live_functions, 1);
    }

    #[test]
    fn promotion_counters() {
        let stats = TierStats::default();
        stats.record_request();
        stats.record_failure();
        stats.record_request();
        stats.record_success();

        let snapshot = stats.snapshot(0, 0);
        assert_eq!(snapshot.promotions_requested, 2);
        assert_eq!(snapshot.promotions_failed, 1);
        assert_eq!(snapshot.promotions_succeeded, 1);
    }
}
