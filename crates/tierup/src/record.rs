//! Per-function tiering state.
//!
//! ## Design
//!
//! - `state` is an atomic byte; only a compare-and-swap moves a record from
//!   Baseline to Promoting, so one caller wins each promotion window
//! - the active entry sits behind a read/write lock holding an `Arc`;
//!   callers clone it under the read lock and execute after releasing it
//! - the `pending` mutex serializes the Promoting -> {Optimized, Baseline}
//!   transitions
//! - publication wakes waiters through a condition variable

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use serde::Serialize;

use crate::entry::{EntryRef, PublishedEntry, Tier};

/// Stable identity of a function definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FunctionId {
    /// Owning module instance
    pub module_id: u64,
    /// Position of the function in its module
    pub function_index: u32,
}

impl FunctionId {
    /// Build an identity.
    pub const fn new(module_id: u64, function_index: u32) -> Self {
        Self {
            module_id,
            function_index,
        }
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}:f{}", self.module_id, self.function_index)
    }
}

/// Tier state machine: `Baseline -> Promoting -> Optimized`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TierState {
    /// Running the baseline entry, spending budget
    Baseline = 0,
    /// Optimized compilation requested, baseline still serving calls
    Promoting = 1,
    /// Optimized entry published (terminal)
    Optimized = 2,
}

impl From<u8> for TierState {
    fn from(v: u8) -> Self {
        match v {
            0 => TierState::Baseline,
            1 => TierState::Promoting,
            _ => TierState::Optimized,
        }
    }
}

impl fmt::Display for TierState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TierState::Baseline => "baseline",
            TierState::Promoting => "promoting",
            TierState::Optimized => "optimized",
        })
    }
}

/// Tiering state for one function.
pub(crate) struct FunctionRecord {
    id: FunctionId,
    name: Option<String>,
    state: AtomicU8,
    budget: AtomicI64,
    invocations: AtomicU64,
    failed_promotions: AtomicU64,
    active: RwLock<PublishedEntry>,
    pending: Mutex<Option<EntryRef>>,
    publication: Mutex<()>,
    published: Condvar,
}

impl FunctionRecord {
    pub(crate) fn new(
        id: FunctionId,
        name: Option<String>,
        baseline: EntryRef,
        budget: i64,
    ) -> Self {
        Self {
            id,
            name,
            state: AtomicU8::new(TierState::Baseline as u8),
            budget: AtomicI64::new(budget),
            invocations: AtomicU64::new(0),
            failed_promotions: AtomicU64::new(0),
            active: RwLock::new(PublishedEntry::baseline(baseline)),
            pending: Mutex::new(None),
            publication: Mutex::new(()),
            published: Condvar::new(),
        }
    }

    pub(crate) fn id(&self) -> FunctionId {
        self.id
    }

    pub(crate) fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn state(&self) -> TierState {
        TierState::from(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn is_optimized(&self) -> bool {
        self.state() == TierState::Optimized
    }

    pub(crate) fn remaining_budget(&self) -> i64 {
        self.budget.load(Ordering::Acquire)
    }

    pub(crate) fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    pub(crate) fn failed_promotions(&self) -> u64 {
        self.failed_promotions.load(Ordering::Relaxed)
    }

    /// Snapshot of the entry callers should run. The returned clone keeps
    /// the entry alive after the lock is released.
    #[inline]
    pub(crate) fn active(&self) -> PublishedEntry {
        self.active.read().clone()
    }

    /// The baseline entry, if the record has not been promoted yet.
    pub(crate) fn baseline_entry(&self) -> Option<EntryRef> {
        let active = self.active.read();
        (active.tier == Tier::Baseline).then(|| active.entry.clone())
    }

    /// Account one invocation. Returns `true` when this call crossed the
    /// budget and won the Baseline -> Promoting transition.
    #[inline]
    pub(crate) fn spend_budget(&self) -> bool {
        self.invocations.fetch_add(1, Ordering::Relaxed);

        if self.state() != TierState::Baseline {
            return false;
        }

        let previous = self.budget.fetch_sub(1, Ordering::AcqRel);
        if previous > 0 {
            return false;
        }

        // A failed promotion may have refilled the budget since our
        // decrement; only a still-exhausted budget may trigger.
        if self.budget.load(Ordering::Acquire) >= 0 {
            return false;
        }

        self.state
            .compare_exchange(
                TierState::Baseline as u8,
                TierState::Promoting as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Publish an optimized entry. Fails with the observed state unless the
    /// record is promoting.
    pub(crate) fn publish(&self, entry: EntryRef) -> Result<(), TierState> {
        let mut pending = self.pending.lock();
        let state = self.state();
        if state != TierState::Promoting {
            return Err(state);
        }

        *pending = Some(entry);
        if let Some(entry) = pending.take() {
            *self.active.write() = PublishedEntry::optimized(entry);
        }
        self.state
            .store(TierState::Optimized as u8, Ordering::Release);
        drop(pending);

        let _guard = self.publication.lock();
        self.published.notify_all();
        Ok(())
    }

    /// Return a promoting record to Baseline with a fresh budget.
    pub(crate) fn revert_to_baseline(&self, budget: i64) -> Result<(), TierState> {
        let pending = self.pending.lock();
        let state = self.state();
        if state != TierState::Promoting {
            return Err(state);
        }

        self.failed_promotions.fetch_add(1, Ordering::Relaxed);
        self.budget.store(budget, Ordering::Release);
        self.state
            .store(TierState::Baseline as u8, Ordering::Release);
        drop(pending);
        Ok(())
    }

    /// Block until the record is optimized or `timeout` elapses.
    pub(crate) fn wait_optimized(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.publication.lock();
        while !self.is_optimized() {
            if self.published.wait_until(&mut guard, deadline).timed_out() {
                return self.is_optimized();
            }
        }
        true
    }
}

impl fmt::Debug for FunctionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("budget", &self.remaining_budget())
            .field("invocations", &self.invocations())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::constant_entry;
    use crate::value::Value;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn record(budget: i64) -> FunctionRecord {
        FunctionRecord::new(FunctionId::new(1, 0), Some("f".into()), constant_entry(0), budget)
    }

    #[test]
    fn triggers_only_after_budget_goes_negative() {
        let record = record(3);
        assert!(!record.spend_budget());
        assert!(!record.spend_budget());
        assert!(!record.spend_budget());
        assert_eq!(record.remaining_budget(), 0);
        assert!(record.spend_budget());
        assert_eq!(record.state(), TierState::Promoting);
        assert!(!record.spend_budget());
        assert_eq!(record.invocations(), 5);
    }

    #[test]
    fn zero_budget_triggers_on_first_call() {
        let record = record(0);
        assert!(record.spend_budget());
    }

    #[test]
    fn publish_swaps_entry_then_state() {
        let record = record(0);
        assert!(record.spend_budget());
        record.publish(constant_entry(9)).expect("promoting record accepts entry");

        let active = record.active();
        assert_eq!(active.tier, Tier::Optimized);
        assert_eq!(active.entry.call(&[]), Ok(Value::I32(9)));
        assert!(record.is_optimized());
        assert!(record.baseline_entry().is_none());
    }

    #[test]
    fn publish_outside_promoting_is_rejected() {
        let record = record(5);
        assert_eq!(
            record.publish(constant_entry(1)).unwrap_err(),
            TierState::Baseline
        );
        assert_eq!(record.active().tier, Tier::Baseline);
    }

    #[test]
    fn optimized_never_regresses() {
        let record = record(0);
        assert!(record.spend_budget());
        record.publish(constant_entry(1)).unwrap();
        assert_eq!(record.revert_to_baseline(10).unwrap_err(), TierState::Optimized);
        assert!(record.is_optimized());
        for _ in 0..10 {
            assert!(!record.spend_budget());
        }
    }

    #[test]
    fn revert_refills_budget_and_counts_failure() {
        let record = record(0);
        assert!(record.spend_budget());
        record.revert_to_baseline(2).unwrap();
        assert_eq!(record.state(), TierState::Baseline);
        assert_eq!(record.failed_promotions(), 1);
        assert!(!record.spend_budget());
        assert!(!record.spend_budget());
        assert!(record.spend_budget());
    }

    #[test]
    fn concurrent_spending_wins_transition_once() {
        let record = Arc::new(record(100));
        let winners = AtomicUsize::new(0);

        thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..1_000 {
                        if record.spend_budget() {
                            winners.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert_eq!(record.state(), TierState::Promoting);
        assert_eq!(record.invocations(), 8_000);
    }

    #[test]
    fn wait_returns_after_publication() {
        let record = Arc::new(record(0));
        assert!(record.spend_budget());

        let waiter = {
            let record = Arc::clone(&record);
            thread::spawn(move || record.wait_optimized(Duration::from_secs(10)))
        };
        record.publish(constant_entry(3)).unwrap();
        assert!(waiter.join().expect("waiter thread panicked"));
    }

    #[test]
    fn wait_times_out_on_baseline() {
        let record = record(10);
        assert!(!record.wait_optimized(Duration::from_millis(20)));
    }
}
