//! The tiered execution controller.
//!
//! Callers go through [`TieringController::invoke`]: the record's active
//! entry is cloned under a read lock, executed, and then the record's budget
//! is charged. The call that drives a baseline budget below zero wins the
//! Baseline -> Promoting transition and hands a [`CompileRequest`] to the
//! compile worker (or the manual queue). The worker publishes the optimized
//! entry through [`TieringController::complete_promotion`]; callers never
//! wait for it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::config::{CompileMode, TierConfig};
use crate::entry::EntryRef;
use crate::error::{TierError, TierResult};
use crate::events::{TierEvent, TierObserver, TracingObserver};
use crate::module::{Instance, Module};
use crate::queue::{CodeGenerator, CompileQueue, CompileRequest, GeneratorRef};
use crate::record::{FunctionId, FunctionRecord, TierState};
use crate::stats::{TierStats, TierStatsSnapshot};
use crate::value::Value;
use crate::worker::{self, BackgroundCompileWorker};

/// Point-in-time view of one function's tiering state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionInfo {
    /// Identity
    pub id: FunctionId,
    /// Export name
    pub name: Option<String>,
    /// Tier state
    pub state: TierState,
    /// Budget left before the next promotion attempt
    pub remaining_budget: i64,
    /// Invocations so far
    pub invocations: u64,
    /// Failed promotion attempts
    pub failed_promotions: u64,
}

/// State shared between callers and the compile worker.
pub(crate) struct ControllerShared {
    config: TierConfig,
    records: DashMap<FunctionId, Arc<FunctionRecord>>,
    exports: DashMap<u64, FxHashMap<String, FunctionId>>,
    generator: GeneratorRef,
    observer: Arc<dyn TierObserver>,
    queue: CompileQueue,
    stats: TierStats,
    next_module_id: AtomicU64,
}

impl ControllerShared {
    pub(crate) fn generator(&self) -> &dyn CodeGenerator {
        self.generator.as_ref()
    }

    fn record(&self, id: FunctionId) -> TierResult<Arc<FunctionRecord>> {
        self.records
            .get(&id)
            .map(|record| Arc::clone(record.value()))
            .ok_or(TierError::UnknownFunction(id))
    }

    pub(crate) fn complete_promotion(&self, id: FunctionId, entry: EntryRef) -> TierResult<()> {
        let record = self.record(id)?;
        record
            .publish(entry)
            .map_err(|state| TierError::NotPromoting { id, state })?;

        self.stats.record_success();
        self.observer.on_event(&TierEvent::PromotionSucceeded { id });
        Ok(())
    }

    pub(crate) fn fail_promotion(&self, id: FunctionId, reason: String) -> TierResult<()> {
        let record = self.record(id)?;
        let next_budget = self.config.backoff_budget;
        record
            .revert_to_baseline(next_budget)
            .map_err(|state| TierError::NotPromoting { id, state })?;

        self.stats.record_failure();
        self.observer.on_event(&TierEvent::PromotionFailed {
            id,
            reason,
            next_budget,
        });
        Ok(())
    }
}

/// Builder for [`TieringController`].
pub struct TieringControllerBuilder {
    config: TierConfig,
    generator: GeneratorRef,
    observer: Arc<dyn TierObserver>,
}

impl TieringControllerBuilder {
    /// Replace the configuration.
    pub fn config(mut self, config: TierConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the default tracing observer.
    pub fn observer(mut self, observer: impl TierObserver + 'static) -> Self {
        self.observer = Arc::new(observer);
        self
    }

    /// Validate the configuration and start the controller (spawning the
    /// compile worker in background mode).
    pub fn build(self) -> TierResult<TieringController> {
        self.config.validate()?;

        let shared = Arc::new(ControllerShared {
            config: self.config,
            records: DashMap::new(),
            exports: DashMap::new(),
            generator: self.generator,
            observer: self.observer,
            queue: CompileQueue::default(),
            stats: TierStats::default(),
            next_module_id: AtomicU64::new(1),
        });

        let worker = match shared.config.compile_mode {
            CompileMode::Background => {
                let worker = BackgroundCompileWorker::spawn(Arc::clone(&shared));
                if worker.is_none() {
                    tracing::warn!("background compilation unavailable, queueing requests");
                }
                worker
            }
            CompileMode::Manual => None,
        };

        Ok(TieringController { shared, worker })
    }
}

/// Budget-driven tiered execution controller.
///
/// Share it between threads behind an `Arc`; every operation takes `&self`.
/// Dropping the controller stops the compile worker after it drains the
/// requests already handed to it.
pub struct TieringController {
    shared: Arc<ControllerShared>,
    worker: Option<BackgroundCompileWorker>,
}

impl TieringController {
    /// Start building a controller around a code generator.
    pub fn builder(generator: impl CodeGenerator + 'static) -> TieringControllerBuilder {
        TieringControllerBuilder {
            config: TierConfig::default(),
            generator: Arc::new(generator),
            observer: Arc::new(TracingObserver),
        }
    }

    /// Controller with the given config and the default observer.
    pub fn new(config: TierConfig, generator: impl CodeGenerator + 'static) -> TierResult<Self> {
        Self::builder(generator).config(config).build()
    }

    /// Active configuration.
    pub fn config(&self) -> &TierConfig {
        &self.shared.config
    }

    /// Register every function of `module` on the baseline tier.
    pub fn instantiate(&self, module: Module) -> Instance {
        let module_id = self.shared.next_module_id.fetch_add(1, Ordering::Relaxed);
        let mut instance = Instance::new(module_id, module.source_url);
        let mut exports = FxHashMap::default();

        for (index, def) in module.functions.into_iter().enumerate() {
            let id = FunctionId::new(module_id, index as u32);
            instance.push(id, def.name.as_deref());
            if let Some(name) = &def.name {
                exports.entry(name.clone()).or_insert(id);
            }
            let record = FunctionRecord::new(
                id,
                def.name,
                def.baseline,
                self.shared.config.initial_budget,
            );
            self.shared.records.insert(id, Arc::new(record));
        }

        self.shared.exports.insert(module_id, exports);
        tracing::debug!(
            module_id,
            functions = instance.functions().len(),
            "instantiated {}",
            instance.source_url()
        );
        instance
    }

    /// Register a single function in a module of its own.
    pub fn register(&self, name: impl Into<String>, baseline: EntryRef) -> FunctionId {
        let mut builder = Module::builder("<anonymous>");
        builder.add_function(name, baseline);
        let instance = self.instantiate(builder.build());
        FunctionId::new(instance.module_id(), 0)
    }

    /// Remove every record of a module. In-flight invocations keep running
    /// on the entries they already hold. Returns the number of records
    /// removed.
    pub fn teardown(&self, module_id: u64) -> usize {
        let ids: Vec<FunctionId> = self
            .shared
            .records
            .iter()
            .filter(|record| record.key().module_id == module_id)
            .map(|record| *record.key())
            .collect();

        let removed = ids
            .into_iter()
            .filter(|id| self.shared.records.remove(id).is_some())
            .count();
        self.shared.exports.remove(&module_id);
        let dropped = self.shared.queue.remove_module(module_id);

        tracing::debug!(module_id, removed, dropped, "module torn down");
        removed
    }

    /// Look up an exported function of a live module.
    pub fn resolve_export(&self, module_id: u64, name: &str) -> Option<FunctionId> {
        self.shared
            .exports
            .get(&module_id)
            .and_then(|exports| exports.get(name).copied())
    }

    /// Call a function on its current tier, then charge its budget.
    ///
    /// A trap raised by the entry is returned unchanged as
    /// [`TierError::Execution`] and still counts as an invocation.
    pub fn invoke(&self, id: FunctionId, args: &[Value]) -> TierResult<Value> {
        let record = self.shared.record(id)?;
        let active = record.active();

        let result = active.entry.call(args);
        self.shared
            .stats
            .record_execution(active.tier, result.is_err());

        if record.spend_budget() {
            self.request_promotion(&record);
        }

        result.map_err(TierError::from)
    }

    /// Charge one invocation to `id` without executing it.
    pub fn record_invocation(&self, id: FunctionId) -> TierResult<()> {
        let record = self.shared.record(id)?;
        if record.spend_budget() {
            self.request_promotion(&record);
        }
        Ok(())
    }

    /// Publish an optimized entry for a promoting function.
    ///
    /// Once this returns, every subsequent [`invoke`](Self::invoke) runs
    /// `entry` and [`is_optimized`](Self::is_optimized) reports `true`.
    pub fn complete_promotion(&self, id: FunctionId, entry: EntryRef) -> TierResult<()> {
        self.shared.complete_promotion(id, entry)
    }

    /// Report a failed compilation: the function returns to baseline with
    /// the backoff budget.
    pub fn fail_promotion(&self, id: FunctionId, reason: impl Into<String>) -> TierResult<()> {
        self.shared.fail_promotion(id, reason.into())
    }

    /// Whether `id` runs on the optimized tier. Unknown functions report
    /// `false`.
    pub fn is_optimized(&self, id: FunctionId) -> bool {
        self.shared
            .record(id)
            .map(|record| record.is_optimized())
            .unwrap_or(false)
    }

    /// Current tier state of `id`.
    pub fn tier_state(&self, id: FunctionId) -> Option<TierState> {
        self.shared.record(id).ok().map(|record| record.state())
    }

    /// Budget left before `id`'s next promotion attempt.
    pub fn remaining_budget(&self, id: FunctionId) -> Option<i64> {
        self.shared
            .record(id)
            .ok()
            .map(|record| record.remaining_budget())
    }

    /// Snapshot of one function's tiering state.
    pub fn function_info(&self, id: FunctionId) -> Option<FunctionInfo> {
        let record = self.shared.record(id).ok()?;
        Some(FunctionInfo {
            id: record.id(),
            name: record.name().map(str::to_string),
            state: record.state(),
            remaining_budget: record.remaining_budget(),
            invocations: record.invocations(),
            failed_promotions: record.failed_promotions(),
        })
    }

    /// Block until `id` is optimized or `timeout` elapses. Returns whether
    /// the function is optimized. For tests and tooling only.
    pub fn wait_for_optimized(&self, id: FunctionId, timeout: Duration) -> bool {
        match self.shared.record(id) {
            Ok(record) => record.wait_optimized(timeout),
            Err(_) => false,
        }
    }

    /// Compile one queued request on the calling thread. Returns `false`
    /// if the queue was empty.
    pub fn compile_one_pending_request(&self) -> bool {
        let Some(request) = self.shared.queue.pop() else {
            return false;
        };
        worker::compile_request(&self.shared, request);
        true
    }

    /// Number of queued compile requests.
    pub fn pending_count(&self) -> usize {
        self.shared.queue.len()
    }

    /// Snapshot controller counters.
    pub fn stats(&self) -> TierStatsSnapshot {
        let live = self.shared.records.len() as u64;
        let optimized = self
            .shared
            .records
            .iter()
            .filter(|record| record.value().is_optimized())
            .count() as u64;
        self.shared.stats.snapshot(live, optimized)
    }

    fn request_promotion(&self, record: &FunctionRecord) {
        let Some(baseline) = record.baseline_entry() else {
            return;
        };

        let request = CompileRequest {
            id: record.id(),
            name: record.name().map(str::to_string),
            invocations: record.invocations(),
            baseline,
        };

        self.shared.stats.record_request();
        self.shared.observer.on_event(&TierEvent::PromotionRequested {
            id: request.id,
            invocations: request.invocations,
        });

        let request = match &self.worker {
            Some(worker) => match worker.submit(request) {
                Ok(()) => return,
                Err(request) => request,
            },
            None => request,
        };

        if !self.shared.queue.enqueue(request) {
            tracing::debug!(function = %record.id(), "compile request already queued");
        }
    }
}

impl std::fmt::Debug for TieringController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieringController")
            .field("config", &self.shared.config)
            .field("functions", &self.shared.records.len())
            .field("background", &self.worker.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::constant_entry;
    use crate::error::CompileError;
    use crate::value::Trap;
    use parking_lot::Mutex;

    fn optimizing_generator(request: &CompileRequest) -> Result<EntryRef, CompileError> {
        Ok(constant_entry(100 + request.id.function_index as i32))
    }

    fn manual(budget: i64) -> TieringController {
        TieringController::new(TierConfig::manual(budget), optimizing_generator)
            .expect("manual config is valid")
    }

    #[test]
    fn promotes_after_budget_with_manual_drain() {
        let controller = manual(3);
        let f = controller.register("f", constant_entry(0));

        for _ in 0..3 {
            assert_eq!(controller.invoke(f, &[]), Ok(Value::I32(0)));
        }
        assert!(!controller.is_optimized(f));
        assert_eq!(controller.pending_count(), 0);

        assert_eq!(controller.invoke(f, &[]), Ok(Value::I32(0)));
        assert_eq!(controller.tier_state(f), Some(TierState::Promoting));
        assert_eq!(controller.pending_count(), 1);

        assert!(controller.compile_one_pending_request());
        assert!(controller.is_optimized(f));
        assert_eq!(controller.invoke(f, &[]), Ok(Value::I32(100)));
        assert!(!controller.compile_one_pending_request());
    }

    #[test]
    fn unknown_function_is_reported() {
        let controller = manual(3);
        let missing = FunctionId::new(999, 0);
        assert_eq!(
            controller.invoke(missing, &[]),
            Err(TierError::UnknownFunction(missing))
        );
        assert_eq!(
            controller.record_invocation(missing),
            Err(TierError::UnknownFunction(missing))
        );
        assert!(!controller.is_optimized(missing));
        assert!(controller.tier_state(missing).is_none());
    }

    #[test]
    fn traps_pass_through_and_still_count() {
        let controller = manual(1);
        let f = controller.register(
            "trapper",
            crate::entry::entry_fn(|_| Err(Trap::new("unreachable"))),
        );

        assert_eq!(
            controller.invoke(f, &[]),
            Err(TierError::Execution(Trap::new("unreachable")))
        );
        assert_eq!(controller.tier_state(f), Some(TierState::Baseline));
        assert!(controller.invoke(f, &[]).is_err());
        assert_eq!(controller.tier_state(f), Some(TierState::Promoting));

        let stats = controller.stats();
        assert_eq!(stats.invocations, 2);
        assert_eq!(stats.execution_failures, 2);
    }

    #[test]
    fn complete_promotion_requires_promoting_state() {
        let controller = manual(5);
        let f = controller.register("f", constant_entry(0));
        assert_eq!(
            controller.complete_promotion(f, constant_entry(1)),
            Err(TierError::NotPromoting {
                id: f,
                state: TierState::Baseline,
            })
        );
        assert_eq!(
            controller.fail_promotion(f, "nope"),
            Err(TierError::NotPromoting {
                id: f,
                state: TierState::Baseline,
            })
        );
    }

    #[test]
    fn external_completion_publishes_entry() {
        let controller = manual(0);
        let f = controller.register("f", constant_entry(0));
        controller.record_invocation(f).unwrap();
        assert_eq!(controller.tier_state(f), Some(TierState::Promoting));

        controller.complete_promotion(f, constant_entry(7)).unwrap();
        assert!(controller.is_optimized(f));
        assert_eq!(controller.invoke(f, &[]), Ok(Value::I32(7)));

        // The queued request now finds the record already optimized.
        assert!(controller.compile_one_pending_request());
        assert_eq!(controller.invoke(f, &[]), Ok(Value::I32(7)));
        assert_eq!(controller.stats().promotions_succeeded, 1);
    }

    #[test]
    fn observer_sees_request_and_outcome() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let controller = TieringController::builder(optimizing_generator)
            .config(TierConfig::manual(0))
            .observer(move |event: &TierEvent| sink.lock().push(event.clone()))
            .build()
            .unwrap();

        let f = controller.register("f", constant_entry(0));
        controller.invoke(f, &[]).unwrap();
        controller.compile_one_pending_request();

        let events = events.lock();
        assert_eq!(
            *events,
            vec![
                TierEvent::PromotionRequested {
                    id: f,
                    invocations: 1,
                },
                TierEvent::PromotionSucceeded { id: f },
            ]
        );
    }

    #[test]
    fn function_info_reports_counters() {
        let controller = manual(10);
        let f = controller.register("hot", constant_entry(0));
        for _ in 0..4 {
            controller.invoke(f, &[]).unwrap();
        }

        let info = controller.function_info(f).expect("record exists");
        assert_eq!(info.name.as_deref(), Some("hot"));
        assert_eq!(info.state, TierState::Baseline);
        assert_eq!(info.remaining_budget, 6);
        assert_eq!(info.invocations, 4);
        assert_eq!(info.failed_promotions, 0);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = TierConfig::manual(10).backoff_budget(1);
        assert!(matches!(
            TieringController::new(config, optimizing_generator),
            Err(TierError::InvalidConfig(_))
        ));
    }
}
