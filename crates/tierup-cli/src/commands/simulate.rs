//! Simulate command - drive a synthetic module until its hot functions tier up.
//!
//! Function `f{i}` returns `i` on both tiers. The first `hot` functions are
//! called `calls` times each; the rest are called a handful of times and
//! should stay on baseline.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use clap::Args;
use parking_lot::Mutex;
use serde::Serialize;
use tierup::{
    CodeGenerator, CompileError, CompileMode, CompileRequest, EntryRef, FunctionId, FunctionInfo,
    Module, TierConfig, TierStatsSnapshot, TieringController, Value, constant_entry, entry_fn,
};

use crate::config::Config;

/// Calls issued to each cold function.
const COLD_CALLS: u64 = 3;

/// How long to wait for background promotions to publish.
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Args)]
pub struct SimulateCommand {
    /// Functions in the module
    #[arg(long)]
    pub functions: Option<u32>,

    /// Functions driven hot
    #[arg(long)]
    pub hot: Option<u32>,

    /// Calls per hot function
    #[arg(long)]
    pub calls: Option<u64>,

    /// Caller threads per hot function
    #[arg(long)]
    pub threads: Option<u32>,

    /// Simulated compile latency in milliseconds
    #[arg(long)]
    pub compile_ms: Option<u64>,

    /// Fail the first compile attempt of every function
    #[arg(long)]
    pub fail_first: bool,
}

#[derive(Serialize)]
struct Report<'a> {
    tiering: &'a TierConfig,
    elapsed_ms: u128,
    wrong_results: u64,
    functions: Vec<FunctionInfo>,
    stats: TierStatsSnapshot,
}

/// Optimized entries wrap the baseline, so both tiers agree.
struct SyntheticGenerator {
    latency: Duration,
    fail_first: bool,
    attempted: Mutex<HashSet<FunctionId>>,
}

impl CodeGenerator for SyntheticGenerator {
    fn compile_optimized(&self, request: &CompileRequest) -> Result<EntryRef, CompileError> {
        thread::sleep(self.latency);

        if self.fail_first && self.attempted.lock().insert(request.id) {
            return Err(CompileError::Failed(format!(
                "synthetic failure for {}",
                request.name.as_deref().unwrap_or("<anonymous>")
            )));
        }

        let baseline = request.baseline.clone();
        Ok(entry_fn(move |args| baseline.call(args)))
    }
}

impl SimulateCommand {
    pub fn run(&self, config: &Config) -> Result<()> {
        let functions = self.functions.unwrap_or(config.simulate.functions);
        let hot = self.hot.unwrap_or(config.simulate.hot);
        let calls = self.calls.unwrap_or(config.simulate.calls);
        let threads = self.threads.unwrap_or(config.simulate.threads).max(1);
        let compile_ms = self.compile_ms.unwrap_or(config.simulate.compile_ms);

        if hot > functions {
            bail!("--hot ({hot}) cannot exceed --functions ({functions})");
        }

        let generator = SyntheticGenerator {
            latency: Duration::from_millis(compile_ms),
            fail_first: self.fail_first,
            attempted: Default::default(),
        };
        let controller = TieringController::new(config.tiering.clone(), generator)?;

        let mut builder = Module::builder("simulate.wasm");
        for i in 0..functions {
            builder.add_function(format!("f{i}"), constant_entry(i as i32));
        }
        let instance = controller.instantiate(builder.build());
        let ids = instance.functions().to_vec();

        tracing::info!(
            functions,
            hot,
            calls,
            threads,
            initial_budget = config.tiering.initial_budget,
            "starting simulation"
        );

        let started = Instant::now();
        let wrong_results = AtomicU64::new(0);
        let manual = config.tiering.compile_mode == CompileMode::Manual;

        thread::scope(|scope| {
            for (index, &id) in ids.iter().enumerate() {
                let is_hot = (index as u32) < hot;
                let (workers, per_worker) = if is_hot {
                    (threads, calls.div_ceil(threads as u64))
                } else {
                    (1, COLD_CALLS)
                };
                for _ in 0..workers {
                    let controller = &controller;
                    let wrong_results = &wrong_results;
                    scope.spawn(move || {
                        drive(controller, id, index as i32, per_worker, manual, wrong_results)
                    });
                }
            }
        });

        if manual {
            while controller.compile_one_pending_request() {}
        }
        let hot_ids: HashSet<FunctionId> = ids.iter().take(hot as usize).copied().collect();
        for id in &hot_ids {
            if !controller.wait_for_optimized(*id, PUBLISH_TIMEOUT) {
                tracing::warn!(function = %id, "hot function did not tier up");
            }
        }

        let report = Report {
            tiering: &config.tiering,
            elapsed_ms: started.elapsed().as_millis(),
            wrong_results: wrong_results.load(Ordering::Relaxed),
            functions: ids
                .iter()
                .filter_map(|id| controller.function_info(*id))
                .collect(),
            stats: controller.stats(),
        };

        tracing::info!(
            optimized = report.stats.optimized_functions,
            failed = report.stats.promotions_failed,
            "simulation finished"
        );
        println!("{}", serde_json::to_string_pretty(&report)?);

        if report.wrong_results > 0 {
            bail!("{} calls returned a wrong result", report.wrong_results);
        }
        Ok(())
    }
}

fn drive(
    controller: &TieringController,
    id: FunctionId,
    expected: i32,
    calls: u64,
    manual: bool,
    wrong_results: &AtomicU64,
) {
    for _ in 0..calls {
        match controller.invoke(id, &[]) {
            Ok(Value::I32(value)) if value == expected => {}
            Ok(other) => {
                tracing::error!(function = %id, "expected {expected}, got {other}");
                wrong_results.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                tracing::error!(function = %id, "invoke failed: {err}");
                wrong_results.fetch_add(1, Ordering::Relaxed);
            }
        }
        if manual {
            controller.compile_one_pending_request();
        }
    }
}
