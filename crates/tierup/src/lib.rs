//! # tierup
//!
//! Budget-driven tiered execution:
//! - per-function invocation budgets charged on every call
//! - single-winner Baseline -> Promoting transition when a budget runs out
//! - background (or manually drained) optimized compilation
//! - atomic publication of the optimized entry without blocking callers

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod config;
mod controller;
pub mod entry;
pub mod error;
pub mod events;
pub mod module;
mod queue;
pub mod record;
mod stats;
pub mod value;
mod worker;

pub use config::{CompileMode, TierConfig};
pub use controller::{FunctionInfo, TieringController, TieringControllerBuilder};
pub use entry::{Entry, EntryRef, Tier, constant_entry, entry_fn};
pub use error::{CompileError, TierError, TierResult};
pub use events::{TierEvent, TierObserver, TracingObserver};
pub use module::{FunctionDef, Instance, Module, ModuleBuilder};
pub use queue::{CodeGenerator, CompileRequest, GeneratorRef};
pub use record::{FunctionId, TierState};
pub use stats::TierStatsSnapshot;
pub use value::{Trap, Value};
