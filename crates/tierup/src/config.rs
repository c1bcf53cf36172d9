//! Tiering configuration.
//!
//! Budgets come from, in increasing priority: built-in defaults, a
//! deserialized config table, and `TIERUP_*` environment variables.

use serde::{Deserialize, Serialize};

use crate::error::{TierError, TierResult};

/// Invocations a function runs on baseline before its first promotion
/// attempt.
pub const DEFAULT_INITIAL_BUDGET: i64 = 1000;

/// Budget granted after a failed promotion.
pub const DEFAULT_BACKOFF_BUDGET: i64 = 4000;

/// Environment override for [`TierConfig::initial_budget`].
pub const ENV_INITIAL_BUDGET: &str = "TIERUP_INITIAL_BUDGET";
/// Environment override for [`TierConfig::backoff_budget`].
pub const ENV_BACKOFF_BUDGET: &str = "TIERUP_BACKOFF_BUDGET";
/// Environment override selecting background (truthy) or manual (falsy)
/// compilation.
pub const ENV_BACKGROUND: &str = "TIERUP_BACKGROUND";

/// Where optimized compilation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompileMode {
    /// Dedicated worker thread; promotion is published asynchronously
    #[default]
    Background,
    /// Requests queue up until the embedder calls
    /// `compile_one_pending_request`
    Manual,
}

/// Controller configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierConfig {
    /// Threshold before the first promotion attempt
    pub initial_budget: i64,
    /// Threshold after a failed promotion
    pub backoff_budget: i64,
    /// Compilation scheduling
    pub compile_mode: CompileMode,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            initial_budget: DEFAULT_INITIAL_BUDGET,
            backoff_budget: DEFAULT_BACKOFF_BUDGET,
            compile_mode: CompileMode::Background,
        }
    }
}

impl TierConfig {
    /// Create config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Manual compilation with the given initial budget. Backoff is four
    /// times the initial budget.
    pub fn manual(initial_budget: i64) -> Self {
        Self {
            initial_budget,
            backoff_budget: initial_budget.saturating_mul(4),
            compile_mode: CompileMode::Manual,
        }
    }

    /// Set the initial budget.
    pub fn initial_budget(mut self, budget: i64) -> Self {
        self.initial_budget = budget;
        self
    }

    /// Set the backoff budget.
    pub fn backoff_budget(mut self, budget: i64) -> Self {
        self.backoff_budget = budget;
        self
    }

    /// Set the compile mode.
    pub fn compile_mode(mut self, mode: CompileMode) -> Self {
        self.compile_mode = mode;
        self
    }

    /// Apply `TIERUP_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup. Unparsable or
    /// negative budgets are ignored.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(budget) = parse_budget(lookup(ENV_INITIAL_BUDGET)) {
            self.initial_budget = budget;
        }
        if let Some(budget) = parse_budget(lookup(ENV_BACKOFF_BUDGET)) {
            self.backoff_budget = budget;
        }
        if let Some(value) = lookup(ENV_BACKGROUND) {
            self.compile_mode = if parse_truthy(&value) {
                CompileMode::Background
            } else {
                CompileMode::Manual
            };
        }
        self
    }

    /// Check budget bounds.
    pub fn validate(&self) -> TierResult<()> {
        if self.initial_budget < 0 {
            return Err(TierError::InvalidConfig(format!(
                "initial_budget must be non-negative, got {}",
                self.initial_budget
            )));
        }
        if self.backoff_budget < self.initial_budget {
            return Err(TierError::InvalidConfig(format!(
                "backoff_budget ({}) must not be smaller than initial_budget ({})",
                self.backoff_budget, self.initial_budget
            )));
        }
        Ok(())
    }
}

fn parse_truthy(value: &str) -> bool {
    let value = value.trim();
    !matches!(value, "" | "0")
        && !value.eq_ignore_ascii_case("false")
        && !value.eq_ignore_ascii_case("off")
        && !value.eq_ignore_ascii_case("no")
}

fn parse_budget(value: Option<String>) -> Option<i64> {
    value
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|budget| *budget >= 0)
}
