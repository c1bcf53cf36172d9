//! Promotion events and the observer they are reported to.

use serde::Serialize;

use crate::record::FunctionId;

/// A tier transition worth reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TierEvent {
    /// Budget exhausted, optimized compilation requested
    PromotionRequested {
        /// Promoted function
        id: FunctionId,
        /// Invocations seen when the budget ran out
        invocations: u64,
    },
    /// Optimized entry published
    PromotionSucceeded {
        /// Promoted function
        id: FunctionId,
    },
    /// Compilation failed; the function stays on baseline
    PromotionFailed {
        /// Function that failed to promote
        id: FunctionId,
        /// Generator-supplied reason
        reason: String,
        /// Budget granted before the next attempt
        next_budget: i64,
    },
}

impl TierEvent {
    /// Function the event is about.
    pub fn function(&self) -> FunctionId {
        match self {
            TierEvent::PromotionRequested { id, .. }
            | TierEvent::PromotionSucceeded { id }
            | TierEvent::PromotionFailed { id, .. } => *id,
        }
    }
}

/// Receives tier events. Called on whichever thread caused the transition
/// (caller threads for requests, the compile worker for outcomes), so
/// implementations must be cheap and must not call back into the
/// controller's promotion operations.
pub trait TierObserver: Send + Sync {
    /// Handle one event.
    fn on_event(&self, event: &TierEvent);
}

impl<F> TierObserver for F
where
    F: Fn(&TierEvent) + Send + Sync,
{
    fn on_event(&self, event: &TierEvent) {
        self(event)
    }
}

/// Default observer: forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl TierObserver for TracingObserver {
    fn on_event(&self, event: &TierEvent) {
        match event {
            TierEvent::PromotionRequested { id, invocations } => {
                tracing::debug!(function = %id, invocations, "tier-up requested");
            }
            TierEvent::PromotionSucceeded { id } => {
                tracing::debug!(function = %id, "optimized entry published");
            }
            TierEvent::PromotionFailed {
                id,
                reason,
                next_budget,
            } => {
                tracing::warn!(
                    function = %id,
                    next_budget,
                    "tier-up failed, staying on baseline: {}",
                    reason
                );
            }
        }
    }
}
