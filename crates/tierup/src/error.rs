//! Controller error types

use thiserror::Error;

use crate::record::{FunctionId, TierState};
use crate::value::Trap;

/// Errors surfaced by the tiering controller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TierError {
    /// No record is registered for the identity (never instantiated, or
    /// its module was torn down)
    #[error("unknown function {0}")]
    UnknownFunction(FunctionId),

    /// The executed entry trapped; carried unchanged
    #[error(transparent)]
    Execution(#[from] Trap),

    /// A promotion result arrived for a record that is not promoting
    #[error("function {id} is not promoting (state: {state})")]
    NotPromoting {
        /// Target function
        id: FunctionId,
        /// State observed at the time of the call
        state: TierState,
    },

    /// Rejected configuration
    #[error("invalid tiering config: {0}")]
    InvalidConfig(String),
}

/// Failure reported by a code generator. Never reaches callers of
/// `invoke`; it is only forwarded to the observer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// The generator rejected the function
    #[error("compilation failed: {0}")]
    Failed(String),

    /// The generator panicked
    #[error("code generator panicked: {0}")]
    Panicked(String),
}

/// Controller result alias.
pub type TierResult<T> = Result<T, TierError>;
