//! Call arguments, results and traps.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A scalar passed to or returned from an executable entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// 32-bit integer
    I32(i32),
    /// 64-bit integer
    I64(i64),
    /// 32-bit float
    F32(f32),
    /// 64-bit float
    F64(f64),
}

impl Value {
    /// Returns the value as `i32` if it is an `I32`.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value as `i64` if it is an `I64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// Type name used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::I32(v) => write!(f, "{v}:i32"),
            Value::I64(v) => write!(f, "{v}:i64"),
            Value::F32(v) => write!(f, "{v}:f32"),
            Value::F64(v) => write!(f, "{v}:f64"),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::F32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

/// Failure raised by an executing entry.
///
/// The controller never interprets a trap; it is handed back to the caller
/// exactly as the entry produced it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("trap: {message}")]
pub struct Trap {
    /// Human-readable trap description
    pub message: String,
}

impl Trap {
    /// Create a trap with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_match_variant() {
        assert_eq!(Value::I32(7).as_i32(), Some(7));
        assert_eq!(Value::I64(7).as_i32(), None);
        assert_eq!(Value::I64(-2).as_i64(), Some(-2));
        assert_eq!(Value::F64(1.5).type_name(), "f64");
    }

    #[test]
    fn trap_display_carries_message() {
        let trap = Trap::new("unreachable executed");
        assert_eq!(trap.to_string(), "trap: unreachable executed");
    }
}
