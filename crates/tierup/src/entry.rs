//! Executable entries and the tiers they belong to.

use std::fmt;
use std::sync::Arc;

use crate::value::{Trap, Value};

/// An executable unit callable for a given function identity.
///
/// Baseline and optimized entries of the same function must be behaviorally
/// equivalent: the controller may route a call to either while a promotion
/// is being published.
pub trait Entry: Send + Sync {
    /// Execute the entry.
    fn call(&self, args: &[Value]) -> Result<Value, Trap>;
}

impl<F> Entry for F
where
    F: Fn(&[Value]) -> Result<Value, Trap> + Send + Sync,
{
    fn call(&self, args: &[Value]) -> Result<Value, Trap> {
        self(args)
    }
}

/// Shared handle to an entry. Cloning bumps the refcount that keeps the
/// entry alive for in-flight invocations.
pub type EntryRef = Arc<dyn Entry>;

/// Wrap a closure as a shared entry.
pub fn entry_fn<F>(f: F) -> EntryRef
where
    F: Fn(&[Value]) -> Result<Value, Trap> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Entry that ignores its arguments and returns a constant.
pub fn constant_entry(value: impl Into<Value>) -> EntryRef {
    let value = value.into();
    entry_fn(move |_| Ok(value))
}

/// Compiled representation tier.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum Tier {
    /// Fast to compile, slow to execute
    Baseline = 0,
    /// Slow to compile, fast to execute
    Optimized = 1,
}

impl Tier {
    /// Tier name.
    pub fn name(self) -> &'static str {
        match self {
            Tier::Baseline => "baseline",
            Tier::Optimized => "optimized",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The entry currently visible to callers, tagged with its tier.
#[derive(Clone)]
pub(crate) struct PublishedEntry {
    pub(crate) entry: EntryRef,
    pub(crate) tier: Tier,
}

impl PublishedEntry {
    pub(crate) fn baseline(entry: EntryRef) -> Self {
        Self {
            entry,
            tier: Tier::Baseline,
        }
    }

    pub(crate) fn optimized(entry: EntryRef) -> Self {
        Self {
            entry,
            tier: Tier::Optimized,
        }
    }
}

impl fmt::Debug for PublishedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublishedEntry")
            .field("tier", &self.tier)
            .field("refs", &Arc::strong_count(&self.entry))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_are_entries() {
        let add = entry_fn(|args: &[Value]| {
            let a = args.first().and_then(Value::as_i32).unwrap_or(0);
            let b = args.get(1).and_then(Value::as_i32).unwrap_or(0);
            Ok(Value::I32(a + b))
        });
        assert_eq!(
            add.call(&[Value::I32(2), Value::I32(40)]),
            Ok(Value::I32(42))
        );
    }

    #[test]
    fn constant_entry_ignores_args() {
        let entry = constant_entry(5);
        assert_eq!(entry.call(&[Value::F64(1.0)]), Ok(Value::I32(5)));
    }
}
