use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashSet;

use crate::entry::EntryRef;
use crate::error::CompileError;
use crate::record::FunctionId;

/// Work handed to the code generator when a function runs out of budget.
#[derive(Clone)]
pub struct CompileRequest {
    /// Function to optimize
    pub id: FunctionId,
    /// Export name, if any
    pub name: Option<String>,
    /// Invocations seen when the request was made
    pub invocations: u64,
    /// Entry the optimized code must be equivalent to
    pub baseline: EntryRef,
}

impl fmt::Debug for CompileRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompileRequest")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("invocations", &self.invocations)
            .finish_non_exhaustive()
    }
}

/// Produces optimized entries.
pub trait CodeGenerator: Send + Sync {
    /// Compile the optimized tier for `request`.
    fn compile_optimized(&self, request: &CompileRequest) -> Result<EntryRef, CompileError>;
}

impl<F> CodeGenerator for F
where
    F: Fn(&CompileRequest) -> Result<EntryRef, CompileError> + Send + Sync,
{
    fn compile_optimized(&self, request: &CompileRequest) -> Result<EntryRef, CompileError> {
        self(request)
    }
}

/// Shared generator handle.
pub type GeneratorRef = Arc<dyn CodeGenerator>;

#[derive(Default)]
struct CompileQueueState {
    pending: VecDeque<CompileRequest>,
    enqueued: FxHashSet<FunctionId>,
}

/// FIFO of compile requests awaiting a manual drain.
#[derive(Default)]
pub(crate) struct CompileQueue {
    state: Mutex<CompileQueueState>,
}

impl CompileQueue {
    /// Enqueue a request. Returns `false` if one is already queued for the
    /// same function.
    pub(crate) fn enqueue(&self, request: CompileRequest) -> bool {
        let mut state = self.state.lock();
        if !state.enqueued.insert(request.id) {
            return false;
        }
        state.pending.push_back(request);
        true
    }

    pub(crate) fn pop(&self) -> Option<CompileRequest> {
        let mut state = self.state.lock();
        let next = state.pending.pop_front()?;
        state.enqueued.remove(&next.id);
        Some(next)
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Drop queued requests for a torn-down module.
    pub(crate) fn remove_module(&self, module_id: u64) -> usize {
        let mut state = self.state.lock();
        let before = state.pending.len();
        state.pending.retain(|req| req.id.module_id != module_id);
        state.enqueued.retain(|id| id.module_id != module_id);
        before - state.pending.len()
    }
}
