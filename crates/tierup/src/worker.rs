use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};

use crate::controller::ControllerShared;
use crate::error::CompileError;
use crate::queue::CompileRequest;

const WORKER_THREAD_NAME: &str = "tierup-compile";

/// Dedicated thread running optimized compilation off the call path.
pub(crate) struct BackgroundCompileWorker {
    request_tx: Option<Sender<CompileRequest>>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundCompileWorker {
    /// Spawn the worker. Returns `None` if the thread cannot be created.
    pub(crate) fn spawn(shared: Arc<ControllerShared>) -> Option<Self> {
        let (request_tx, request_rx) = crossbeam_channel::unbounded::<CompileRequest>();

        let spawn_result = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || run_background_worker(request_rx, shared));

        match spawn_result {
            Ok(handle) => Some(Self {
                request_tx: Some(request_tx),
                handle: Some(handle),
            }),
            Err(err) => {
                tracing::warn!("failed to spawn {WORKER_THREAD_NAME} thread: {err}");
                None
            }
        }
    }

    /// Hand a request to the worker. Gives the request back if the worker
    /// is gone.
    pub(crate) fn submit(&self, request: CompileRequest) -> Result<(), CompileRequest> {
        match &self.request_tx {
            Some(tx) => tx.send(request).map_err(|err| err.0),
            None => Err(request),
        }
    }
}

impl Drop for BackgroundCompileWorker {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop once queued requests drain.
        self.request_tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("{WORKER_THREAD_NAME} thread panicked");
            }
        }
    }
}

fn run_background_worker(request_rx: Receiver<CompileRequest>, shared: Arc<ControllerShared>) {
    tracing::debug!("{WORKER_THREAD_NAME} started");
    for request in request_rx {
        compile_request(&shared, request);
    }
    tracing::debug!("{WORKER_THREAD_NAME} stopped");
}

/// Run the generator for one request and feed the outcome back into the
/// controller. Generator panics count as compile failures.
pub(crate) fn compile_request(shared: &ControllerShared, request: CompileRequest) {
    let id = request.id;

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        shared.generator().compile_optimized(&request)
    }))
    .unwrap_or_else(|payload| Err(CompileError::Panicked(panic_message(payload.as_ref()))));

    let result = match outcome {
        Ok(entry) => shared.complete_promotion(id, entry),
        Err(err) => shared.fail_promotion(id, err.to_string()),
    };

    if let Err(err) = result {
        // Module torn down (or promotion resolved elsewhere) while compiling.
        tracing::debug!(function = %id, "discarding compile result: {err}");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_message_extracts_strings() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(panic_message(payload.as_ref()), "owned boom");

        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }
}
