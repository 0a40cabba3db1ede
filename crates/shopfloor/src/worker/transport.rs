use std::{panic::AssertUnwindSafe, sync::Arc, thread};

use tokio::{runtime::Handle, sync::mpsc, task::AbortHandle};

use super::{MethodRegistry, blocking_worker_loop, worker_loop};
use crate::{Error, Request, Response, Result, error::panic_reason};

/// Something a worker reports back to its pool.
#[derive(Debug)]
pub enum WorkerEvent {
    /// A response to one request.
    Message { slot: usize, response: Response },
    /// The worker crashed or became unreachable. Carries no request id; the
    /// pool fails every request still outstanding on that slot.
    Failed { slot: usize, reason: String },
}

/// Lifecycle control over one launched worker.
pub trait WorkerControl: Send {
    /// Stops the worker. Requests it has not answered yet never will be.
    fn terminate(&mut self);
}

/// Launches worker programs behind message channels.
///
/// The pool owns both channel ends it needs: it keeps the sender for
/// `inbox` and the receiver for `outbox`. A transport only has to run a
/// program that drains `inbox` and answers on `outbox`.
pub trait Transport: Send + Sync + 'static {
    /// Starts the worker for `slot`.
    ///
    /// # Errors
    ///
    /// Returns an error if the execution unit cannot be created.
    fn launch(
        &self,
        slot: usize,
        inbox: mpsc::Receiver<Request>,
        outbox: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<Box<dyn WorkerControl>>;
}

/// Runs each worker as a task on the current tokio runtime.
///
/// Cheap to spawn and to terminate. Methods run on the runtime's threads, so
/// long CPU-bound methods are better served by [`ThreadTransport`].
#[derive(Debug, Clone)]
pub struct TaskTransport {
    methods: Arc<MethodRegistry>,
}

impl TaskTransport {
    pub fn new(methods: MethodRegistry) -> Self {
        Self {
            methods: Arc::new(methods),
        }
    }
}

struct TaskControl {
    abort: AbortHandle,
}

impl WorkerControl for TaskControl {
    fn terminate(&mut self) {
        self.abort.abort();
    }
}

impl Transport for TaskTransport {
    fn launch(
        &self,
        slot: usize,
        inbox: mpsc::Receiver<Request>,
        outbox: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<Box<dyn WorkerControl>> {
        let runtime = Handle::try_current().map_err(|e| Error::ChannelError {
            context: format!("cannot launch worker {slot} outside a tokio runtime: {e}"),
        })?;

        let worker = runtime.spawn(worker_loop(
            slot,
            inbox,
            Arc::clone(&self.methods),
            outbox.clone(),
        ));
        let abort = worker.abort_handle();

        // Supervisor: turn a panicking worker into a transport failure.
        runtime.spawn(async move {
            if let Err(e) = worker.await {
                if e.is_panic() {
                    let reason = panic_reason("worker", e.into_panic().as_ref());
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Worker {slot} crashed: {reason}");
                    let _ = outbox.send(WorkerEvent::Failed { slot, reason });
                }
            }
        });

        Ok(Box::new(TaskControl { abort }))
    }
}

/// Runs each worker on a dedicated OS thread.
///
/// Suited to CPU-bound methods. A thread cannot be killed mid-method:
/// termination detaches it, and it exits as soon as its inbox closes. Any
/// answer it still sends lands on a dead outbox and is dropped.
#[derive(Debug, Clone)]
pub struct ThreadTransport {
    methods: Arc<MethodRegistry>,
}

impl ThreadTransport {
    pub fn new(methods: MethodRegistry) -> Self {
        Self {
            methods: Arc::new(methods),
        }
    }
}

struct ThreadControl {
    handle: Option<thread::JoinHandle<()>>,
}

impl WorkerControl for ThreadControl {
    fn terminate(&mut self) {
        // Dropping the handle detaches the thread.
        self.handle.take();
    }
}

impl Transport for ThreadTransport {
    fn launch(
        &self,
        slot: usize,
        inbox: mpsc::Receiver<Request>,
        outbox: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<Box<dyn WorkerControl>> {
        let methods = Arc::clone(&self.methods);
        let handle = thread::Builder::new()
            .name(format!("shopfloor-worker-{slot}"))
            .spawn(move || {
                let run = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    blocking_worker_loop(slot, inbox, &methods, &outbox);
                }));
                if let Err(payload) = run {
                    let reason = panic_reason("worker", payload.as_ref());
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Worker thread {slot} crashed: {reason}");
                    let _ = outbox.send(WorkerEvent::Failed { slot, reason });
                }
            })
            .map_err(|e| Error::ChannelError {
                context: format!("cannot spawn worker thread {slot}: {e}"),
            })?;

        Ok(Box::new(ThreadControl {
            handle: Some(handle),
        }))
    }
}
