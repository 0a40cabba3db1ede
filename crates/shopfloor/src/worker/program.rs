use std::{sync::Arc, time::Instant};

use serde_json::json;
use tokio::sync::mpsc;

use super::{MethodRegistry, Reply, WorkerEvent};
use crate::{ErrorObject, Request, Response};

/// Runs one request against `methods` and builds its response.
///
/// - Unknown methods answer `-32601`.
/// - A method error that is an [`ErrorObject`] is answered verbatim.
/// - Any other method error answers `-32603` with the error's message.
/// - Successful results carry the method's own `extra` fields plus
///   `extra.time`, the processing time in milliseconds.
///
/// A panicking method is not caught here: it takes its worker down and the
/// transport reports the crash.
pub fn handle_request(methods: &MethodRegistry, request: Request) -> Response {
    let started = Instant::now();

    let Some(method) = methods.get(&request.method) else {
        return Response::err(request.id, ErrorObject::method_not_found(&request.method));
    };

    match method(&request.params) {
        Ok(Reply { result, mut extra }) => {
            extra.insert(
                "time".to_string(),
                json!(started.elapsed().as_secs_f64() * 1000.0),
            );
            Response::Ok {
                result,
                extra,
                id: request.id,
            }
        }
        Err(err) => match err.downcast::<ErrorObject>() {
            Ok(error) => Response::err(request.id, error),
            Err(err) => Response::err(request.id, ErrorObject::internal(format!("{err:#}"))),
        },
    }
}

/// Worker task body for the tokio task transport.
///
/// Processes requests one at a time, in arrival order, until the inbox is
/// closed or nobody listens to the outbox anymore.
pub async fn worker_loop(
    slot: usize,
    mut inbox: mpsc::Receiver<Request>,
    methods: Arc<MethodRegistry>,
    outbox: mpsc::UnboundedSender<WorkerEvent>,
) {
    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {slot} started");

    while let Some(request) = inbox.recv().await {
        let response = handle_request(&methods, request);
        if outbox.send(WorkerEvent::Message { slot, response }).is_err() {
            #[cfg(feature = "tracing")]
            tracing::debug!("Worker {slot} outbox closed, exiting");
            break;
        }
        // Give sibling workers a turn on single-threaded runtimes.
        tokio::task::yield_now().await;
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {slot} stopped");
}

/// Worker thread body for the OS thread transport.
pub fn blocking_worker_loop(
    slot: usize,
    mut inbox: mpsc::Receiver<Request>,
    methods: &MethodRegistry,
    outbox: &mpsc::UnboundedSender<WorkerEvent>,
) {
    #[cfg(feature = "tracing")]
    tracing::trace!("Worker thread {slot} started");

    while let Some(request) = inbox.blocking_recv() {
        let response = handle_request(methods, request);
        if outbox.send(WorkerEvent::Message { slot, response }).is_err() {
            break;
        }
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("Worker thread {slot} stopped");
}
