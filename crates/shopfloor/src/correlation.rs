//! Outstanding-request bookkeeping.
//!
//! The [`CorrelationTable`] maps every in-flight [`RequestId`] to the sending
//! half of a oneshot channel. The caller keeps the receiving half wrapped in a
//! [`Pending`] future, which completes once the pool routes the matching
//! response (or a transport failure) back through the table.

use core::{
    future::Future,
    pin::Pin,
    task::{Context, Poll, ready},
};
use std::collections::HashMap;

use parking_lot::Mutex;
use pin_project_lite::pin_project;
use tokio::sync::oneshot;

use crate::{Error, RequestId, Response};

/// How a single request ended: a worker response (which may itself be an
/// error response), or a failure that prevented any response.
pub type Settlement = Result<Response, Error>;

pin_project! {
    /// A handle on one outstanding request.
    ///
    /// Resolves to the request's [`Settlement`]. If the table drops the entry
    /// without settling it (the pool was closed), the handle resolves to
    /// [`Error::Abandoned`] instead of hanging forever.
    #[must_use = "a pending request does nothing unless awaited"]
    pub struct Pending {
        id: RequestId,
        #[pin]
        rx: oneshot::Receiver<Settlement>,
    }
}

impl Pending {
    pub const fn id(&self) -> RequestId {
        self.id
    }

    /// A handle that is already settled, for requests that failed before
    /// they could be registered.
    pub(crate) fn settled(id: RequestId, settlement: Settlement) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(settlement);
        Self { id, rx }
    }
}

impl Future for Pending {
    type Output = Settlement;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match ready!(this.rx.poll(cx)) {
            Ok(settlement) => Poll::Ready(settlement),
            Err(_) => Poll::Ready(Err(Error::Abandoned { id: *this.id })),
        }
    }
}

/// Maps outstanding request ids to their pending handles.
///
/// Settling an id that is not registered (stale after a respawn, or already
/// settled) is a no-op. Access is synchronized so the pool's event router and
/// the dispatching task can share one table.
#[derive(Default)]
pub struct CorrelationTable {
    entries: Mutex<HashMap<RequestId, oneshot::Sender<Settlement>>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `id` and returns the handle that will observe its
    /// settlement.
    ///
    /// Ids are unique by construction; registering one twice is a bug. In
    /// release builds the newer registration wins and the older handle
    /// resolves as abandoned.
    pub fn register(&self, id: RequestId) -> Pending {
        let (tx, rx) = oneshot::channel();
        let previous = self.entries.lock().insert(id, tx);
        debug_assert!(previous.is_none(), "request id {id} registered twice");
        Pending { id, rx }
    }

    /// Resolves `id` with a worker response. Returns `false` if the id is
    /// not outstanding.
    pub fn settle(&self, id: RequestId, response: Response) -> bool {
        self.complete(id, Ok(response))
    }

    /// Fails `id` without a response. Returns `false` if the id is not
    /// outstanding.
    pub fn reject(&self, id: RequestId, error: Error) -> bool {
        self.complete(id, Err(error))
    }

    /// Forgets `id`; its handle resolves as abandoned.
    pub fn abandon(&self, id: RequestId) -> bool {
        self.entries.lock().remove(&id).is_some()
    }

    /// Fails every outstanding request addressed to `slot` with a transport
    /// error. Returns how many were rejected.
    pub fn reject_slot(&self, slot: usize, reason: &str) -> usize {
        let rejected: Vec<_> = {
            let mut entries = self.entries.lock();
            let ids: Vec<_> = entries.keys().filter(|id| id.slot == slot).copied().collect();
            ids.into_iter()
                .filter_map(|id| entries.remove(&id).map(|tx| (id, tx)))
                .collect()
        };

        let count = rejected.len();
        for (id, tx) in rejected {
            let _ = tx.send(Err(Error::Transport {
                id,
                reason: reason.to_string(),
            }));
        }
        count
    }

    /// Forgets every outstanding request. Returns how many were dropped.
    pub fn abandon_all(&self) -> usize {
        let drained: Vec<_> = self.entries.lock().drain().collect();
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn complete(&self, id: RequestId, settlement: Settlement) -> bool {
        // Release the lock before waking the receiver.
        let Some(tx) = self.entries.lock().remove(&id) else {
            return false;
        };
        // The caller may have stopped waiting; that is not our concern.
        let _ = tx.send(settlement);
        true
    }
}
