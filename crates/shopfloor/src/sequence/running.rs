use core::{
    future::Future,
    pin::Pin,
    task::{Context, Poll, ready},
};

use pin_project_lite::pin_project;
use serde_json::Value;
use tokio::{sync::watch, task::JoinHandle};

use crate::{Error, Result};

/// Where a running instance is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    /// The chain is still executing (or waiting for the pool lease).
    Fired,
    /// The chain settled with a value.
    Succeeded,
    /// The chain settled with an error, or its driver task died.
    Failed,
}

impl InstanceStatus {
    pub const fn is_settled(self) -> bool {
        !matches!(self, Self::Fired)
    }
}

pin_project! {
    /// A fired instance of a [`Sequence`](crate::Sequence).
    ///
    /// Awaiting it yields the chain's final value. Dropping it does not stop
    /// the instance: it keeps running to completion in the background and
    /// still runs its teardown.
    #[must_use = "a running instance's outcome is lost unless awaited"]
    pub struct Running {
        instance: u64,
        status: watch::Receiver<InstanceStatus>,
        #[pin]
        driver: JoinHandle<Result<Value>>,
    }
}

impl Running {
    pub(super) const fn new(
        instance: u64,
        status: watch::Receiver<InstanceStatus>,
        driver: JoinHandle<Result<Value>>,
    ) -> Self {
        Self {
            instance,
            status,
            driver,
        }
    }

    /// The 1-based number of this instance among those fired from the same
    /// template.
    pub const fn instance(&self) -> u64 {
        self.instance
    }

    pub fn status(&self) -> InstanceStatus {
        // Read `finished` first: the driver reports before it finishes.
        let finished = self.driver.is_finished();
        match *self.status.borrow() {
            // Ended without reporting: it panicked or was cancelled.
            InstanceStatus::Fired if finished => InstanceStatus::Failed,
            status => status,
        }
    }
}

impl Future for Running {
    type Output = Result<Value>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match ready!(this.driver.poll(cx)) {
            Ok(outcome) => Poll::Ready(outcome),
            Err(e) => Poll::Ready(Err(Error::Instance {
                reason: e.to_string(),
            })),
        }
    }
}
