//! Fixed-size pool of message-passing workers.
//!
//! This module defines [`Pool`], which owns a set of worker slots launched
//! through a [`Transport`], hands out correlation ids, and routes every worker
//! event back into its [`CorrelationTable`].
//!
//! Each call to [`Pool::spawn`] starts a new *generation*: fresh workers, a
//! fresh event router and a fresh [`CancellationToken`]. Closing a generation
//! cancels its router, terminates its workers and abandons whatever was still
//! in flight. Request ids keep counting across generations, so a late answer
//! from a previous generation can never match a current request.

use core::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use portable_atomic::{AtomicU64, Ordering};
use serde_json::Value;
use tokio::{
    runtime::Handle,
    sync::{Mutex as AsyncMutex, OwnedMutexGuard, mpsc},
};
use tokio_util::sync::CancellationToken;

use super::PoolConfig;
use crate::{
    CorrelationTable, EqualSplit, Error, Pending, Raster, Request, RequestId, Result, RowRange,
    Sequence, Transport, Weighted, WorkerControl, WorkerEvent,
};

/// Partitioning options for the `Pool::shard*` helpers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShardOptions {
    /// Number of parts; defaults to the pool size.
    pub chunks: Option<usize>,
    /// Hand out bare elements instead of one-element arrays (equal split
    /// only; requires one element per chunk).
    pub unary: bool,
}

impl ShardOptions {
    #[must_use]
    pub const fn chunks(mut self, chunks: usize) -> Self {
        self.chunks = Some(chunks);
        self
    }

    #[must_use]
    pub const fn unary(mut self) -> Self {
        self.unary = true;
        self
    }
}

/// A live worker position.
struct WorkerSlot {
    index: usize,
    inbox: mpsc::Sender<Request>,
    control: Box<dyn WorkerControl>,
}

/// One spawned set of workers and the router listening to them.
struct Generation {
    #[cfg_attr(not(feature = "tracing"), allow(dead_code))]
    number: u64,
    slots: Vec<WorkerSlot>,
    shutdown: CancellationToken,
}

impl Generation {
    fn terminate(mut self) {
        self.shutdown.cancel();
        for slot in &mut self.slots {
            slot.control.terminate();
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(
            "Terminated generation {} ({} workers)",
            self.number,
            self.slots.len()
        );
    }
}

struct Inner {
    config: PoolConfig,
    transport: Arc<dyn Transport>,
    table: Arc<CorrelationTable>,
    next_seq: AtomicU64,
    generations: AtomicU64,
    live: Mutex<Option<Generation>>,
    lease: Arc<AsyncMutex<()>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(generation) = self.live.get_mut().take() {
            generation.terminate();
        }
    }
}

/// A fixed-size pool of isolated workers.
///
/// `Pool` is a cheap, clonable handle; clones share the same workers. The
/// workers are terminated when the last handle is dropped or on
/// [`Pool::close`].
///
/// Only one [`Sequence`] instance runs against a pool at a time: firing a
/// sequence respawns the pool, so instances take turns through an internal
/// lease instead of tearing down each other's workers.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<Inner>,
}

impl Pool {
    /// Creates a pool with no live workers; call [`Pool::spawn`] (or fire a
    /// sequence) to start them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config` does not validate.
    pub fn new(config: PoolConfig, transport: impl Transport) -> Result<Self> {
        config.validate()?;
        let id_base = config.id_base;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                transport: Arc::new(transport),
                table: Arc::new(CorrelationTable::new()),
                next_seq: AtomicU64::new(id_base),
                generations: AtomicU64::new(0),
                live: Mutex::new(None),
                lease: Arc::new(AsyncMutex::new(())),
            }),
        })
    }

    /// Creates a pool of `size` workers with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `size` is zero.
    pub fn with_size(size: usize, transport: impl Transport) -> Result<Self> {
        Self::new(PoolConfig::new(size), transport)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Number of worker slots.
    pub fn size(&self) -> usize {
        self.inner.config.size
    }

    /// Whether a generation of workers is running.
    pub fn is_live(&self) -> bool {
        self.inner.live.lock().is_some()
    }

    /// Number of generations spawned so far.
    pub fn generation(&self) -> u64 {
        self.inner.generations.load(Ordering::Acquire)
    }

    /// Number of requests dispatched and not yet settled.
    pub fn outstanding(&self) -> usize {
        self.inner.table.len()
    }

    /// Launches `size` fresh workers and starts routing their events.
    ///
    /// A running generation is closed first, so `spawn` doubles as respawn.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no tokio runtime or the transport fails
    /// to launch a worker. Workers launched before the failure are
    /// terminated.
    pub fn spawn(&self) -> Result<()> {
        let runtime = Handle::try_current().map_err(|e| Error::ChannelError {
            context: format!("cannot spawn workers outside a tokio runtime: {e}"),
        })?;

        let mut live = self.inner.live.lock();
        if let Some(previous) = live.take() {
            previous.terminate();
            self.abandon_in_flight();
        }

        let number = self.inner.generations.fetch_add(1, Ordering::AcqRel) + 1;
        let (outbox, events) = mpsc::unbounded_channel();
        let mut generation = Generation {
            number,
            slots: Vec::with_capacity(self.size()),
            shutdown: CancellationToken::new(),
        };

        for index in 0..self.size() {
            let (inbox, rx) = mpsc::channel(self.inner.config.inbox_capacity);
            match self.inner.transport.launch(index, rx, outbox.clone()) {
                Ok(control) => generation.slots.push(WorkerSlot {
                    index,
                    inbox,
                    control,
                }),
                Err(e) => {
                    generation.terminate();
                    return Err(e);
                }
            }
        }

        runtime.spawn(route_events(
            number,
            Arc::clone(&self.inner.table),
            events,
            generation.shutdown.clone(),
        ));

        #[cfg(feature = "tracing")]
        tracing::debug!("Spawned generation {number} with {} workers", self.size());

        *live = Some(generation);
        Ok(())
    }

    /// Terminates every worker. Requests still in flight are abandoned:
    /// their handles resolve to [`Error::Abandoned`].
    pub fn close(&self) {
        let previous = self.inner.live.lock().take();
        if let Some(generation) = previous {
            generation.terminate();
            self.abandon_in_flight();
        }
    }

    /// Closes and re-spawns the pool.
    ///
    /// # Errors
    ///
    /// See [`Pool::spawn`].
    pub fn respawn(&self) -> Result<()> {
        self.close();
        self.spawn()
    }

    /// Sends one request to `slot` and returns the handle that observes its
    /// settlement.
    ///
    /// Failures to deliver are reported through the handle, never as a
    /// panic: a dead worker fails only this request, and a closed pool
    /// settles it with [`Error::PoolClosed`].
    pub async fn dispatch(&self, slot: usize, method: &str, params: Value) -> Pending {
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let id = RequestId::new(slot, seq);

        let inbox = {
            let live = self.inner.live.lock();
            match live.as_ref() {
                None => return Pending::settled(id, Err(Error::PoolClosed)),
                Some(generation) => generation
                    .slots
                    .iter()
                    .find(|s| s.index == slot)
                    .map(|s| s.inbox.clone()),
            }
        };

        let Some(inbox) = inbox else {
            return Pending::settled(
                id,
                Err(Error::ChannelError {
                    context: format!("no worker slot {slot} in a pool of {}", self.size()),
                }),
            );
        };

        let pending = self.inner.table.register(id);
        #[cfg(feature = "tracing")]
        tracing::trace!("Dispatching {method} as {id}");

        if inbox.send(Request::new(method, params, id)).await.is_err() {
            self.inner.table.reject(
                id,
                Error::Transport {
                    id,
                    reason: format!("worker {slot} inbox is closed"),
                },
            );
        }

        pending
    }

    /// Equal-split partitioner over `data`.
    ///
    /// # Errors
    ///
    /// See [`EqualSplit::new`] and [`EqualSplit::unary`].
    pub fn shard(&self, data: Vec<Value>, options: ShardOptions) -> Result<EqualSplit> {
        let chunks = options.chunks.unwrap_or(self.size());
        if options.unary {
            EqualSplit::unary(data, chunks)
        } else {
            EqualSplit::new(data, chunks)
        }
    }

    /// Weight-balanced partitioner over `items`.
    ///
    /// # Errors
    ///
    /// See [`Weighted::new`].
    pub fn shard_weighted<F>(
        &self,
        items: Vec<Value>,
        options: ShardOptions,
        weight: F,
    ) -> Result<Weighted>
    where
        F: Fn(&Value) -> f64,
    {
        Weighted::new(items, options.chunks.unwrap_or(self.size()), weight)
    }

    /// Row-band partitioner over `raster`.
    ///
    /// # Errors
    ///
    /// See [`RowRange::new`].
    pub fn shard_rows(&self, raster: Raster, options: ShardOptions) -> Result<RowRange> {
        RowRange::new(raster, options.chunks.unwrap_or(self.size()))
    }

    /// Starts a sequence template on this pool.
    ///
    /// `setup` runs each time an instance is fired, before the pool is
    /// respawned; `teardown` runs once that instance settles.
    pub fn sequence<S, T>(&self, setup: S, teardown: T) -> Sequence
    where
        S: Fn(&Self) + Send + Sync + 'static,
        T: Fn(&Self) + Send + Sync + 'static,
    {
        Sequence::new(self.clone()).setup(setup).teardown(teardown)
    }

    pub(crate) async fn lease(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.inner.lease).lock_owned().await
    }

    fn abandon_in_flight(&self) {
        let _abandoned = self.inner.table.abandon_all();
        #[cfg(feature = "tracing")]
        if _abandoned > 0 {
            tracing::debug!("Abandoned {_abandoned} in-flight requests");
        }
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.inner.config)
            .field("generation", &self.generation())
            .field("live", &self.is_live())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

/// Routes worker events of one generation into the correlation table until
/// the generation is cancelled or every worker is gone.
async fn route_events(
    _generation: u64,
    table: Arc<CorrelationTable>,
    mut events: mpsc::UnboundedReceiver<WorkerEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = shutdown.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            None => break,
            Some(WorkerEvent::Message { slot: _slot, response }) => {
                let id = response.id();
                if !table.settle(id, response) {
                    #[cfg(feature = "tracing")]
                    tracing::trace!("Discarding stale response {id} from worker {_slot}");
                }
            }
            Some(WorkerEvent::Failed { slot, reason }) => {
                let _rejected = table.reject_slot(slot, &reason);
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    "Worker {slot} failed ({reason}); rejected {_rejected} outstanding requests"
                );
            }
        }
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("Event router for generation {_generation} stopped");
}
