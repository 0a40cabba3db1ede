use core::fmt;
use std::{panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use portable_atomic::{AtomicU64, Ordering};
use serde_json::Value;
use tokio::sync::watch;

use super::{Input, InstanceStatus, Link, Running, Then};
use crate::{
    Args, Call, DispatchRound, Error, JoinPolicy, Pool, ProgressFn, Result, error::panic_reason,
};

pub type Hook = Arc<dyn Fn(&Pool) + Send + Sync>;

/// An ordered chain of `call` and `then` steps over one pool.
///
/// A `Sequence` is a template: building it dispatches nothing. Each
/// [`Sequence::proc`] fires an independent instance that respawns the pool,
/// feeds its input to the first step and hands every step's output to the
/// next. Firing never changes the template, so one template can be fired any
/// number of times.
///
/// Steps follow promise semantics. A `call` step fans out one dispatch
/// round; a `then` step transforms the previous outcome. A failure skips
/// every `call` step until a `then` step with an `on_fail` handler recovers
/// it, or reaches the end of the chain.
///
/// # Example
/// ```no_run
/// # async fn demo(pool: shopfloor::Pool) -> shopfloor::Result<()> {
/// use serde_json::{Value, json};
/// use shopfloor::{Args, Input, ShardOptions};
///
/// let data: Vec<Value> = (1..=10).map(Value::from).collect();
/// let shard = pool.shard(data, ShardOptions::default())?;
///
/// let total = pool
///     .sequence(|_| {}, |_| {})
///     .call("sum", shard)
///     .then(|input: Input| {
///         let parts = input.into_value();
///         let sum: i64 = parts.as_array().into_iter().flatten().filter_map(Value::as_i64).sum();
///         Ok(json!(sum))
///     })
///     .run(json!(null))
///     .await?;
/// assert_eq!(total, json!(55));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Sequence {
    pool: Pool,
    links: Arc<Vec<Link>>,
    setup: Option<Hook>,
    teardown: Option<Hook>,
    join_policy: Option<JoinPolicy>,
    fired: Arc<AtomicU64>,
}

impl Sequence {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            links: Arc::new(Vec::new()),
            setup: None,
            teardown: None,
            join_policy: None,
            fired: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Runs before every fired instance, ahead of the pool respawn.
    #[must_use]
    pub fn setup<F>(mut self, setup: F) -> Self
    where
        F: Fn(&Pool) + Send + Sync + 'static,
    {
        self.setup = Some(Arc::new(setup));
        self
    }

    /// Runs once per fired instance, after its chain settles either way.
    #[must_use]
    pub fn teardown<F>(mut self, teardown: F) -> Self
    where
        F: Fn(&Pool) + Send + Sync + 'static,
    {
        self.teardown = Some(Arc::new(teardown));
        self
    }

    /// Overrides the pool's default join policy for every round.
    #[must_use]
    pub const fn join_policy(mut self, policy: JoinPolicy) -> Self {
        self.join_policy = Some(policy);
        self
    }

    /// Appends a single-sweep dispatch round.
    #[must_use]
    pub fn call(self, method: impl Into<String>, args: impl Into<Args>) -> Self {
        self.push(Link::Call {
            calls: vec![Call::new(method, args)],
            recycle: false,
        })
    }

    /// Appends a dispatch round that keeps sweeping the pool while its
    /// argument source produces work.
    #[must_use]
    pub fn call_recycling(self, method: impl Into<String>, args: impl Into<Args>) -> Self {
        self.push(Link::Call {
            calls: vec![Call::new(method, args)],
            recycle: true,
        })
    }

    /// Appends one round issuing several calls, joined together in order.
    #[must_use]
    pub fn call_many(self, calls: impl IntoIterator<Item = Call>, recycle: bool) -> Self {
        self.push(Link::Call {
            calls: calls.into_iter().collect(),
            recycle,
        })
    }

    /// Appends a transformation of the previous step's output.
    #[must_use]
    pub fn then<F>(self, on_done: F) -> Self
    where
        F: Fn(Input) -> Result<Value> + Send + Sync + 'static,
    {
        self.then_with(Then::new(on_done))
    }

    #[must_use]
    pub fn then_with(self, then: Then) -> Self {
        self.push(Link::Then(then))
    }

    pub const fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Number of steps in the chain.
    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Number of instances fired from this template (and its clones).
    pub fn fired(&self) -> u64 {
        self.fired.load(Ordering::Acquire)
    }

    /// Fires a new instance fed with `input`.
    ///
    /// The instance waits for the pool's lease, runs the setup hook,
    /// respawns the pool, executes the chain and finally runs the teardown
    /// hook.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn proc(&self, input: Value) -> Running {
        let instance = self.fired.fetch_add(1, Ordering::AcqRel) + 1;
        let (status, observer) = watch::channel(InstanceStatus::Fired);
        let template = self.clone();

        let driver = tokio::spawn(async move {
            let outcome = template.execute(instance, input).await;
            status.send_replace(if outcome.is_ok() {
                InstanceStatus::Succeeded
            } else {
                InstanceStatus::Failed
            });
            outcome
        });

        Running::new(instance, observer, driver)
    }

    /// Fires an instance and waits for its value.
    ///
    /// # Errors
    ///
    /// Returns the error the chain settled with.
    pub async fn run(&self, input: Value) -> Result<Value> {
        self.proc(input).await
    }

    fn push(mut self, link: Link) -> Self {
        Arc::make_mut(&mut self.links).push(link);
        self
    }

    async fn execute(self, _instance: u64, input: Value) -> Result<Value> {
        let _lease = self.pool.lease().await;
        #[cfg(feature = "tracing")]
        tracing::debug!("Instance {_instance} acquired the pool lease");

        // Teardown runs even when setup or a step panics.
        let outcome = AssertUnwindSafe(async {
            if let Some(setup) = &self.setup {
                setup(&self.pool);
            }
            match self.pool.respawn() {
                Ok(()) => self.drive(input).await,
                Err(e) => Err(e),
            }
        })
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| {
            Err(Error::Instance {
                reason: panic_reason("instance", payload.as_ref()),
            })
        });

        if let Some(teardown) = &self.teardown {
            teardown(&self.pool);
        }

        #[cfg(feature = "tracing")]
        match &outcome {
            Ok(_) => tracing::debug!("Instance {_instance} succeeded"),
            Err(e) => tracing::debug!("Instance {_instance} failed: {e}"),
        }

        outcome
    }

    async fn drive(&self, input: Value) -> Result<Value> {
        let policy = self
            .join_policy
            .unwrap_or(self.pool.config().join_policy);
        let mut state: Result<Input> = Ok(Input::Value(input));

        for (index, link) in self.links.iter().enumerate() {
            state = match link {
                Link::Call { calls, recycle } => match state {
                    Ok(input) => {
                        let prior = input.into_value();
                        DispatchRound::new(&self.pool)
                            .calls(calls.iter().cloned())
                            .recycle(*recycle)
                            .policy(policy)
                            .on_progress(self.progress_after(index))
                            .run(&prior)
                            .await
                            .map(Input::Round)
                    }
                    Err(e) => Err(e),
                },
                Link::Then(then) => then.settle(state).map(Input::Value),
            };
        }

        state.map(Input::into_value)
    }

    /// The progress observer of the `then` step following `index`, if any.
    fn progress_after(&self, index: usize) -> Option<ProgressFn> {
        match self.links.get(index + 1) {
            Some(Link::Then(then)) => then.on_progress.clone(),
            _ => None,
        }
    }
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sequence")
            .field("links", &self.links)
            .field("join_policy", &self.join_policy)
            .field("fired", &self.fired())
            .finish_non_exhaustive()
    }
}
