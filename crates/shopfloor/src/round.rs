//! One fan-out-and-join unit of dispatch.
//!
//! A [`DispatchRound`] walks the pool's slots in ascending order, asks each
//! call's argument source for params, and sends one request per yielded
//! value. A sweep that yields nothing ends the call; with recycling enabled a
//! productive sweep is followed by another *cycle* over the same slots.
//! Every issued request is then joined into a [`RoundOutput`] whose entries
//! follow issue order, whatever order the answers arrived in.

use core::fmt;
use std::sync::Arc;

use futures::{StreamExt, stream::FuturesUnordered};
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::{
    EqualSplit, Error, Partitioner, Pending, Pool, Response, Result, RowRange, Settlement,
    Weighted,
};

/// How a round treats error responses and transport failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JoinPolicy {
    /// Wait for every request; failures stay in place as data.
    #[default]
    CollectAll,
    /// Fail the whole round on the first error response or transport
    /// failure, in arrival order.
    FailFast,
}

/// What an argument function hands back for one slot.
pub enum ArgYield {
    /// Send a request with these params.
    Params(Value),
    /// Switch the rest of the round over to this partitioner. Only honored
    /// on slot 0 of cycle 0.
    Shard(Box<dyn Partitioner>),
    /// Send nothing to this slot.
    Skip,
}

impl From<Option<Value>> for ArgYield {
    fn from(params: Option<Value>) -> Self {
        params.map_or(Self::Skip, Self::Params)
    }
}

/// Everything an argument function may look at.
pub struct ArgContext<'a> {
    /// Output of the previous step of the sequence.
    pub prior: &'a Value,
    pub slot: usize,
    pub cycle: usize,
    /// Free-form state shared by every invocation within one call of one
    /// round.
    pub scratch: &'a mut Map<String, Value>,
}

pub type ArgFn = Arc<dyn Fn(&mut ArgContext<'_>) -> ArgYield + Send + Sync>;

/// Invoked with every settlement of a round, in arrival order.
pub type ProgressFn = Arc<dyn Fn(&Settlement) + Send + Sync>;

/// Where a call's request params come from.
#[derive(Clone)]
pub enum Args {
    /// The same params for every slot, on the first cycle only.
    List(Value),
    /// Successive partitions, sent as `[part, offset]`. The partitioner is
    /// consumed as the round draws from it.
    Shard(Arc<Mutex<Box<dyn Partitioner>>>),
    /// Full control over every slot and cycle.
    Func(ArgFn),
    /// The prior step's output for every slot, on the first cycle only.
    Prior,
}

impl Args {
    pub fn list(params: Value) -> Self {
        Self::List(params)
    }

    pub fn shard(partitioner: impl Partitioner + 'static) -> Self {
        Self::Shard(Arc::new(Mutex::new(Box::new(partitioner))))
    }

    pub fn func<F>(f: F) -> Self
    where
        F: Fn(&mut ArgContext<'_>) -> ArgYield + Send + Sync + 'static,
    {
        Self::Func(Arc::new(f))
    }

    pub const fn prior() -> Self {
        Self::Prior
    }
}

impl fmt::Debug for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::List(params) => f.debug_tuple("List").field(params).finish(),
            Self::Shard(_) => f.write_str("Shard(..)"),
            Self::Func(_) => f.write_str("Func(..)"),
            Self::Prior => f.write_str("Prior"),
        }
    }
}

/// An array is a literal params list; anything else means "use the prior
/// output". Broadcast a scalar or object with [`Args::list`].
impl From<Value> for Args {
    fn from(params: Value) -> Self {
        if params.is_array() {
            Self::List(params)
        } else {
            Self::Prior
        }
    }
}

impl From<Vec<Value>> for Args {
    fn from(params: Vec<Value>) -> Self {
        Self::List(Value::Array(params))
    }
}

impl From<EqualSplit> for Args {
    fn from(p: EqualSplit) -> Self {
        Self::shard(p)
    }
}

impl From<Weighted> for Args {
    fn from(p: Weighted) -> Self {
        Self::shard(p)
    }
}

impl From<RowRange> for Args {
    fn from(p: RowRange) -> Self {
        Self::shard(p)
    }
}

/// A method paired with the source of its params.
#[derive(Debug, Clone)]
pub struct Call {
    pub method: String,
    pub args: Args,
}

impl Call {
    pub fn new(method: impl Into<String>, args: impl Into<Args>) -> Self {
        Self {
            method: method.into(),
            args: args.into(),
        }
    }
}

/// The joined result of a round, reshaped for convenience.
///
/// All vectors are aligned with `raw`, which is in issue order.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundOutput {
    /// Every settlement, including transport failures.
    pub raw: Vec<Settlement>,
    /// The worker responses; `None` where no response arrived.
    pub responses: Vec<Option<Response>>,
    /// The `result` payloads; `null` for error responses and failures.
    pub results: Vec<Value>,
    /// The `extra` maps, present when the first entry is a successful
    /// response.
    pub extras: Option<Vec<Map<String, Value>>>,
}

impl RoundOutput {
    pub fn new(raw: Vec<Settlement>) -> Self {
        let responses: Vec<_> = raw.iter().map(|s| s.as_ref().ok().cloned()).collect();

        let results = responses
            .iter()
            .map(|r| r.as_ref().and_then(Response::result).cloned().unwrap_or(Value::Null))
            .collect();

        let extras = match responses.first() {
            Some(Some(first)) if first.is_ok() => Some(
                responses
                    .iter()
                    .map(|r| r.as_ref().and_then(Response::extra).cloned().unwrap_or_default())
                    .collect(),
            ),
            _ => None,
        };

        Self {
            raw,
            responses,
            results,
            extras,
        }
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Number of entries that are not successful responses.
    pub fn failures(&self) -> usize {
        self.raw
            .iter()
            .filter(|s| !matches!(s, Ok(r) if r.is_ok()))
            .count()
    }
}

/// Normalized per-call argument source.
enum Source {
    List(Value),
    Shard(Arc<Mutex<Box<dyn Partitioner>>>),
    Func(ArgFn),
    Prior,
}

impl Source {
    fn produce(&self, ctx: &mut ArgContext<'_>) -> ArgYield {
        match self {
            Self::List(params) if ctx.cycle == 0 => ArgYield::Params(params.clone()),
            Self::Prior if ctx.cycle == 0 => ArgYield::Params(ctx.prior.clone()),
            Self::List(_) | Self::Prior => ArgYield::Skip,
            Self::Shard(partitioner) => partitioner.lock().next().map(|p| p.into_params()).into(),
            Self::Func(f) => f(ctx),
        }
    }
}

impl From<Args> for Source {
    fn from(args: Args) -> Self {
        match args {
            Args::List(params) => Self::List(params),
            Args::Shard(partitioner) => Self::Shard(partitioner),
            Args::Func(f) => Self::Func(f),
            Args::Prior => Self::Prior,
        }
    }
}

/// Fan-out of one or more calls over a pool, joined into one result.
///
/// # Example
/// ```no_run
/// # async fn demo(pool: shopfloor::Pool) -> shopfloor::Result<()> {
/// use serde_json::json;
/// use shopfloor::{Args, DispatchRound};
///
/// let output = DispatchRound::new(&pool)
///     .call("ping", Args::list(json!([])))
///     .run(&json!(null))
///     .await?;
/// assert_eq!(output.len(), pool.size());
/// # Ok(())
/// # }
/// ```
pub struct DispatchRound<'p> {
    pool: &'p Pool,
    calls: Vec<Call>,
    recycle: bool,
    policy: JoinPolicy,
    progress: Option<ProgressFn>,
}

impl<'p> DispatchRound<'p> {
    pub fn new(pool: &'p Pool) -> Self {
        Self {
            pool,
            calls: Vec::new(),
            recycle: false,
            policy: pool.config().join_policy,
            progress: None,
        }
    }

    #[must_use]
    pub fn call(mut self, method: impl Into<String>, args: impl Into<Args>) -> Self {
        self.calls.push(Call::new(method, args));
        self
    }

    #[must_use]
    pub fn calls(mut self, calls: impl IntoIterator<Item = Call>) -> Self {
        self.calls.extend(calls);
        self
    }

    /// Keep sweeping the slots while the previous sweep produced work.
    #[must_use]
    pub const fn recycle(mut self, recycle: bool) -> Self {
        self.recycle = recycle;
        self
    }

    #[must_use]
    pub const fn policy(mut self, policy: JoinPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn on_progress(mut self, progress: Option<ProgressFn>) -> Self {
        self.progress = progress;
        self
    }

    /// Issues every request of the round and joins them.
    ///
    /// # Errors
    ///
    /// Only under [`JoinPolicy::FailFast`]: the first error response yields
    /// [`Error::RoundFailed`], the first failure is returned as-is.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(skip_all, fields(calls = self.calls.len(), recycle = self.recycle))
    )]
    pub async fn run(self, prior: &Value) -> Result<RoundOutput> {
        let pending = self.issue(prior).await;
        join(pending, self.policy, self.progress.as_ref()).await
    }

    async fn issue(&self, prior: &Value) -> Vec<Pending> {
        let size = self.pool.size();
        let mut pending = Vec::new();

        for call in &self.calls {
            let mut source = Source::from(call.args.clone());
            let mut scratch = Map::new();
            let mut cycle = 0;
            let mut slot = 0;
            let mut idle_sweep = true;

            loop {
                if slot == size {
                    if idle_sweep || !self.recycle {
                        break;
                    }
                    slot = 0;
                    cycle += 1;
                    idle_sweep = true;
                    continue;
                }

                let mut ctx = ArgContext {
                    prior,
                    slot,
                    cycle,
                    scratch: &mut scratch,
                };
                let mut yielded = source.produce(&mut ctx);

                if let ArgYield::Shard(partitioner) = yielded {
                    if slot == 0 && cycle == 0 {
                        source = Source::Shard(Arc::new(Mutex::new(partitioner)));
                        yielded = source.produce(&mut ctx);
                    } else {
                        #[cfg(feature = "tracing")]
                        tracing::debug!(
                            "Ignoring partitioner yielded for {} at slot {slot}, cycle {cycle}",
                            call.method
                        );
                        yielded = ArgYield::Skip;
                    }
                }

                if let ArgYield::Params(params) = yielded {
                    idle_sweep = false;
                    pending.push(self.pool.dispatch(slot, &call.method, params).await);
                }

                slot += 1;
            }

            #[cfg(feature = "tracing")]
            tracing::debug!(
                "Issued {} over {} cycle(s) up to {}",
                call.method,
                cycle + 1,
                pending.last().map_or_else(|| "none".to_string(), |p| p.id().to_string())
            );
        }

        pending
    }
}

/// Joins `pending` into issue order.
async fn join(
    pending: Vec<Pending>,
    policy: JoinPolicy,
    progress: Option<&ProgressFn>,
) -> Result<RoundOutput> {
    let mut settled: Vec<Option<Settlement>> = vec![None; pending.len()];
    let mut arrivals: FuturesUnordered<_> = pending
        .into_iter()
        .enumerate()
        .map(|(index, p)| async move { (index, p.await) })
        .collect();

    while let Some((index, settlement)) = arrivals.next().await {
        if let Some(progress) = progress {
            progress(&settlement);
        }

        if policy == JoinPolicy::FailFast {
            match &settlement {
                Ok(Response::Err { error, id }) => {
                    return Err(Error::RoundFailed {
                        id: *id,
                        code: error.code,
                        message: error.message.clone(),
                    });
                }
                Err(e) => return Err(e.clone()),
                Ok(Response::Ok { .. }) => {}
            }
        }

        settled[index] = Some(settlement);
    }

    Ok(RoundOutput::new(settled.into_iter().flatten().collect()))
}
