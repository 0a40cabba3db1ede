//! Fan work out across a fixed pool of isolated workers, correlate every
//! reply with its request, and chain rounds of dispatch into pipelines.
//!
//! The building blocks, leaves first:
//!
//! - [`Partitioner`]s split data into parts: [`EqualSplit`], [`Weighted`] and
//!   [`RowRange`].
//! - A worker program is a [`MethodRegistry`]; a [`Transport`] runs it as a
//!   tokio task ([`TaskTransport`]) or an OS thread ([`ThreadTransport`]).
//! - A [`Pool`] owns the workers and a [`CorrelationTable`]; every dispatched
//!   [`Request`] gets a unique [`RequestId`] and a [`Pending`] handle.
//! - A [`DispatchRound`] sweeps the pool's slots, issues requests and joins
//!   them in issue order.
//! - A [`Sequence`] chains rounds and transformations; each
//!   [`Sequence::proc`] fires an independent [`Running`] instance.
//!
//! ```no_run
//! use serde_json::{Value, json};
//! use shopfloor::{Input, MethodRegistry, Pool, ShardOptions, TaskTransport};
//!
//! # async fn demo() -> shopfloor::Result<()> {
//! let methods = MethodRegistry::new().with("len", |params: &Value| {
//!     Ok(json!(params[0].as_array().map_or(0, Vec::len)))
//! });
//! let pool = Pool::with_size(4, TaskTransport::new(methods))?;
//!
//! let data: Vec<Value> = (0..100).map(Value::from).collect();
//! let lengths = pool
//!     .sequence(|_| {}, |_| {})
//!     .call("len", pool.shard(data, ShardOptions::default())?)
//!     .then(|input: Input| Ok(input.into_value()))
//!     .run(json!(null))
//!     .await?;
//! assert_eq!(lengths, json!([25, 25, 25, 25]));
//! # Ok(())
//! # }
//! ```

mod correlation;
mod error;
mod message;
mod partition;
mod pool;
mod round;
mod sequence;
mod worker;

pub use crate::correlation::*;
pub use crate::error::*;
pub use crate::message::*;
pub use crate::partition::*;
pub use crate::pool::*;
pub use crate::round::*;
pub use crate::sequence::*;
pub use crate::worker::*;
