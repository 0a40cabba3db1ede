//! The worker side of the pool.
//!
//! A worker is a [`MethodRegistry`] driven by [`handle_request`] inside some
//! execution unit. The [`Transport`] decides what that unit is: a tokio task
//! ([`TaskTransport`]) or an OS thread ([`ThreadTransport`]). Either way the
//! worker answers every request with exactly one [`Response`](crate::Response)
//! and reports its own crash as [`WorkerEvent::Failed`].

mod program;
mod registry;
mod transport;
pub use program::*;
pub use registry::*;
pub use transport::*;
