//! Kernel execution runtimes implementing
//! [`flowgraph_core::KernelExecutionRuntime`]: the external contract the
//! scheduler (`flowgraph-graph`'s `Scheduler`) submits work through.
//!
//! Two runtimes are provided:
//! - [`SynchronousRuntime`] runs every job inline the instant it is
//!   scheduled.
//! - [`ThreadedRuntime`] spreads jobs across a fixed pool of OS threads
//!   pulling from a shared queue, with a job's declared dependency fences
//!   honored by having the job itself wait on them before running.

mod registry;
mod synchronous;
mod threaded;

pub use synchronous::SynchronousRuntime;
pub use threaded::{JobsError, ThreadedRuntime};
