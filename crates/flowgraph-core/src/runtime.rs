/// An opaque token identifying a previously scheduled unit of work. The
/// runtime is free to represent this however it likes internally (a
/// generation counter, an index into a job table); the engine only ever
/// passes it back to `complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fence(pub u64);

/// The external contract a kernel execution backend must provide: job
/// submission with explicit dependency edges, and a fence that can be
/// waited on. A synchronous implementation running everything on the
/// caller's thread is a valid runtime; `flowgraph-jobs` ships one plus a
/// threaded one backed by a fixed worker pool.
pub trait KernelExecutionRuntime {
    /// Schedule `work` to run after every fence in `deps` has completed.
    /// Returns a new fence identifying this unit of work.
    fn schedule(&mut self, work: Box<dyn FnOnce() + Send + 'static>, deps: &[Fence]) -> Fence;

    /// Block the calling thread until `fence` (and transitively everything
    /// it depends on) has completed.
    fn complete(&mut self, fence: Fence);
}
