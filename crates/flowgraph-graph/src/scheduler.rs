use std::sync::Mutex;

use flowgraph_core::{
    AccessMode, AtomicSafetyManager, EngineError, ExecuteContext, Fence, KernelExecutionRuntime,
    NodeId,
};

use crate::render::{PortSource, RenderGraph};
use crate::traversal::TraversalCache;

/// The buffer slots one node's kernel touches this generation, and the
/// access mode each is touched with: `ReadWrite` for its own output
/// buffers, `ReadOnly` for the buffers its connected inputs read from.
/// Collected before jobs are scheduled so `declare` sees every dependency
/// up front, and re-used by the job closure itself to `mark_used` after
/// the kernel runs.
fn buffer_modes_for(render: &RenderGraph, node: NodeId) -> Vec<(u32, AccessMode)> {
    let Some(entry) = render.kernel(node) else {
        return Vec::new();
    };
    let mut modes = Vec::with_capacity(entry.output_buffers.len() + entry.input_sources.len());
    for (_, idx, _) in &entry.output_buffers {
        modes.push((*idx as u32, AccessMode::ReadWrite));
    }
    for (_, source, _) in &entry.input_sources {
        if let PortSource::Buffer(idx) = source {
            modes.push((*idx as u32, AccessMode::ReadOnly));
        }
    }
    modes
}

/// One of the four execution strategies over a traversal cache.
/// All four visit the same nodes in the same dependency order; they only
/// differ in how the work is distributed across jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStrategy {
    /// Run the topological order on the calling thread, group by group.
    /// No job is ever submitted to the runtime.
    Synchronous,
    /// Identical ordering to `Synchronous`, but each kernel invocation is
    /// wrapped as a job on the runtime for uniform instrumentation (the
    /// runtime may still execute it inline).
    SingleThreaded,
    /// One job per traversal group, internally sequential; groups run in
    /// parallel with each other since they share no node.
    Islands,
    /// One job per node, with dependency edges between parent and child
    /// jobs taken directly from the cache's `parent_table`/`child_table`.
    MaximallyParallel,
}

/// A raw, `Send`-wrapped pointer to the render graph, used only by the
/// parallel strategies to hand a job exclusive access to exactly one
/// node's kernel entry.
///
/// Safe under the same discipline as `render::BufferSlot`'s `unsafe impl
/// Sync`: the cache's per-edge parent-precedes-child relation is the only
/// happens-before the scheduler promises, so a job for node `n` never
/// runs concurrently with a job for a node that shares a buffer with `n`.
/// Groups (Islands) and individual nodes (MaximallyParallel) are
/// otherwise disjoint, so two live jobs never call `execute_node` for the
/// same `NodeId` at once. `Scheduler::run` blocks on every fence it hands
/// out before returning, so no pointer derived from `render` or `ctx`
/// outlives the borrow the caller passed in, even though the runtime's
/// `schedule` API requires `'static` closures.
struct SendPtr<T>(*mut T);
unsafe impl<T> Send for SendPtr<T> {}
impl<T> Clone for SendPtr<T> {
    fn clone(&self) -> Self {
        Self(self.0)
    }
}
impl<T> Copy for SendPtr<T> {}

/// A raw, `Send`-wrapped pointer to the safety manager's `Mutex`, used by
/// the same three strategies to let a job record `mark_used` calls on the
/// manager that already lives for the duration of `Scheduler::run`.
///
/// The `Mutex` is what actually synchronizes concurrent access; this
/// wrapper only exists to smuggle a borrow across the runtime's `'static`
/// closure bound, same as `SendPtr<RenderGraph>` above, and is sound for
/// the same reason: `run` blocks on every fence before returning, so the
/// pointer never outlives the `&Mutex` the caller passed in.
struct SendMutexPtr(*const Mutex<AtomicSafetyManager>);
unsafe impl Send for SendMutexPtr {}
impl Clone for SendMutexPtr {
    fn clone(&self) -> Self {
        Self(self.0)
    }
}
impl Copy for SendMutexPtr {}

/// Drives one tick's kernel execution according to a selected strategy.
/// Stateless beyond the strategy choice; the render graph and cache are
/// threaded through each call.
pub struct Scheduler {
    strategy: ExecutionStrategy,
}

impl Scheduler {
    pub fn new(strategy: ExecutionStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> ExecutionStrategy {
        self.strategy
    }

    pub fn set_strategy(&mut self, strategy: ExecutionStrategy) {
        self.strategy = strategy;
    }

    /// Execute every live node named by `cache`, in dependency order,
    /// against `render`. `ctx` is reused unchanged for every kernel
    /// invocation this tick; its `tick`/`render_generation` fields are
    /// the only state that should vary between calls to `run`.
    ///
    /// `safety` is consulted only by `SingleThreaded`/`Islands`/
    /// `MaximallyParallel`: every buffer slot a scheduled node touches is
    /// declared before any job runs, each job marks the slots it actually
    /// touches as it executes, and `check_complete` is consulted once every
    /// job has finished, surfacing `EngineError::MissingDependency` if a
    /// declared slot went untouched. `Synchronous` runs every kernel
    /// directly on the calling thread with no job boundary to instrument,
    /// so it leaves `safety` untouched.
    pub fn run<R: KernelExecutionRuntime>(
        &self,
        render: &mut RenderGraph,
        cache: &TraversalCache,
        runtime: &mut R,
        ctx: &ExecuteContext<'_>,
        safety: &Mutex<AtomicSafetyManager>,
    ) -> Result<(), EngineError> {
        match self.strategy {
            ExecutionStrategy::Synchronous => {
                Self::run_synchronous(render, cache, ctx);
                Ok(())
            }
            ExecutionStrategy::SingleThreaded => {
                Self::run_single_threaded(render, cache, runtime, ctx, safety)
            }
            ExecutionStrategy::Islands => Self::run_islands(render, cache, runtime, ctx, safety),
            ExecutionStrategy::MaximallyParallel => {
                Self::run_maximally_parallel(render, cache, runtime, ctx, safety)
            }
        }
    }

    fn run_synchronous(render: &mut RenderGraph, cache: &TraversalCache, ctx: &ExecuteContext<'_>) {
        for group in cache.groups() {
            for &node in &group.ordered_traversal {
                render.execute_node(node, ctx);
            }
        }
    }

    /// Same ordering as `Synchronous`, but every kernel call is wrapped as
    /// a job so the runtime's own instrumentation (job names, timing)
    /// applies uniformly across strategies. Each job's fence is waited on
    /// before the next is submitted, so this strategy never actually runs
    /// two kernels concurrently.
    fn run_single_threaded<R: KernelExecutionRuntime>(
        render: &mut RenderGraph,
        cache: &TraversalCache,
        runtime: &mut R,
        ctx: &ExecuteContext<'_>,
        safety: &Mutex<AtomicSafetyManager>,
    ) -> Result<(), EngineError> {
        for group in cache.groups() {
            for &node in &group.ordered_traversal {
                let modes = buffer_modes_for(render, node);
                {
                    let mut mgr = safety.lock().unwrap();
                    for &(slot, mode) in &modes {
                        mgr.declare(slot, mode);
                    }
                }

                let render_ptr = SendPtr(render as *mut RenderGraph);
                let ctx_ptr = SendPtr(ctx as *const ExecuteContext<'_> as *mut ExecuteContext<'_>);
                let safety_ptr = SendMutexPtr(safety as *const Mutex<AtomicSafetyManager>);
                let fence = runtime.schedule(
                    Box::new(move || {
                        // SAFETY: see `SendPtr`; this job's fence is awaited
                        // immediately below before any other job touches
                        // `render` or `ctx`.
                        let render = unsafe { &mut *render_ptr.0 };
                        let ctx = unsafe { &*ctx_ptr.0 };
                        render.execute_node(node, ctx);
                        // SAFETY: see `SendMutexPtr`.
                        let safety = unsafe { &*safety_ptr.0 };
                        let mut mgr = safety.lock().unwrap();
                        for (slot, mode) in modes {
                            let handle = mgr.handle_for_slot(slot);
                            let _ = mgr.mark_used(handle, mode);
                        }
                    }),
                    &[],
                );
                runtime.complete(fence);
            }
        }
        safety.lock().unwrap().check_complete()
    }

    /// One job per traversal group, internally sequential; groups run in
    /// parallel since the cache guarantees no data-flow edge crosses a
    /// group boundary.
    fn run_islands<R: KernelExecutionRuntime>(
        render: &mut RenderGraph,
        cache: &TraversalCache,
        runtime: &mut R,
        ctx: &ExecuteContext<'_>,
        safety: &Mutex<AtomicSafetyManager>,
    ) -> Result<(), EngineError> {
        let mut fences = Vec::with_capacity(cache.groups().len());
        for group in cache.groups() {
            let nodes = group.ordered_traversal.clone();
            let node_modes: Vec<(NodeId, Vec<(u32, AccessMode)>)> = nodes
                .iter()
                .map(|&node| (node, buffer_modes_for(render, node)))
                .collect();
            {
                let mut mgr = safety.lock().unwrap();
                for (_, modes) in &node_modes {
                    for &(slot, mode) in modes {
                        mgr.declare(slot, mode);
                    }
                }
            }

            let render_ptr = SendPtr(render as *mut RenderGraph);
            let ctx_ptr = SendPtr(ctx as *const ExecuteContext<'_> as *mut ExecuteContext<'_>);
            let safety_ptr = SendMutexPtr(safety as *const Mutex<AtomicSafetyManager>);
            let fence = runtime.schedule(
                Box::new(move || {
                    // SAFETY: see `SendPtr`. Distinct groups never share a
                    // node, so concurrently running island jobs never call
                    // `execute_node` for the same `NodeId`.
                    let render = unsafe { &mut *render_ptr.0 };
                    let ctx = unsafe { &*ctx_ptr.0 };
                    // SAFETY: see `SendMutexPtr`.
                    let safety = unsafe { &*safety_ptr.0 };
                    for (node, modes) in node_modes {
                        render.execute_node(node, ctx);
                        let mut mgr = safety.lock().unwrap();
                        for (slot, mode) in modes {
                            let handle = mgr.handle_for_slot(slot);
                            let _ = mgr.mark_used(handle, mode);
                        }
                    }
                }),
                &[],
            );
            fences.push(fence);
        }
        for fence in fences {
            runtime.complete(fence);
        }
        safety.lock().unwrap().check_complete()
    }

    /// One job per node. Dependency edges are taken directly from the
    /// cache's `parent_table`: a node's job depends on the fence of every
    /// parent's job. Root nodes (no parents) depend on nothing; leaf
    /// nodes (no children) are simply the last fences waited on.
    fn run_maximally_parallel<R: KernelExecutionRuntime>(
        render: &mut RenderGraph,
        cache: &TraversalCache,
        runtime: &mut R,
        ctx: &ExecuteContext<'_>,
        safety: &Mutex<AtomicSafetyManager>,
    ) -> Result<(), EngineError> {
        let mut all_fences = Vec::new();
        for group in cache.groups() {
            // fence_of[pos] is set once that position's job has been
            // submitted; positions are visited in traversal order, so
            // every parent's fence already exists by the time its
            // children are scheduled.
            let mut fence_of: Vec<Option<Fence>> = vec![None; group.ordered_traversal.len()];

            for (pos, &node) in group.ordered_traversal.iter().enumerate() {
                let deps: Vec<Fence> = group.parent_table[pos]
                    .iter()
                    .filter_map(|&parent_pos| fence_of[parent_pos])
                    .collect();

                let modes = buffer_modes_for(render, node);
                {
                    let mut mgr = safety.lock().unwrap();
                    for &(slot, mode) in &modes {
                        mgr.declare(slot, mode);
                    }
                }

                let render_ptr = SendPtr(render as *mut RenderGraph);
                let ctx_ptr = SendPtr(ctx as *const ExecuteContext<'_> as *mut ExecuteContext<'_>);
                let safety_ptr = SendMutexPtr(safety as *const Mutex<AtomicSafetyManager>);
                let fence = runtime.schedule(
                    Box::new(move || {
                        // SAFETY: see `SendPtr`. This job's dependency
                        // fences guarantee every producer of a buffer this
                        // node reads has already completed and will not
                        // touch `render` again, so this job's access to
                        // its own node entry does not alias a live one.
                        let render = unsafe { &mut *render_ptr.0 };
                        let ctx = unsafe { &*ctx_ptr.0 };
                        render.execute_node(node, ctx);
                        // SAFETY: see `SendMutexPtr`.
                        let safety = unsafe { &*safety_ptr.0 };
                        let mut mgr = safety.lock().unwrap();
                        for (slot, mode) in modes {
                            let handle = mgr.handle_for_slot(slot);
                            let _ = mgr.mark_used(handle, mode);
                        }
                    }),
                    &deps,
                );
                fence_of[pos] = Some(fence);
                if group.child_table[pos].is_empty() {
                    all_fences.push(fence);
                }
            }
        }
        for fence in all_fences {
            runtime.complete(fence);
        }
        safety.lock().unwrap().check_complete()
    }
}
