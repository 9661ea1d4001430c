use std::any::TypeId;
use std::cell::UnsafeCell;

use ahash::AHashMap;
use smallvec::SmallVec;

use flowgraph_core::{
    Blank, DataValue, ElementType, ExecuteContext, Kernel, NodeId, PortAccess, PortAddr, PortId,
    PortsView,
};

use crate::topology::TopologyDatabase;
use crate::traversal::TraversalCache;

/// A single type-erased buffer slot. The render graph hands out plain
/// indices and patches a port by rebinding which index it reads from; a
/// slot just no longer assumes every buffer holds the same element type.
struct BufferSlot {
    value: UnsafeCell<Box<dyn DataValue>>,
}

// SAFETY: a `BufferSlot` is only ever dereferenced through the pool's
// `get`/`get_mut`/`get_dyn`/`get_dyn_mut`. The scheduler never hands the
// same buffer index to two kernels running concurrently: traversal
// groups partition the node set, and a buffer is only shared along a
// producer -> consumer edge, which is never scheduled in parallel with
// itself.
unsafe impl Sync for BufferSlot {}

/// A pool of reusable, type-tagged buffers backing every data port in the
/// render graph. Buffers are partitioned into free lists by `TypeId`
/// since slots here may hold any `DataValue`; a slot freed by a `f32`
/// output must not be handed to an `i32` one.
pub struct BufferPool {
    slots: Vec<BufferSlot>,
    free_by_type: AHashMap<TypeId, Vec<usize>>,
}

impl BufferPool {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_by_type: AHashMap::new(),
        }
    }

    fn acquire<T: Blank>(&mut self) -> usize {
        if let Some(idx) = self
            .free_by_type
            .get_mut(&TypeId::of::<T>())
            .and_then(Vec::pop)
        {
            // SAFETY: no other live reference exists while we hold `&mut self`.
            unsafe {
                *self.slots[idx].value.get() = Box::new(T::blank());
            }
            return idx;
        }

        let idx = self.slots.len();
        self.slots.push(BufferSlot {
            value: UnsafeCell::new(Box::new(T::blank())),
        });
        idx
    }

    fn release<T: Blank>(&mut self, idx: usize) {
        self.free_by_type
            .entry(TypeId::of::<T>())
            .or_default()
            .push(idx);
    }

    /// Insert an already-constructed value as a new, permanently owned
    /// slot (not drawn from a typed free list). Used for one-shot
    /// `SetData` writes, which are never returned to a type's free
    /// list since the caller may supply any element type.
    fn insert_value(&mut self, value: Box<dyn DataValue>) -> usize {
        let idx = self.slots.len();
        self.slots.push(BufferSlot {
            value: UnsafeCell::new(value),
        });
        idx
    }

    /// Overwrite a slot in place with a new value, used to update an
    /// existing one-shot `SetData` slot without minting a new index.
    ///
    /// # Safety
    /// See `get`/`get_mut`: the caller must not alias `idx` with a
    /// concurrently-running kernel.
    fn overwrite(&self, idx: usize, value: Box<dyn DataValue>) {
        // SAFETY: called only from `RenderGraph::set_data`, which runs on
        // the thread that owns the `NodeSet` between ticks, never
        // concurrently with a kernel.
        unsafe {
            *self.slots[idx].value.get() = value;
        }
    }

    /// # Safety
    /// See the `unsafe impl Sync` note above: callers must not alias this
    /// index with a concurrently-running kernel.
    pub unsafe fn get<T: DataValue>(&self, idx: usize) -> Option<&T> {
        let value: &dyn DataValue = unsafe { &*self.slots[idx].value.get() };
        value.downcast_ref::<T>()
    }

    /// # Safety
    /// See `get`.
    pub unsafe fn get_mut<T: DataValue>(&self, idx: usize) -> Option<&mut T> {
        let value: &mut dyn DataValue = unsafe { &mut *self.slots[idx].value.get() };
        value.downcast_mut::<T>()
    }

    /// Type-erased counterpart of `get`, for a `PortAccess` implementation
    /// (or a graph value's tick-end copy) that does not know the port's
    /// element type at compile time.
    ///
    /// # Safety
    /// See `get`.
    pub(crate) unsafe fn get_dyn(&self, idx: usize) -> &dyn DataValue {
        let boxed: &Box<dyn DataValue> = unsafe { &*self.slots[idx].value.get() };
        &**boxed
    }

    /// # Safety
    /// See `get`.
    pub(crate) unsafe fn get_dyn_mut(&self, idx: usize) -> &mut dyn DataValue {
        let boxed: &mut Box<dyn DataValue> = unsafe { &mut *self.slots[idx].value.get() };
        &mut **boxed
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a patched input port currently reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSource {
    /// Reads the output buffer at this pool index.
    Buffer(usize),
    /// Unconnected: reads the shared zero value for its element type
    /// rather than branching on connectedness in the kernel.
    Blank,
}

/// A node's render-graph counterpart: its kernel plus the buffer
/// assignment for each of its ports, recomputed by `patch`. Ports that
/// are arrays contribute one entry per live subport, keyed by the full
/// [`PortAddr`] (scalar ports use `PortAddr::scalar`).
pub struct KernelEntry {
    pub node: NodeId,
    pub kernel: Box<dyn Kernel>,
    pub input_sources: SmallVec<[(PortAddr, PortSource, ElementType); 4]>,
    pub output_buffers: SmallVec<[(PortAddr, usize, ElementType); 4]>,
}

/// Owns per-kernel storage and runs the patching algorithm: for
/// every data-flow edge in the current traversal cache, rebind the
/// consuming input's `PortSource` to the producing output's buffer index;
/// unconnected inputs are patched to `Blank`, or to a one-shot `SetData`
/// slot if one was written for that address.
pub struct RenderGraph {
    pool: BufferPool,
    kernels: AHashMap<NodeId, KernelEntry>,
    /// One shared zero value per element type, read by every unconnected
    /// input port of that type rather than branching on connectedness in
    /// the kernel itself. Populated lazily the first time `patch` meets an
    /// unconnected port of a given type.
    blanks: AHashMap<ElementType, Box<dyn DataValue>>,
    /// Main-thread `SetData` writes: a pool slot per
    /// `(node, port address)` that has received a one-shot value and has
    /// no connected data source. `patch` prefers a live edge over this
    /// when both exist, though `NodeSet::set_data` rejects the write in
    /// that case up front.
    one_shot: AHashMap<(NodeId, PortAddr), usize>,
}

impl RenderGraph {
    pub fn new() -> Self {
        Self {
            pool: BufferPool::new(),
            kernels: AHashMap::new(),
            blanks: AHashMap::new(),
            one_shot: AHashMap::new(),
        }
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn insert_kernel(&mut self, node: NodeId, kernel: Box<dyn Kernel>) {
        self.kernels.insert(
            node,
            KernelEntry {
                node,
                kernel,
                input_sources: SmallVec::new(),
                output_buffers: SmallVec::new(),
            },
        );
    }

    pub fn remove_kernel(&mut self, node: NodeId) -> Option<KernelEntry> {
        let entry = self.kernels.remove(&node)?;
        for (_, idx, elem) in &entry.output_buffers {
            self.release_typed(*idx, *elem);
        }
        self.one_shot.retain(|(n, _), _| *n != node);
        Some(entry)
    }

    pub fn kernel(&self, node: NodeId) -> Option<&KernelEntry> {
        self.kernels.get(&node)
    }

    pub fn kernel_mut(&mut self, node: NodeId) -> Option<&mut KernelEntry> {
        self.kernels.get_mut(&node)
    }

    /// Record (or overwrite) a one-shot `SetData` value for `port` on
    /// `node`. Callers (`NodeSet::set_data`) are responsible for
    /// rejecting this when the port currently has a connected data
    /// source; `patch` will still prefer a live edge if one exists
    /// at the next rebuild.
    pub fn set_data(&mut self, node: NodeId, port: PortAddr, value: Box<dyn DataValue>) {
        if let Some(&idx) = self.one_shot.get(&(node, port)) {
            self.pool.overwrite(idx, value);
        } else {
            let idx = self.pool.insert_value(value);
            self.one_shot.insert((node, port), idx);
        }
    }

    /// Drop a one-shot `SetData` value, e.g. because the port array slot
    /// it targeted was invalidated by a shrink.
    pub fn clear_one_shot(&mut self, node: NodeId, port: PortAddr) {
        self.one_shot.remove(&(node, port));
    }

    /// Allocate (or keep) one output buffer per live output subport for
    /// every scheduled node, then set every input's `PortSource` from the
    /// current topology's data-flow edges (or a one-shot `SetData` slot).
    /// Runs whenever the topology changes, a buffer is resized, or a data
    /// input is set — here, conservatively, every time the traversal
    /// cache is rebuilt.
    pub fn patch<T, Acquire, Release, BlankFor, ArraySizeFor>(
        &mut self,
        topology: &TopologyDatabase<T>,
        cache: &TraversalCache,
        mut acquire_for: Acquire,
        mut release_for: Release,
        mut blank_for: BlankFor,
        mut array_size_for: ArraySizeFor,
    ) where
        Acquire: FnMut(&mut BufferPool, ElementType) -> usize,
        Release: FnMut(&mut BufferPool, usize, ElementType),
        BlankFor: FnMut(ElementType) -> Box<dyn DataValue>,
        ArraySizeFor: FnMut(NodeId, PortId, u32) -> u32,
    {
        for group in cache.groups() {
            for &node in &group.ordered_traversal {
                let Ok(node_entry) = topology.node(node) else {
                    continue;
                };

                // Pass 1: allocate any output buffers not yet assigned, one
                // per live subport of array outputs, and release any that a
                // port array shrink left stranded.
                {
                    let Some(kernel_entry) = self.kernels.get_mut(&node) else {
                        continue;
                    };
                    let mut live_addrs: SmallVec<[PortAddr; 4]> = SmallVec::new();
                    for port in node_entry.ports.iter().filter(|p| {
                        p.direction == flowgraph_core::PortDirection::Output
                            && !p.category.is_message_like()
                    }) {
                        for addr in port_addrs(port, node, &mut array_size_for) {
                            live_addrs.push(addr);
                            if !kernel_entry
                                .output_buffers
                                .iter()
                                .any(|(a, _, _)| *a == addr)
                            {
                                let idx = acquire_for(&mut self.pool, port.element_type);
                                kernel_entry
                                    .output_buffers
                                    .push((addr, idx, port.element_type));
                            }
                        }
                    }

                    let mut stranded: SmallVec<[(usize, ElementType); 4]> = SmallVec::new();
                    kernel_entry.output_buffers.retain(|(addr, idx, elem)| {
                        let keep = live_addrs.contains(addr);
                        if !keep {
                            stranded.push((*idx, *elem));
                        }
                        keep
                    });
                    for (idx, elem) in stranded {
                        release_for(&mut self.pool, idx, elem);
                    }
                }

                // Pass 2: resolve every input subport's source by reading
                // the producing node's already-allocated output buffers,
                // or a one-shot `SetData` slot, or the shared blank.
                let mut new_sources: SmallVec<[(PortAddr, PortSource, ElementType); 4]> =
                    SmallVec::new();
                for port in node_entry
                    .ports
                    .iter()
                    .filter(|p| p.direction == flowgraph_core::PortDirection::Input)
                {
                    for addr in port_addrs(port, node, &mut array_size_for) {
                        let source = node_entry
                            .incoming_for_port_addr(addr)
                            .and_then(|edge| {
                                self.kernels.get(&edge.src_node).and_then(|src_entry| {
                                    src_entry
                                        .output_buffers
                                        .iter()
                                        .find(|(a, _, _)| *a == edge.src_port)
                                        .map(|(_, idx, _)| PortSource::Buffer(*idx))
                                })
                            })
                            .or_else(|| {
                                self.one_shot.get(&(node, addr)).map(|&idx| PortSource::Buffer(idx))
                            })
                            .unwrap_or(PortSource::Blank);

                        if matches!(source, PortSource::Blank) {
                            self.blanks
                                .entry(port.element_type)
                                .or_insert_with(|| blank_for(port.element_type));
                        }

                        new_sources.push((addr, source, port.element_type));
                    }
                }

                if let Some(kernel_entry) = self.kernels.get_mut(&node) {
                    kernel_entry.input_sources = new_sources;
                }
            }
        }
    }

    /// Run one node's kernel for the current tick, giving it a `PortsView`
    /// backed by this render graph's buffer pool and shared blanks.
    ///
    /// Destructures `KernelEntry`'s fields directly (rather than calling a
    /// method on it) so the borrow checker sees `kernel`, `input_sources`,
    /// and `output_buffers` as disjoint borrows: the kernel needs `&mut`
    /// while the port sources only need to be read.
    pub fn execute_node(&mut self, node: NodeId, ctx: &ExecuteContext<'_>) -> bool {
        let Some(entry) = self.kernels.get_mut(&node) else {
            return false;
        };
        let KernelEntry {
            kernel,
            input_sources,
            output_buffers,
            ..
        } = entry;

        let input_addrs: SmallVec<[PortAddr; 4]> =
            input_sources.iter().map(|(addr, _, _)| *addr).collect();
        let output_addrs: SmallVec<[PortAddr; 4]> =
            output_buffers.iter().map(|(addr, _, _)| *addr).collect();

        let mut access = RenderPorts {
            pool: &self.pool,
            input_sources: &*input_sources,
            output_buffers: &*output_buffers,
            blanks: &self.blanks,
        };
        let mut ports = PortsView::new(&input_addrs, &output_addrs, &mut access);
        kernel.execute(&mut ports, ctx);
        true
    }

    fn release_typed(&mut self, idx: usize, elem: ElementType) {
        // Only the common scalar element types used by the reference node
        // library are released through the typed pool here; custom
        // element types simply leak their pool slot until the pool itself
        // is dropped, which is sound (never read again) but not reclaimed.
        if elem == ElementType::of::<f32>() {
            self.pool.release::<f32>(idx);
        } else if elem == ElementType::of::<f64>() {
            self.pool.release::<f64>(idx);
        } else if elem == ElementType::of::<i32>() {
            self.pool.release::<i32>(idx);
        } else if elem == ElementType::of::<i64>() {
            self.pool.release::<i64>(idx);
        } else if elem == ElementType::of::<bool>() {
            self.pool.release::<bool>(idx);
        }
    }
}

impl Default for RenderGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// The full set of addresses a port currently contributes: one scalar
/// address, or one address per live array subport (the "current
/// size").
fn port_addrs<F: FnMut(NodeId, PortId, u32) -> u32>(
    port: &flowgraph_core::PortDesc,
    node: NodeId,
    array_size_for: &mut F,
) -> SmallVec<[PortAddr; 4]> {
    match port.array {
        None => SmallVec::from_buf([PortAddr::scalar(port.id); 1]),
        Some(initial) => {
            let size = array_size_for(node, port.id, initial);
            (0..size)
                .map(|i| PortAddr::array(port.id, flowgraph_core::ArrayIndex(i)))
                .collect()
        }
    }
}

/// The `PortAccess` a single `execute_node` call hands to a kernel's
/// `PortsView`: resolves inputs through the pool (or the shared blank for
/// unconnected ports) and outputs through the pool directly.
struct RenderPorts<'a> {
    pool: &'a BufferPool,
    input_sources: &'a SmallVec<[(PortAddr, PortSource, ElementType); 4]>,
    output_buffers: &'a SmallVec<[(PortAddr, usize, ElementType); 4]>,
    blanks: &'a AHashMap<ElementType, Box<dyn DataValue>>,
}

impl PortAccess for RenderPorts<'_> {
    fn input_ref(&self, port: PortAddr) -> Option<&dyn DataValue> {
        let (_, source, elem) = self.input_sources.iter().find(|(a, _, _)| *a == port)?;
        match source {
            // SAFETY: the scheduler never runs this node concurrently with
            // the producer of this buffer; see `BufferSlot`'s `unsafe impl
            // Sync`.
            PortSource::Buffer(idx) => Some(unsafe { self.pool.get_dyn(*idx) }),
            PortSource::Blank => self.blanks.get(elem).map(|b| b.as_ref()),
        }
    }

    fn output_mut(&mut self, port: PortAddr) -> Option<&mut dyn DataValue> {
        let (_, idx, _) = self.output_buffers.iter().find(|(a, _, _)| *a == port)?;
        // SAFETY: see `input_ref`.
        Some(unsafe { self.pool.get_dyn_mut(*idx) })
    }
}

/// Convenience acquire function covering the reference node library's
/// element types (f32/f64/i32/i64/bool), for callers that do not need a
/// custom element-type registry.
pub fn acquire_builtin(pool: &mut BufferPool, elem: ElementType) -> usize {
    if elem == ElementType::of::<f32>() {
        pool.acquire::<f32>()
    } else if elem == ElementType::of::<f64>() {
        pool.acquire::<f64>()
    } else if elem == ElementType::of::<i32>() {
        pool.acquire::<i32>()
    } else if elem == ElementType::of::<i64>() {
        pool.acquire::<i64>()
    } else if elem == ElementType::of::<bool>() {
        pool.acquire::<bool>()
    } else {
        panic!(
            "acquire_builtin: unsupported element type {:?}; register a custom acquire fn",
            elem
        )
    }
}

pub fn release_builtin(pool: &mut BufferPool, idx: usize, elem: ElementType) {
    if elem == ElementType::of::<f32>() {
        pool.release::<f32>(idx);
    } else if elem == ElementType::of::<f64>() {
        pool.release::<f64>(idx);
    } else if elem == ElementType::of::<i32>() {
        pool.release::<i32>(idx);
    } else if elem == ElementType::of::<i64>() {
        pool.release::<i64>(idx);
    } else if elem == ElementType::of::<bool>() {
        pool.release::<bool>(idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_reuses_freed_slot_of_same_type() {
        let mut pool = BufferPool::new();
        let a = pool.acquire::<f32>();
        pool.release::<f32>(a);
        let b = pool.acquire::<f32>();
        assert_eq!(a, b);
    }

    #[test]
    fn pool_does_not_cross_assign_types() {
        let mut pool = BufferPool::new();
        let a = pool.acquire::<f32>();
        pool.release::<f32>(a);
        let b = pool.acquire::<i32>();
        assert_ne!(a, b);
    }

    #[test]
    fn one_shot_slot_is_overwritten_in_place() {
        let mut pool = BufferPool::new();
        let idx = pool.insert_value(Box::new(1.0f32));
        assert_eq!(unsafe { *pool.get::<f32>(idx).unwrap() }, 1.0);
        pool.overwrite(idx, Box::new(2.0f32));
        assert_eq!(unsafe { *pool.get::<f32>(idx).unwrap() }, 2.0);
    }
}
