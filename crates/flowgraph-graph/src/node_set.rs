use std::any::Any;
use std::sync::Mutex;

use smallvec::SmallVec;

use flowgraph_core::{
    ArrayIndex, AtomicSafetyManager, DataValue, EdgeCategory, ElementType, EngineError,
    ExecuteContext, GraphValueId, KernelExecutionRuntime, NodeCapabilities, NodeDefinition,
    NodeId, NodeSetId, PortAddr, PortCategory, PortDirection, PortId, MAX_PORT_ARRAY_SIZE,
    DEFAULT_NODE_SET_CAPACITY,
};

use crate::diff::{GraphDiff, RepatchRequest};
use crate::forwarding::ForwardingTable;
use crate::port_array::PortArraySizeTable;
use crate::render::{acquire_builtin, release_builtin, RenderGraph};
use crate::scheduler::{ExecutionStrategy, Scheduler};
use crate::topology::TopologyDatabase;
use crate::traversal::{SortStrategy, TraversalCache, SCHEDULING_MASK};
use crate::value::{copy_builtin, GraphValueTable};

/// A message queued by `send_message`, dispatched to its target's
/// `on_message` at the start of the next `update` call.
struct PendingMessage {
    node: NodeId,
    port: PortAddr,
    payload: Box<dyn Any + Send>,
}

/// Tuning knobs for a freshly constructed [`NodeSet`]: initial table
/// capacities plus the default execution/sort strategy, all overridable
/// via `Default`.
#[derive(Debug, Clone, Copy)]
pub struct NodeSetConfig {
    pub initial_node_capacity: usize,
    pub initial_edge_capacity: usize,
    pub execution_strategy: ExecutionStrategy,
    pub sort_strategy: SortStrategy,
}

impl Default for NodeSetConfig {
    fn default() -> Self {
        Self {
            initial_node_capacity: DEFAULT_NODE_SET_CAPACITY,
            initial_edge_capacity: DEFAULT_NODE_SET_CAPACITY,
            execution_strategy: ExecutionStrategy::Synchronous,
            sort_strategy: SortStrategy::GlobalBreadthFirst,
        }
    }
}

/// Owns one complete dataflow graph: the topology database, forwarding
/// table, port array sizes, traversal cache, per-tick diff, render graph,
/// scheduler, and graph values. All structural mutation goes through
/// `&mut self`; only `update` hands control to the scheduler's kernels.
pub struct NodeSet {
    topology: TopologyDatabase<Box<dyn NodeDefinition>>,
    forwarding: ForwardingTable,
    port_arrays: PortArraySizeTable,
    cache: TraversalCache,
    diff: GraphDiff,
    render: RenderGraph,
    scheduler: Scheduler,
    values: GraphValueTable,
    sort_strategy: SortStrategy,
    pending_messages: Vec<PendingMessage>,
    tick: u64,
    safety: Mutex<AtomicSafetyManager>,
}

impl NodeSet {
    pub fn new(strategy: ExecutionStrategy, sort_strategy: SortStrategy) -> Self {
        Self::with_config(NodeSetConfig {
            execution_strategy: strategy,
            sort_strategy,
            ..NodeSetConfig::default()
        })
    }

    pub fn with_config(config: NodeSetConfig) -> Self {
        let set_id = NodeSetId::next();
        Self {
            topology: TopologyDatabase::new(
                set_id,
                config.initial_node_capacity,
                config.initial_edge_capacity,
            ),
            forwarding: ForwardingTable::new(set_id, config.initial_node_capacity),
            port_arrays: PortArraySizeTable::new(set_id, config.initial_node_capacity),
            cache: TraversalCache::empty(),
            diff: GraphDiff::new(),
            render: RenderGraph::new(),
            scheduler: Scheduler::new(config.execution_strategy),
            values: GraphValueTable::new(set_id, config.initial_node_capacity),
            sort_strategy: config.sort_strategy,
            pending_messages: Vec::new(),
            tick: 0,
            safety: Mutex::new(AtomicSafetyManager::new()),
        }
    }

    pub fn set_id(&self) -> NodeSetId {
        self.topology.set_id()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn set_execution_strategy(&mut self, strategy: ExecutionStrategy) {
        self.scheduler.set_strategy(strategy);
    }

    /// Poll an external entity system for backing-storage moves and queue
    /// the resulting repatch requests, so that the next `update` rebinds
    /// any data input reading from a moved entity. Call before `update`
    /// on any tick where the host application's entity storage may have
    /// relocated (e.g. an ECS archetype move).
    pub fn notify_entity_moves<S: crate::diff::EntityMoveSource>(&mut self, source: &mut S) {
        self.diff.poll_entity_moves(source);
    }

    /// Register a node. Its kernel is not produced until the next
    /// `update` call that finds a stale cache: a node created this tick
    /// is scheduled starting the tick after.
    pub fn create_node(&mut self, definition: Box<dyn NodeDefinition>) -> NodeId {
        let ports = SmallVec::from_vec(definition.ports().to_vec());
        let debug_name = definition.debug_name();
        let node = self.topology.insert_node(debug_name, ports, definition);
        self.diff.record_created(node);
        node
    }

    /// Tear down a node: deactivate its kernel (if it had been
    /// activated), then remove it and every incident edge from the
    /// topology, along with any port-array sizing, forwarding entries,
    /// and one-shot data it held.
    pub fn destroy_node(&mut self, node: NodeId) -> Result<(), EngineError> {
        let debug_name = self.topology.node(node)?.debug_name;
        let array_head = self.topology.node(node)?.port_array_sizes_head;
        let forward_head = self.topology.node(node)?.forwarded_port_head;
        let kernel = self.render.remove_kernel(node).map(|entry| entry.kernel);
        if let Ok(entry) = self.topology.node_mut(node) {
            entry.weight.deactivate(kernel);
        }
        self.topology.remove_node(node)?;
        self.port_arrays.remove_list(array_head);
        self.forwarding.remove_list(forward_head);
        self.pending_messages.retain(|m| m.node != node);
        self.diff.record_destroyed(node, debug_name);
        Ok(())
    }

    /// Register a forwarding redirect: an outer port on `owning_node` is
    /// transparently rewritten onto `inner_node`'s `inner_port` whenever a
    /// `connect`/`disconnect` call names `(owning_node, outer_port)`,
    /// letting a container node expose an aggregate port the engine never
    /// sees directly in the topology. `direction` must match the
    /// direction the outer port is used as (`Output` for a source
    /// endpoint, `Input` for a destination endpoint).
    pub fn forward_port(
        &mut self,
        owning_node: NodeId,
        outer_port: PortAddr,
        inner_node: NodeId,
        inner_port: PortAddr,
        direction: PortDirection,
    ) -> Result<(), EngineError> {
        let head = self.topology.node(owning_node)?.forwarded_port_head;
        self.topology.node(inner_node)?;
        let new_head = self.forwarding.push(
            head,
            owning_node,
            outer_port,
            inner_node,
            inner_port,
            direction,
        );
        self.topology.node_mut(owning_node)?.forwarded_port_head = Some(new_head);
        Ok(())
    }

    pub fn connect(
        &mut self,
        src_node: NodeId,
        src_port: PortAddr,
        dst_node: NodeId,
        dst_port: PortAddr,
        category: EdgeCategory,
    ) -> Result<(), EngineError> {
        let src_head = self.topology.node(src_node)?.forwarded_port_head;
        let dst_head = self.topology.node(dst_node)?.forwarded_port_head;
        let (src_node, src_port) = self.forwarding.resolve(
            src_head,
            src_node,
            src_port,
            PortDirection::Output,
        );
        let (dst_node, dst_port) = self.forwarding.resolve(
            dst_head,
            dst_node,
            dst_port,
            PortDirection::Input,
        );
        let edge = self
            .topology
            .connect(src_node, src_port, dst_node, dst_port, category)?;
        self.render.clear_one_shot(dst_node, dst_port);
        self.diff.record_repatch(RepatchRequest::EdgeAdded(edge));
        Ok(())
    }

    pub fn disconnect(
        &mut self,
        src_node: NodeId,
        src_port: PortAddr,
        dst_node: NodeId,
        dst_port: PortAddr,
    ) -> Result<(), EngineError> {
        let edge = self
            .topology
            .disconnect(src_node, src_port, dst_node, dst_port)?;
        self.diff.record_repatch(RepatchRequest::EdgeRemoved(edge.id));
        Ok(())
    }

    /// Change a port array's current size. Shrinking disconnects every
    /// edge and one-shot value touching an index that falls out of range;
    /// growing makes the new indices available starting next tick, each
    /// reading blank until connected or written. Rejects sizes above
    /// [`MAX_PORT_ARRAY_SIZE`].
    pub fn resize_port_array(
        &mut self,
        node: NodeId,
        port: PortId,
        new_size: u32,
    ) -> Result<(), EngineError> {
        if new_size > MAX_PORT_ARRAY_SIZE {
            return Err(EngineError::OutOfRange);
        }

        let (head, initial) = {
            let entry = self.topology.node(node)?;
            let desc = entry
                .ports
                .iter()
                .find(|p| p.id == port)
                .ok_or(EngineError::InvalidPort(port))?;
            let initial = desc.array.ok_or(EngineError::InvalidPort(port))?;
            (entry.port_array_sizes_head, initial)
        };

        let old_size = self.port_arrays.current_size(head, port, initial);
        let new_head = self.port_arrays.set_size(head, node, port, new_size)?;
        if new_head != head {
            self.topology.node_mut(node)?.port_array_sizes_head = new_head;
        }

        if new_size < old_size {
            let stale: Vec<(NodeId, PortAddr, NodeId, PortAddr)> = self
                .topology
                .incoming(node)?
                .iter()
                .filter(|e| {
                    e.dst_port.port == port
                        && e.dst_port.array_index.map(|i| i.0 >= new_size).unwrap_or(false)
                })
                .map(|e| (e.src_node, e.src_port, e.dst_node, e.dst_port))
                .collect();
            for (src_node, src_port, dst_node, dst_port) in stale {
                self.disconnect(src_node, src_port, dst_node, dst_port)?;
            }
            for index in new_size..old_size {
                self.render
                    .clear_one_shot(node, PortAddr::array(port, ArrayIndex(index)));
            }
        }

        self.diff.record_repatch(RepatchRequest::PortArrayResized {
            node,
            port: PortAddr::scalar(port),
            old_size,
            new_size,
        });
        Ok(())
    }

    /// Queue a message for synchronous dispatch to `on_message` at the
    /// start of the next `update` call. Rejects targets that are not a
    /// message-category input port, and array addresses out of the
    /// port's current bound.
    pub fn send_message(
        &mut self,
        node: NodeId,
        port: PortAddr,
        payload: Box<dyn Any + Send>,
    ) -> Result<(), EngineError> {
        let entry = self.topology.node(node)?;
        let desc = entry
            .ports
            .iter()
            .find(|p| p.id == port.port)
            .ok_or(EngineError::InvalidPort(port.port))?;
        if desc.direction != PortDirection::Input || desc.category != PortCategory::Message {
            return Err(EngineError::InvalidPort(port.port));
        }
        if let (Some(initial), Some(index)) = (desc.array, port.array_index) {
            let size = self
                .port_arrays
                .current_size(entry.port_array_sizes_head, port.port, initial);
            if index.0 >= size {
                return Err(EngineError::OutOfRange);
            }
        }

        self.pending_messages.push(PendingMessage {
            node,
            port,
            payload,
        });
        Ok(())
    }

    /// Write a value directly onto an unconnected data input, bypassing
    /// the render graph's normal producer-to-consumer patching for this
    /// tick. Rejected if the input currently has a connected data source;
    /// the caller should `disconnect` first if it wants to override a
    /// wired input.
    pub fn set_data(
        &mut self,
        node: NodeId,
        port: PortAddr,
        value: Box<dyn DataValue>,
    ) -> Result<(), EngineError> {
        let entry = self.topology.node(node)?;
        let desc = entry
            .ports
            .iter()
            .find(|p| p.id == port.port)
            .ok_or(EngineError::InvalidPort(port.port))?;
        if desc.direction != PortDirection::Input
            || !matches!(desc.category, PortCategory::Data | PortCategory::DataBuffer)
        {
            return Err(EngineError::InvalidPort(port.port));
        }
        if self.topology.has_data_source(node, port) {
            return Err(EngineError::InvalidOperation(
                "data input already has a connected source",
            ));
        }

        self.render.set_data(node, port, value);
        self.diff.record_repatch(RepatchRequest::DataSet { node, port });
        Ok(())
    }

    pub fn create_graph_value(
        &mut self,
        target_node: NodeId,
        output_port: PortId,
        element_type: ElementType,
        blank: Box<dyn DataValue>,
    ) -> Result<GraphValueId, EngineError> {
        self.values
            .create(&self.topology, target_node, output_port, element_type, blank)
    }

    pub fn release_graph_value(&mut self, id: GraphValueId) -> Result<(), EngineError> {
        self.values.release(id)
    }

    /// `ReadGraphValue`: always safe to call, even mid-tick, since graph
    /// values are only refreshed at the end of `update`.
    pub fn read_graph_value(&self, id: GraphValueId) -> Result<(&dyn DataValue, bool), EngineError> {
        self.values.read(id)
    }

    /// Run one tick:
    /// 1. dispatch every message queued since the last tick;
    /// 2. activate any node created since the last tick that declares a
    ///    kernel;
    /// 3. run `update()` on every simulation-capable node;
    /// 4. if the topology changed, rebuild the traversal cache and
    ///    repatch the render graph;
    /// 5. run the scheduler, which reports `MissingDependency` if a job
    ///    touched a buffer the topology didn't expect it to (or skipped
    ///    one it did);
    /// 6. mirror graph value subscriptions from this tick's results;
    /// 7. bump the safety manager's render generation, invalidating every
    ///    handle minted this tick.
    pub fn update<R: KernelExecutionRuntime>(
        &mut self,
        runtime: &mut R,
        user: &mut dyn Any,
    ) -> Result<(), EngineError> {
        for message in self.pending_messages.drain(..) {
            if let Ok(entry) = self.topology.node_mut(message.node) {
                if entry.weight.capabilities().contains(NodeCapabilities::MESSAGES_IN) {
                    entry.weight.on_message(message.port, message.payload.as_ref());
                }
            }
        }

        for node in self.diff.created_nodes.clone() {
            if let Ok(entry) = self.topology.node_mut(node) {
                if entry.weight.capabilities().contains(NodeCapabilities::KERNEL) {
                    if let Ok(kernel) = entry.weight.activate() {
                        self.render.insert_kernel(node, kernel);
                    }
                }
            }
        }

        let live_nodes: Vec<NodeId> = self.topology.nodes().map(|(id, _)| id).collect();
        for node in live_nodes {
            if let Ok(entry) = self.topology.node_mut(node) {
                if entry.weight.capabilities().contains(NodeCapabilities::SIMULATION) {
                    entry.weight.update();
                }
            }
        }

        if self.cache.is_stale(self.topology.version()) || !self.diff.repatch.is_empty() {
            self.cache
                .rebuild(&self.topology, SCHEDULING_MASK, self.sort_strategy);
            let port_arrays = &self.port_arrays;
            let topology = &self.topology;
            self.render.patch(
                &self.topology,
                &self.cache,
                acquire_builtin,
                release_builtin,
                default_blank,
                |node, port, initial| {
                    let head = topology
                        .node(node)
                        .ok()
                        .and_then(|n| n.port_array_sizes_head);
                    port_arrays.current_size(head, port, initial)
                },
            );
        }

        let ctx = ExecuteContext {
            tick: self.tick,
            render_generation: self.tick,
            user,
        };
        let result =
            self.scheduler
                .run(&mut self.render, &self.cache, runtime, &ctx, &self.safety);

        self.values.refresh_target_existence(&self.topology);
        self.values.update_from_render(&self.render, copy_builtin);

        self.diff.clear();
        self.tick = self.tick.wrapping_add(1);
        self.safety.lock().unwrap().bump_temporary_handle_versions();

        result
    }
}

/// Default blank value for the reference node library's element types;
/// callers with custom element types build their own `NodeSet`-like
/// wrapper that supplies a richer blank constructor to `RenderGraph::patch`.
fn default_blank(elem: ElementType) -> Box<dyn DataValue> {
    if elem == ElementType::of::<f32>() {
        Box::new(0.0f32)
    } else if elem == ElementType::of::<f64>() {
        Box::new(0.0f64)
    } else if elem == ElementType::of::<i32>() {
        Box::new(0i32)
    } else if elem == ElementType::of::<i64>() {
        Box::new(0i64)
    } else if elem == ElementType::of::<bool>() {
        Box::new(false)
    } else {
        panic!(
            "default_blank: unsupported element type {:?}; register a custom blank fn",
            elem
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgraph_core::PortsView;

    struct AddOneDef {
        activated: bool,
    }

    struct AddOneKernel;

    impl flowgraph_core::Kernel for AddOneKernel {
        fn execute(&mut self, ports: &mut PortsView<'_>, _ctx: &ExecuteContext<'_>) {
            let input: f32 = ports.input::<f32>(PortId(0)).copied().unwrap_or(0.0);
            if let Some(out) = ports.output_mut::<f32>(PortId(1)) {
                *out = input + 1.0;
            }
        }
    }

    impl flowgraph_core::NodeDefinition for AddOneDef {
        fn debug_name(&self) -> &'static str {
            "add_one"
        }
        fn capabilities(&self) -> NodeCapabilities {
            NodeCapabilities::KERNEL | NodeCapabilities::DATA_IN | NodeCapabilities::DATA_OUT
        }
        fn ports(&self) -> &[flowgraph_core::PortDesc] {
            use std::sync::OnceLock;
            static PORTS: OnceLock<[flowgraph_core::PortDesc; 2]> = OnceLock::new();
            PORTS.get_or_init(|| {
                [
                    flowgraph_core::PortDesc {
                        id: PortId(0),
                        category: PortCategory::Data,
                        direction: PortDirection::Input,
                        element_type: ElementType::of::<f32>(),
                        array: None,
                        buffer: None,
                    },
                    flowgraph_core::PortDesc {
                        id: PortId(1),
                        category: PortCategory::Data,
                        direction: PortDirection::Output,
                        element_type: ElementType::of::<f32>(),
                        array: None,
                        buffer: None,
                    },
                ]
            })
        }
        fn activate(
            &mut self,
        ) -> Result<Box<dyn flowgraph_core::Kernel>, Box<dyn std::error::Error>> {
            self.activated = true;
            Ok(Box::new(AddOneKernel))
        }
    }

    #[test]
    fn chain_of_two_add_one_nodes_ticks_correctly() {
        let mut set = NodeSet::new(ExecutionStrategy::Synchronous, SortStrategy::GlobalBreadthFirst);
        let a = set.create_node(Box::new(AddOneDef { activated: false }));
        let b = set.create_node(Box::new(AddOneDef { activated: false }));
        set.connect(
            a,
            PortAddr::scalar(PortId(1)),
            b,
            PortAddr::scalar(PortId(0)),
            EdgeCategory::DataFlow,
        )
        .unwrap();

        let gv = set
            .create_graph_value(b, PortId(1), ElementType::of::<f32>(), Box::new(0.0f32))
            .unwrap();

        let mut runtime = InlineRuntime { next: 0 };
        let mut user = ();
        set.update(&mut runtime, &mut user).unwrap();
        set.update(&mut runtime, &mut user).unwrap();

        let (value, exists) = set.read_graph_value(gv).unwrap();
        assert!(exists);
        assert_eq!(*value.downcast_ref::<f32>().unwrap(), 2.0);
    }

    #[test]
    fn set_data_rejected_when_input_is_connected() {
        let mut set = NodeSet::new(ExecutionStrategy::Synchronous, SortStrategy::GlobalBreadthFirst);
        let a = set.create_node(Box::new(AddOneDef { activated: false }));
        let b = set.create_node(Box::new(AddOneDef { activated: false }));
        set.connect(
            a,
            PortAddr::scalar(PortId(1)),
            b,
            PortAddr::scalar(PortId(0)),
            EdgeCategory::DataFlow,
        )
        .unwrap();

        let err = set
            .set_data(b, PortAddr::scalar(PortId(0)), Box::new(5.0f32))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidOperation(_)));
    }

    #[test]
    fn forwarded_outer_port_redirects_connect_to_the_inner_node() {
        let mut set = NodeSet::new(ExecutionStrategy::Synchronous, SortStrategy::GlobalBreadthFirst);
        // `container` stands in for an outer node exposing `inner`'s input
        // port as its own; the engine's topology never sees `container`
        // as a connection endpoint.
        let container = set.create_node(Box::new(AddOneDef { activated: false }));
        let inner = set.create_node(Box::new(AddOneDef { activated: false }));
        let upstream = set.create_node(Box::new(AddOneDef { activated: false }));

        set.forward_port(
            container,
            PortAddr::scalar(PortId(0)),
            inner,
            PortAddr::scalar(PortId(0)),
            PortDirection::Input,
        )
        .unwrap();

        set.connect(
            upstream,
            PortAddr::scalar(PortId(1)),
            container,
            PortAddr::scalar(PortId(0)),
            EdgeCategory::DataFlow,
        )
        .unwrap();

        assert!(set.topology.incoming(container).unwrap().is_empty());
        let inner_incoming = set.topology.incoming(inner).unwrap();
        assert_eq!(inner_incoming.len(), 1);
        assert_eq!(inner_incoming[0].src_node, upstream);
        assert_eq!(inner_incoming[0].dst_node, inner);

        // Destroying the owning node tears down its forwarding list; a
        // later forward registered under a reused slot does not inherit
        // stale entries.
        set.destroy_node(container).unwrap();
        let rebuilt = set.create_node(Box::new(AddOneDef { activated: false }));
        assert!(set.topology.node(rebuilt).unwrap().forwarded_port_head.is_none());
    }

    #[test]
    fn three_node_chain_produces_one_two_three_after_one_tick() {
        let mut set = NodeSet::new(ExecutionStrategy::Synchronous, SortStrategy::GlobalBreadthFirst);
        let a = set.create_node(Box::new(AddOneDef { activated: false }));
        let b = set.create_node(Box::new(AddOneDef { activated: false }));
        let c = set.create_node(Box::new(AddOneDef { activated: false }));
        set.connect(
            a,
            PortAddr::scalar(PortId(1)),
            b,
            PortAddr::scalar(PortId(0)),
            EdgeCategory::DataFlow,
        )
        .unwrap();
        set.connect(
            b,
            PortAddr::scalar(PortId(1)),
            c,
            PortAddr::scalar(PortId(0)),
            EdgeCategory::DataFlow,
        )
        .unwrap();

        let gv_a = set
            .create_graph_value(a, PortId(1), ElementType::of::<f32>(), Box::new(0.0f32))
            .unwrap();
        let gv_b = set
            .create_graph_value(b, PortId(1), ElementType::of::<f32>(), Box::new(0.0f32))
            .unwrap();
        let gv_c = set
            .create_graph_value(c, PortId(1), ElementType::of::<f32>(), Box::new(0.0f32))
            .unwrap();

        let mut runtime = InlineRuntime { next: 0 };
        let mut user = ();
        set.update(&mut runtime, &mut user).unwrap();

        assert_eq!(
            *set.read_graph_value(gv_a).unwrap().0.downcast_ref::<f32>().unwrap(),
            1.0
        );
        assert_eq!(
            *set.read_graph_value(gv_b).unwrap().0.downcast_ref::<f32>().unwrap(),
            2.0
        );
        assert_eq!(
            *set.read_graph_value(gv_c).unwrap().0.downcast_ref::<f32>().unwrap(),
            3.0
        );
    }

    struct PassThroughDef;
    struct PassThroughKernel;

    impl flowgraph_core::Kernel for PassThroughKernel {
        fn execute(&mut self, ports: &mut PortsView<'_>, _ctx: &ExecuteContext<'_>) {
            let input: f32 = ports.input::<f32>(PortId(0)).copied().unwrap_or(0.0);
            if let Some(out) = ports.output_mut::<f32>(PortId(1)) {
                *out = input;
            }
        }
    }

    impl flowgraph_core::NodeDefinition for PassThroughDef {
        fn debug_name(&self) -> &'static str {
            "pass_through"
        }
        fn capabilities(&self) -> NodeCapabilities {
            NodeCapabilities::KERNEL | NodeCapabilities::DATA_IN | NodeCapabilities::DATA_OUT
        }
        fn ports(&self) -> &[flowgraph_core::PortDesc] {
            use std::sync::OnceLock;
            static PORTS: OnceLock<[flowgraph_core::PortDesc; 2]> = OnceLock::new();
            PORTS.get_or_init(|| {
                [
                    flowgraph_core::PortDesc {
                        id: PortId(0),
                        category: PortCategory::Data,
                        direction: PortDirection::Input,
                        element_type: ElementType::of::<f32>(),
                        array: None,
                        buffer: None,
                    },
                    flowgraph_core::PortDesc {
                        id: PortId(1),
                        category: PortCategory::Data,
                        direction: PortDirection::Output,
                        element_type: ElementType::of::<f32>(),
                        array: None,
                        buffer: None,
                    },
                ]
            })
        }
        fn activate(
            &mut self,
        ) -> Result<Box<dyn flowgraph_core::Kernel>, Box<dyn std::error::Error>> {
            Ok(Box::new(PassThroughKernel))
        }
    }

    struct MulThreeDef;
    struct MulThreeKernel;

    impl flowgraph_core::Kernel for MulThreeKernel {
        fn execute(&mut self, ports: &mut PortsView<'_>, _ctx: &ExecuteContext<'_>) {
            let input: f32 = ports.input::<f32>(PortId(0)).copied().unwrap_or(0.0);
            if let Some(out) = ports.output_mut::<f32>(PortId(1)) {
                *out = input * 3.0;
            }
        }
    }

    impl flowgraph_core::NodeDefinition for MulThreeDef {
        fn debug_name(&self) -> &'static str {
            "mul_three"
        }
        fn capabilities(&self) -> NodeCapabilities {
            NodeCapabilities::KERNEL | NodeCapabilities::DATA_IN | NodeCapabilities::DATA_OUT
        }
        fn ports(&self) -> &[flowgraph_core::PortDesc] {
            use std::sync::OnceLock;
            static PORTS: OnceLock<[flowgraph_core::PortDesc; 2]> = OnceLock::new();
            PORTS.get_or_init(|| {
                [
                    flowgraph_core::PortDesc {
                        id: PortId(0),
                        category: PortCategory::Data,
                        direction: PortDirection::Input,
                        element_type: ElementType::of::<f32>(),
                        array: None,
                        buffer: None,
                    },
                    flowgraph_core::PortDesc {
                        id: PortId(1),
                        category: PortCategory::Data,
                        direction: PortDirection::Output,
                        element_type: ElementType::of::<f32>(),
                        array: None,
                        buffer: None,
                    },
                ]
            })
        }
        fn activate(
            &mut self,
        ) -> Result<Box<dyn flowgraph_core::Kernel>, Box<dyn std::error::Error>> {
            Ok(Box::new(MulThreeKernel))
        }
    }

    struct SumTwoDef;
    struct SumTwoKernel;

    impl flowgraph_core::Kernel for SumTwoKernel {
        fn execute(&mut self, ports: &mut PortsView<'_>, _ctx: &ExecuteContext<'_>) {
            let left: f32 = ports.input::<f32>(PortId(0)).copied().unwrap_or(0.0);
            let right: f32 = ports.input::<f32>(PortId(1)).copied().unwrap_or(0.0);
            if let Some(out) = ports.output_mut::<f32>(PortId(2)) {
                *out = left + right;
            }
        }
    }

    impl flowgraph_core::NodeDefinition for SumTwoDef {
        fn debug_name(&self) -> &'static str {
            "sum_two"
        }
        fn capabilities(&self) -> NodeCapabilities {
            NodeCapabilities::KERNEL | NodeCapabilities::DATA_IN | NodeCapabilities::DATA_OUT
        }
        fn ports(&self) -> &[flowgraph_core::PortDesc] {
            use std::sync::OnceLock;
            static PORTS: OnceLock<[flowgraph_core::PortDesc; 3]> = OnceLock::new();
            PORTS.get_or_init(|| {
                [
                    flowgraph_core::PortDesc {
                        id: PortId(0),
                        category: PortCategory::Data,
                        direction: PortDirection::Input,
                        element_type: ElementType::of::<f32>(),
                        array: None,
                        buffer: None,
                    },
                    flowgraph_core::PortDesc {
                        id: PortId(1),
                        category: PortCategory::Data,
                        direction: PortDirection::Input,
                        element_type: ElementType::of::<f32>(),
                        array: None,
                        buffer: None,
                    },
                    flowgraph_core::PortDesc {
                        id: PortId(2),
                        category: PortCategory::Data,
                        direction: PortDirection::Output,
                        element_type: ElementType::of::<f32>(),
                        array: None,
                        buffer: None,
                    },
                ]
            })
        }
        fn activate(
            &mut self,
        ) -> Result<Box<dyn flowgraph_core::Kernel>, Box<dyn std::error::Error>> {
            Ok(Box::new(SumTwoKernel))
        }
    }

    #[test]
    fn diamond_graph_sums_to_sixty() {
        let mut set = NodeSet::new(ExecutionStrategy::Synchronous, SortStrategy::GlobalBreadthFirst);
        let a = set.create_node(Box::new(PassThroughDef));
        let b = set.create_node(Box::new(MulThreeDef));
        let c = set.create_node(Box::new(MulThreeDef));
        let d = set.create_node(Box::new(SumTwoDef));

        set.connect(
            a,
            PortAddr::scalar(PortId(1)),
            b,
            PortAddr::scalar(PortId(0)),
            EdgeCategory::DataFlow,
        )
        .unwrap();
        set.connect(
            a,
            PortAddr::scalar(PortId(1)),
            c,
            PortAddr::scalar(PortId(0)),
            EdgeCategory::DataFlow,
        )
        .unwrap();
        set.connect(
            b,
            PortAddr::scalar(PortId(1)),
            d,
            PortAddr::scalar(PortId(0)),
            EdgeCategory::DataFlow,
        )
        .unwrap();
        set.connect(
            c,
            PortAddr::scalar(PortId(1)),
            d,
            PortAddr::scalar(PortId(1)),
            EdgeCategory::DataFlow,
        )
        .unwrap();

        set.set_data(a, PortAddr::scalar(PortId(0)), Box::new(10.0f32))
            .unwrap();

        let gv = set
            .create_graph_value(d, PortId(2), ElementType::of::<f32>(), Box::new(0.0f32))
            .unwrap();

        let mut runtime = InlineRuntime { next: 0 };
        let mut user = ();
        set.update(&mut runtime, &mut user).unwrap();

        let (value, exists) = set.read_graph_value(gv).unwrap();
        assert!(exists);
        assert_eq!(*value.downcast_ref::<f32>().unwrap(), 60.0);
    }

    struct MessageArrayDef {
        log: std::sync::Arc<std::sync::Mutex<Vec<(u32, i32)>>>,
    }

    impl flowgraph_core::NodeDefinition for MessageArrayDef {
        fn debug_name(&self) -> &'static str {
            "message_array"
        }
        fn capabilities(&self) -> NodeCapabilities {
            NodeCapabilities::MESSAGES_IN
        }
        fn ports(&self) -> &[flowgraph_core::PortDesc] {
            use std::sync::OnceLock;
            static PORTS: OnceLock<[flowgraph_core::PortDesc; 1]> = OnceLock::new();
            PORTS.get_or_init(|| {
                [flowgraph_core::PortDesc {
                    id: PortId(0),
                    category: PortCategory::Message,
                    direction: PortDirection::Input,
                    element_type: ElementType::of::<i32>(),
                    array: Some(5),
                    buffer: None,
                }]
            })
        }
        fn activate(
            &mut self,
        ) -> Result<Box<dyn flowgraph_core::Kernel>, Box<dyn std::error::Error>> {
            Err("message_array declares no kernel".into())
        }
        fn on_message(&mut self, port: PortAddr, message: &dyn Any) {
            if let Some(value) = message.downcast_ref::<i32>() {
                if let Some(index) = port.array_index {
                    self.log.lock().unwrap().push((index.0, *value));
                }
            }
        }
    }

    #[test]
    fn resized_message_array_still_delivers_to_a_preserved_index() {
        let log = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut set = NodeSet::new(ExecutionStrategy::Synchronous, SortStrategy::GlobalBreadthFirst);
        let node = set.create_node(Box::new(MessageArrayDef { log: log.clone() }));

        set.send_message(
            node,
            PortAddr::array(PortId(0), ArrayIndex(2)),
            Box::new(4i32),
        )
        .unwrap();

        let mut runtime = InlineRuntime { next: 0 };
        let mut user = ();
        set.update(&mut runtime, &mut user).unwrap();

        set.resize_port_array(node, PortId(0), 3).unwrap();

        set.send_message(
            node,
            PortAddr::array(PortId(0), ArrayIndex(2)),
            Box::new(4i32),
        )
        .unwrap();
        set.update(&mut runtime, &mut user).unwrap();

        assert_eq!(*log.lock().unwrap(), vec![(2, 4), (2, 4)]);
    }

    #[test]
    fn resize_port_array_rejects_oversized_request() {
        let mut set = NodeSet::new(ExecutionStrategy::Synchronous, SortStrategy::GlobalBreadthFirst);
        let a = set.create_node(Box::new(AddOneDef { activated: false }));
        let err = set
            .resize_port_array(a, PortId(0), MAX_PORT_ARRAY_SIZE + 1)
            .unwrap_err();
        assert!(matches!(err, EngineError::OutOfRange));
    }

    // A trivial in-module stand-in so these tests do not need to depend on
    // `flowgraph-jobs`; equivalent to `flowgraph_jobs::SynchronousRuntime`.
    struct InlineRuntime {
        next: u64,
    }
    impl KernelExecutionRuntime for InlineRuntime {
        fn schedule(
            &mut self,
            work: Box<dyn FnOnce() + Send + 'static>,
            _deps: &[flowgraph_core::Fence],
        ) -> flowgraph_core::Fence {
            work();
            self.next += 1;
            flowgraph_core::Fence(self.next)
        }
        fn complete(&mut self, _fence: flowgraph_core::Fence) {}
    }
}
