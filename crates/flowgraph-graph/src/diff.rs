use flowgraph_core::{EdgeId, NodeId, PortAddr};

/// One requested repatch: some downstream kernel's source pointer needs to
/// be recomputed before the next execution, because the topology,
/// a buffer size, or an entity's backing storage changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepatchRequest {
    EdgeAdded(EdgeId),
    EdgeRemoved(EdgeId),
    PortArrayResized {
        node: NodeId,
        port: PortAddr,
        old_size: u32,
        new_size: u32,
    },
    /// An entity system reported that a tracked entity's backing memory
    /// moved; any data input reading from it must be repatched.
    EntityMoved { node: NodeId, port: PortAddr },
    /// A one-shot value was written directly onto an unconnected data
    /// input; the render graph must bind that input to the written slot.
    DataSet { node: NodeId, port: PortAddr },
}

/// A per-tick accumulator of structural changes, consumed at tick start
/// (applied to the topology/forwarding tables) and by the render graph to
/// update its kernel storage and run the patching algorithm.
#[derive(Debug, Default)]
pub struct GraphDiff {
    pub created_nodes: Vec<NodeId>,
    pub destroyed_nodes: Vec<(NodeId, &'static str)>,
    pub repatch: Vec<RepatchRequest>,
}

impl GraphDiff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.created_nodes.is_empty() && self.destroyed_nodes.is_empty() && self.repatch.is_empty()
    }

    pub fn record_created(&mut self, node: NodeId) {
        self.created_nodes.push(node);
    }

    pub fn record_destroyed(&mut self, node: NodeId, debug_name: &'static str) {
        self.destroyed_nodes.push((node, debug_name));
    }

    pub fn record_repatch(&mut self, request: RepatchRequest) {
        self.repatch.push(request);
    }

    /// Clear the accumulator at tick start, after its contents have been
    /// applied and handed to the render graph. Reset fresh every tick.
    pub fn clear(&mut self) {
        self.created_nodes.clear();
        self.destroyed_nodes.clear();
        self.repatch.clear();
    }

    /// Poll an external entity system for moves since the last tick and
    /// translate each into an `EntityMoved` repatch request for the
    /// subscribed `(node, port)` pair, if any.
    pub fn poll_entity_moves<S: EntityMoveSource>(&mut self, source: &mut S) {
        for moved in source.drain_moves() {
            self.record_repatch(RepatchRequest::EntityMoved {
                node: moved.0,
                port: moved.1,
            });
        }
    }
}

/// A narrow notification surface an external entity-component system can
/// implement so the graph diff can poll it for backing-storage moves,
/// without the engine depending on any particular ECS crate.
///
/// `drain_moves` returns every `(node, port)` whose subscribed entity's
/// storage moved since the last call, clearing its own internal queue.
pub trait EntityMoveSource {
    fn drain_moves(&mut self) -> Vec<(NodeId, PortAddr)>;
}
