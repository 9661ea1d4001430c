use ahash::AHashSet;
use smallvec::SmallVec;

use flowgraph_core::{
    EdgeCategory, EdgeId, EngineError, ForwardId, NodeId, NodeSetId, PortAddr, PortArraySizeId,
    PortCategory, PortDesc, PortDirection, SlotTable,
};

/// One directed connection between two ports, as recorded in the edge
/// table and threaded through each endpoint's adjacency list.
///
/// Kept `Copy` so that per-node `incoming`/`outgoing` lists can hold plain
/// values rather than indices needing a second lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub id: EdgeId,
    pub src_node: NodeId,
    pub src_port: PortAddr,
    pub dst_node: NodeId,
    pub dst_port: PortAddr,
    pub category: EdgeCategory,
}

/// A node as tracked by the topology database: its static port table plus
/// the two adjacency lists threading the edge table.
pub struct NodeEntry<T> {
    pub id: NodeId,
    pub debug_name: &'static str,
    pub ports: SmallVec<[PortDesc; 8]>,
    pub forwarded_port_head: Option<ForwardId>,
    pub port_array_sizes_head: Option<PortArraySizeId>,
    pub weight: T,
    pub(crate) incoming: SmallVec<[Edge; 4]>,
    pub(crate) outgoing: SmallVec<[Edge; 4]>,
}

impl<T> NodeEntry<T> {
    fn port(&self, addr: PortAddr) -> Option<&PortDesc> {
        self.ports.iter().find(|p| p.id == addr.port)
    }

    /// The data/feedback edge feeding a given input port address
    /// (scalar, or one array subport), if connected. At most one such
    /// edge can exist per port, so the first match is the only one.
    pub fn incoming_for_port_addr(&self, addr: PortAddr) -> Option<&Edge> {
        self.incoming
            .iter()
            .find(|e| e.dst_port == addr && e.category.is_data())
    }

    pub fn incoming(&self) -> &[Edge] {
        &self.incoming
    }

    pub fn outgoing(&self) -> &[Edge] {
        &self.outgoing
    }
}

/// Edges keyed by category, per-node adjacency lists, and the port
/// compatibility rules that gate `connect`.
///
/// Owns the node and edge slot tables; `flowgraph-graph`'s higher-level
/// `NodeSet` composes one `TopologyDatabase` with the forwarding table,
/// traversal cache, render graph, and scheduler.
pub struct TopologyDatabase<T> {
    set_id: NodeSetId,
    nodes: SlotTable<flowgraph_core::handle::NodeKind, NodeEntry<T>>,
    edges: SlotTable<flowgraph_core::handle::EdgeKind, Edge>,
    connected_data_inputs: AHashSet<(NodeId, PortAddr)>,
    version: u64,
}

impl<T> TopologyDatabase<T> {
    pub fn new(set_id: NodeSetId, node_capacity: usize, edge_capacity: usize) -> Self {
        Self {
            set_id,
            nodes: SlotTable::new(set_id, node_capacity),
            edges: SlotTable::new(set_id, edge_capacity),
            connected_data_inputs: AHashSet::with_capacity(edge_capacity),
            version: 0,
        }
    }

    pub fn set_id(&self) -> NodeSetId {
        self.set_id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    fn bump_version(&mut self) {
        self.version = self.version.wrapping_add(1);
    }

    pub fn insert_node(
        &mut self,
        debug_name: &'static str,
        ports: SmallVec<[PortDesc; 8]>,
        weight: T,
    ) -> NodeId {
        let id = self.nodes.insert(NodeEntry {
            id: NodeId::default_dangling(),
            debug_name,
            ports,
            forwarded_port_head: None,
            port_array_sizes_head: None,
            weight,
            incoming: SmallVec::new(),
            outgoing: SmallVec::new(),
        });
        self.nodes.get_mut(id).unwrap().id = id;
        self.bump_version();
        id
    }

    pub fn node(&self, id: NodeId) -> Result<&NodeEntry<T>, EngineError> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut NodeEntry<T>, EngineError> {
        self.nodes.get_mut(id)
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.nodes.contains(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &NodeEntry<T>)> {
        self.nodes.iter()
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = (NodeId, &mut NodeEntry<T>)> {
        self.nodes.iter_mut()
    }

    pub fn edge(&self, id: EdgeId) -> Result<&Edge, EngineError> {
        self.edges.get(id)
    }

    pub fn edges(&self) -> impl Iterator<Item = (EdgeId, &Edge)> {
        self.edges.iter()
    }

    /// Remove a node and every edge incident to it, atomically with
    /// respect to the next tick — all removal happens before this call
    /// returns, so no dangling edge can be observed by the caller.
    pub fn remove_node(&mut self, id: NodeId) -> Result<Vec<EdgeId>, EngineError> {
        let entry = self.nodes.remove(id)?;

        let incident: Vec<EdgeId> = entry
            .incoming
            .iter()
            .chain(entry.outgoing.iter())
            .map(|e| e.id)
            .collect();

        for edge_id in &incident {
            self.disconnect_by_id(*edge_id).ok();
        }

        self.bump_version();
        Ok(incident)
    }

    /// Connect an output port to an input port, checking the compatibility
    /// rules below:
    /// - categories must match, except a `Message` output may drive a
    ///   `Data` input (recorded as a `DataFlow` edge, one-shot);
    /// - element types must be identical;
    /// - at most one data/feedback source per `(dst_node, dst_port)`.
    pub fn connect(
        &mut self,
        src_node: NodeId,
        src_port: PortAddr,
        dst_node: NodeId,
        dst_port: PortAddr,
        category: EdgeCategory,
    ) -> Result<EdgeId, EngineError> {
        let src_desc = self
            .nodes
            .get(src_node)?
            .port(src_port)
            .copied()
            .ok_or(EngineError::InvalidPort(src_port.port))?;
        let dst_desc = self
            .nodes
            .get(dst_node)?
            .port(dst_port)
            .copied()
            .ok_or(EngineError::InvalidPort(dst_port.port))?;

        if src_desc.direction != PortDirection::Output {
            return Err(EngineError::InvalidPort(src_port.port));
        }
        if dst_desc.direction != PortDirection::Input {
            return Err(EngineError::InvalidPort(dst_port.port));
        }

        let message_drives_data =
            src_desc.category == PortCategory::Message && dst_desc.category == PortCategory::Data;
        if src_desc.category != dst_desc.category && !message_drives_data {
            return Err(EngineError::TypeMismatch {
                expected: dst_desc.element_type.name(),
                found: src_desc.element_type.name(),
            });
        }
        if src_desc.element_type != dst_desc.element_type {
            return Err(EngineError::TypeMismatch {
                expected: dst_desc.element_type.name(),
                found: src_desc.element_type.name(),
            });
        }

        if category.is_data() {
            if !self.connected_data_inputs.insert((dst_node, dst_port)) {
                return Err(EngineError::InvalidOperation(
                    "data input already has a connected source",
                ));
            }
        }

        let id = self.edges.insert(Edge {
            id: EdgeId::default_dangling(),
            src_node,
            src_port,
            dst_node,
            dst_port,
            category,
        });
        let edge = {
            let slot = self.edges.get_mut(id)?;
            slot.id = id;
            *slot
        };

        self.nodes.get_mut(src_node)?.outgoing.push(edge);
        self.nodes.get_mut(dst_node)?.incoming.push(edge);

        self.bump_version();
        Ok(id)
    }

    pub fn disconnect_by_id(&mut self, edge_id: EdgeId) -> Result<Edge, EngineError> {
        let edge = self.edges.remove(edge_id)?;

        if let Ok(src) = self.nodes.get_mut(edge.src_node) {
            src.outgoing.retain(|e| e.id != edge_id);
        }
        if let Ok(dst) = self.nodes.get_mut(edge.dst_node) {
            dst.incoming.retain(|e| e.id != edge_id);
        }
        if edge.category.is_data() {
            self.connected_data_inputs
                .remove(&(edge.dst_node, edge.dst_port));
        }

        self.bump_version();
        Ok(edge)
    }

    pub fn disconnect(
        &mut self,
        src_node: NodeId,
        src_port: PortAddr,
        dst_node: NodeId,
        dst_port: PortAddr,
    ) -> Result<Edge, EngineError> {
        let edge_id = self
            .nodes
            .get(dst_node)?
            .incoming
            .iter()
            .find(|e| e.src_node == src_node && e.src_port == src_port && e.dst_port == dst_port)
            .map(|e| e.id)
            .ok_or(EngineError::InvalidHandle)?;
        self.disconnect_by_id(edge_id)
    }

    pub fn incoming(&self, node: NodeId) -> Result<&[Edge], EngineError> {
        Ok(&self.nodes.get(node)?.incoming)
    }

    pub fn outgoing(&self, node: NodeId) -> Result<&[Edge], EngineError> {
        Ok(&self.nodes.get(node)?.outgoing)
    }

    /// Whether a data/feedback edge currently drives `port` on `node`
    /// Used by `NodeSet::set_data` to reject a one-shot write onto
    /// a port that an edge already supplies.
    pub fn has_data_source(&self, node: NodeId, port: PortAddr) -> bool {
        self.connected_data_inputs.contains(&(node, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgraph_core::{ArrayIndex, ElementType, PortCategory, PortDirection, PortId};

    fn desc(id: u32, cat: PortCategory, dir: PortDirection) -> PortDesc {
        PortDesc {
            id: PortId(id),
            category: cat,
            direction: dir,
            element_type: ElementType::of::<f32>(),
            array: None,
            buffer: None,
        }
    }

    fn fresh_db() -> TopologyDatabase<()> {
        TopologyDatabase::new(NodeSetId::next(), 8, 8)
    }

    #[test]
    fn connect_then_disconnect_restores_state() {
        let mut db = fresh_db();
        let a = db.insert_node(
            "a",
            SmallVec::from_vec(vec![desc(0, PortCategory::Data, PortDirection::Output)]),
            (),
        );
        let b = db.insert_node(
            "b",
            SmallVec::from_vec(vec![desc(0, PortCategory::Data, PortDirection::Input)]),
            (),
        );

        let v0 = db.version();
        let edge = db
            .connect(
                a,
                PortAddr::scalar(PortId(0)),
                b,
                PortAddr::scalar(PortId(0)),
                EdgeCategory::DataFlow,
            )
            .unwrap();
        let v1 = db.version();
        assert!(v1 > v0);
        assert_eq!(db.outgoing(a).unwrap().len(), 1);
        assert_eq!(db.incoming(b).unwrap().len(), 1);

        db.disconnect_by_id(edge).unwrap();
        let v2 = db.version();
        assert!(v2 > v1);
        assert!(db.outgoing(a).unwrap().is_empty());
        assert!(db.incoming(b).unwrap().is_empty());
    }

    #[test]
    fn second_data_source_on_same_input_rejected() {
        let mut db = fresh_db();
        let a = db.insert_node(
            "a",
            SmallVec::from_vec(vec![desc(0, PortCategory::Data, PortDirection::Output)]),
            (),
        );
        let c = db.insert_node(
            "c",
            SmallVec::from_vec(vec![desc(0, PortCategory::Data, PortDirection::Output)]),
            (),
        );
        let b = db.insert_node(
            "b",
            SmallVec::from_vec(vec![desc(0, PortCategory::Data, PortDirection::Input)]),
            (),
        );

        db.connect(
            a,
            PortAddr::scalar(PortId(0)),
            b,
            PortAddr::scalar(PortId(0)),
            EdgeCategory::DataFlow,
        )
        .unwrap();

        let err = db
            .connect(
                c,
                PortAddr::scalar(PortId(0)),
                b,
                PortAddr::scalar(PortId(0)),
                EdgeCategory::DataFlow,
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidOperation(_)));
    }

    #[test]
    fn message_output_may_drive_data_input() {
        let mut db = fresh_db();
        let a = db.insert_node(
            "a",
            SmallVec::from_vec(vec![desc(0, PortCategory::Message, PortDirection::Output)]),
            (),
        );
        let b = db.insert_node(
            "b",
            SmallVec::from_vec(vec![desc(0, PortCategory::Data, PortDirection::Input)]),
            (),
        );

        db.connect(
            a,
            PortAddr::scalar(PortId(0)),
            b,
            PortAddr::scalar(PortId(0)),
            EdgeCategory::DataFlow,
        )
        .unwrap();
    }

    #[test]
    fn remove_node_removes_incident_edges() {
        let mut db = fresh_db();
        let a = db.insert_node(
            "a",
            SmallVec::from_vec(vec![desc(0, PortCategory::Data, PortDirection::Output)]),
            (),
        );
        let b = db.insert_node(
            "b",
            SmallVec::from_vec(vec![desc(0, PortCategory::Data, PortDirection::Input)]),
            (),
        );
        db.connect(
            a,
            PortAddr::scalar(PortId(0)),
            b,
            PortAddr::scalar(PortId(0)),
            EdgeCategory::DataFlow,
        )
        .unwrap();

        let removed = db.remove_node(a).unwrap();
        assert_eq!(removed.len(), 1);
        assert!(db.incoming(b).unwrap().is_empty());
    }

    #[allow(dead_code)]
    fn unused_array_index_silences_import(_: ArrayIndex) {}
}
