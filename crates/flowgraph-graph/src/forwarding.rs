use flowgraph_core::{ForwardId, NodeId, NodeSetId, PortAddr, PortDirection, SlotTable};

/// A single forwarding redirect: an outer port on `owning_node` is
/// transparently rewritten onto `inner_node`'s `inner_port` during edge
/// resolution, so container nodes can expose aggregate ports the engine
/// never sees directly in the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardEntry {
    pub owning_node: NodeId,
    pub outer_port: PortAddr,
    pub inner_node: NodeId,
    pub inner_port: PortAddr,
    pub direction: PortDirection,
    next: Option<ForwardId>,
}

/// Stores forwarding redirects as singly-linked lists, one list per owning
/// node (a node may forward several of its ports onto several different
/// inner nodes). The rewrite pass runs at `connect`/`disconnect` time
/// rather than at kernel execution, keeping the hot path branch-free.
pub struct ForwardingTable {
    entries: SlotTable<flowgraph_core::handle::ForwardKind, ForwardEntry>,
}

impl ForwardingTable {
    pub fn new(set_id: NodeSetId, capacity: usize) -> Self {
        Self {
            entries: SlotTable::new(set_id, capacity),
        }
    }

    /// Add a forwarding entry onto the head of `owning_node`'s list,
    /// returning the new head.
    pub fn push(
        &mut self,
        head: Option<ForwardId>,
        owning_node: NodeId,
        outer_port: PortAddr,
        inner_node: NodeId,
        inner_port: PortAddr,
        direction: PortDirection,
    ) -> ForwardId {
        self.entries.insert(ForwardEntry {
            owning_node,
            outer_port,
            inner_node,
            inner_port,
            direction,
            next: head,
        })
    }

    /// Walk the forwarding list starting at `head`, rewriting `(node,
    /// port)` onto the innermost node/port it resolves to. Ports with no
    /// matching forward entry pass through unchanged.
    pub fn resolve(
        &self,
        mut head: Option<ForwardId>,
        node: NodeId,
        port: PortAddr,
        direction: PortDirection,
    ) -> (NodeId, PortAddr) {
        let mut resolved = (node, port);
        let mut guard = 0usize;

        while let Some(id) = head {
            guard += 1;
            if guard > 4096 {
                // A malformed or cyclic forwarding chain; bail out rather
                // than loop forever. Structural forwarding cycles are a
                // node-definition registration bug, not a runtime one.
                break;
            }

            let Ok(entry) = self.entries.get(id) else {
                break;
            };
            if entry.outer_port != resolved.1 || entry.direction != direction {
                head = entry.next;
                continue;
            }

            resolved = (entry.inner_node, entry.inner_port);
            head = None;
        }

        resolved
    }

    pub fn remove_list(&mut self, mut head: Option<ForwardId>) {
        while let Some(id) = head {
            let Ok(entry) = self.entries.remove(id) else {
                break;
            };
            head = entry.next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgraph_core::PortId;

    #[test]
    fn resolve_rewrites_outer_port_to_inner() {
        let set_id = NodeSetId::next();
        let mut table = ForwardingTable::new(set_id, 4);

        let mut db_nodes: SlotTable<flowgraph_core::handle::NodeKind, ()> =
            SlotTable::new(set_id, 4);
        let outer = db_nodes.insert(());
        let inner = db_nodes.insert(());

        let head = table.push(
            None,
            outer,
            PortAddr::scalar(PortId(0)),
            inner,
            PortAddr::scalar(PortId(1)),
            PortDirection::Input,
        );

        let (node, port) = table.resolve(
            Some(head),
            outer,
            PortAddr::scalar(PortId(0)),
            PortDirection::Input,
        );
        assert_eq!(node, inner);
        assert_eq!(port, PortAddr::scalar(PortId(1)));
    }

    #[test]
    fn resolve_passes_through_unmatched_port() {
        let set_id = NodeSetId::next();
        let table = ForwardingTable::new(set_id, 4);
        let mut db_nodes: SlotTable<flowgraph_core::handle::NodeKind, ()> =
            SlotTable::new(set_id, 4);
        let outer = db_nodes.insert(());

        let (node, port) = table.resolve(
            None,
            outer,
            PortAddr::scalar(PortId(3)),
            PortDirection::Input,
        );
        assert_eq!(node, outer);
        assert_eq!(port, PortAddr::scalar(PortId(3)));
    }
}
