use flowgraph_core::{EngineError, NodeId, NodeSetId, PortArraySizeId, PortId, SlotTable};

/// One node's current size for one port-array port, threaded into a
/// singly-linked list off that node's `port_array_sizes_head`, the same
/// shape `ForwardingTable` uses for forwarding entries.
#[derive(Debug, Clone, Copy)]
pub struct PortArraySizeEntry {
    pub node: NodeId,
    pub port: PortId,
    pub size: u32,
    next: Option<PortArraySizeId>,
}

/// Tracks, for every port-array port that has ever been resized away from
/// its node definition's static initial size, the current size (the
/// size governs which array indices are valid). A port that has never
/// been resized is not present here; callers fall back to the node
/// definition's static `PortDesc::array` value.
pub struct PortArraySizeTable {
    entries: SlotTable<flowgraph_core::handle::PortArraySizeKind, PortArraySizeEntry>,
}

impl PortArraySizeTable {
    pub fn new(set_id: NodeSetId, capacity: usize) -> Self {
        Self {
            entries: SlotTable::new(set_id, capacity),
        }
    }

    /// The current size of `port`, walking the list headed at `head`;
    /// `initial` is the node definition's static size, returned unchanged
    /// if no resize entry for this port exists yet.
    pub fn current_size(&self, mut head: Option<PortArraySizeId>, port: PortId, initial: u32) -> u32 {
        while let Some(id) = head {
            let Ok(entry) = self.entries.get(id) else {
                break;
            };
            if entry.port == port {
                return entry.size;
            }
            head = entry.next;
        }
        initial
    }

    /// Record a new size for `port` on `node`'s list headed at `head`,
    /// updating an existing entry in place or pushing a new one onto the
    /// head. Returns the (possibly unchanged) new head.
    pub fn set_size(
        &mut self,
        head: Option<PortArraySizeId>,
        node: NodeId,
        port: PortId,
        size: u32,
    ) -> Result<Option<PortArraySizeId>, EngineError> {
        let mut cursor = head;
        while let Some(id) = cursor {
            let next = {
                let entry = self.entries.get_mut(id)?;
                if entry.port == port {
                    entry.size = size;
                    return Ok(head);
                }
                entry.next
            };
            cursor = next;
        }

        let new_id = self.entries.insert(PortArraySizeEntry {
            node,
            port,
            size,
            next: head,
        });
        Ok(Some(new_id))
    }

    pub fn remove_list(&mut self, mut head: Option<PortArraySizeId>) {
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
    use flowgraph_core::handle::NodeKind;

    #[test]
    fn unresized_port_falls_back_to_initial() {
        let set_id = NodeSetId::next();
        let table = PortArraySizeTable::new(set_id, 4);
        let mut nodes: SlotTable<NodeKind, ()> = SlotTable::new(set_id, 4);
        let node = nodes.insert(());

        assert_eq!(table.current_size(None, PortId(0), 5), 5);
        let _ = node;
    }

    #[test]
    fn resize_then_reresize_updates_in_place() {
        let set_id = NodeSetId::next();
        let mut table = PortArraySizeTable::new(set_id, 4);
        let mut nodes: SlotTable<NodeKind, ()> = SlotTable::new(set_id, 4);
        let node = nodes.insert(());

        let head = table.set_size(None, node, PortId(0), 3).unwrap();
        assert_eq!(table.current_size(head, PortId(0), 5), 3);

        let head = table.set_size(head, node, PortId(0), 2).unwrap();
        assert_eq!(table.current_size(head, PortId(0), 5), 2);
    }

    #[test]
    fn distinct_ports_on_same_node_coexist() {
        let set_id = NodeSetId::next();
        let mut table = PortArraySizeTable::new(set_id, 4);
        let mut nodes: SlotTable<NodeKind, ()> = SlotTable::new(set_id, 4);
        let node = nodes.insert(());

        let head = table.set_size(None, node, PortId(0), 3).unwrap();
        let head = table.set_size(head, node, PortId(1), 7).unwrap();

        assert_eq!(table.current_size(head, PortId(0), 5), 3);
        assert_eq!(table.current_size(head, PortId(1), 5), 7);
    }
}
