use flowgraph_core::{
    DataValue, ElementType, EngineError, GraphValueId, NodeId, NodeSetId, PortDirection, PortId,
    SlotTable,
};

use crate::render::RenderGraph;
use crate::topology::TopologyDatabase;

/// What a graph value subscribes to: one node's output port. The element
/// type is checked against the port's own at creation time.
#[derive(Debug, Clone, Copy)]
pub struct GraphValueSubscription {
    pub target_node: NodeId,
    pub output_port: PortId,
    pub element_type: ElementType,
}

struct GraphValueEntry {
    subscription: GraphValueSubscription,
    buffer: Box<dyn DataValue>,
    /// Cleared once the target node is destroyed; the buffer keeps its
    /// last produced value regardless.
    target_exists: bool,
}

/// Handle-addressed side buffers that mirror a subscribed output port
/// once per tick. A graph value outlives the node it subscribes to:
/// after the target is destroyed, reads keep returning the last value
/// produced, with `target_exists` cleared so callers can tell the
/// difference.
pub struct GraphValueTable {
    entries: SlotTable<flowgraph_core::handle::GraphValueKind, GraphValueEntry>,
}

impl GraphValueTable {
    pub fn new(set_id: NodeSetId, capacity: usize) -> Self {
        Self {
            entries: SlotTable::new(set_id, capacity),
        }
    }

    /// Subscribe to `output_port` on `target_node`. `blank` seeds the side
    /// buffer and should be the element type's default, since a value
    /// read before the first tick after creation must return that
    /// default.
    pub fn create<T>(
        &mut self,
        topology: &TopologyDatabase<T>,
        target_node: NodeId,
        output_port: PortId,
        element_type: ElementType,
        blank: Box<dyn DataValue>,
    ) -> Result<GraphValueId, EngineError> {
        let node = topology.node(target_node)?;
        let port = node
            .ports
            .iter()
            .find(|p| p.id == output_port)
            .ok_or(EngineError::InvalidPort(output_port))?;
        if port.direction != PortDirection::Output {
            return Err(EngineError::InvalidPort(output_port));
        }
        if port.element_type != element_type {
            return Err(EngineError::TypeMismatch {
                expected: port.element_type.name(),
                found: element_type.name(),
            });
        }

        Ok(self.entries.insert(GraphValueEntry {
            subscription: GraphValueSubscription {
                target_node,
                output_port,
                element_type,
            },
            buffer: blank,
            target_exists: true,
        }))
    }

    pub fn release(&mut self, id: GraphValueId) -> Result<(), EngineError> {
        self.entries.remove(id).map(|_| ())
    }

    pub fn subscription(&self, id: GraphValueId) -> Result<GraphValueSubscription, EngineError> {
        Ok(self.entries.get(id)?.subscription)
    }

    /// Clear `target_exists` for any subscription whose node no longer
    /// exists. Call once per tick, before `update_from_render`, so a node
    /// destroyed mid-tick is already reflected when its value is read.
    pub fn refresh_target_existence<T>(&mut self, topology: &TopologyDatabase<T>) {
        for (_, entry) in self.entries.iter_mut() {
            if entry.target_exists && !topology.contains_node(entry.subscription.target_node) {
                entry.target_exists = false;
            }
        }
    }

    /// Copy every live subscription's current output into its side
    /// buffer. Must run after the tick's scheduler pass has completed
    /// (i.e. after fencing the render graph) so the value copied is this
    /// tick's, not a partially-written one. `copy` performs the actual
    /// type-erased assignment; see `copy_builtin` for the element types
    /// the reference node library uses.
    pub fn update_from_render<CopyFn>(&mut self, render: &RenderGraph, mut copy: CopyFn)
    where
        CopyFn: FnMut(&dyn DataValue, &mut dyn DataValue),
    {
        for (_, entry) in self.entries.iter_mut() {
            if !entry.target_exists {
                continue;
            }
            let Some(kernel_entry) = render.kernel(entry.subscription.target_node) else {
                continue;
            };
            let Some(&(_, idx, _)) = kernel_entry
                .output_buffers
                .iter()
                .find(|(addr, _, _)| addr.port == entry.subscription.output_port)
            else {
                continue;
            };
            // SAFETY: called after the tick's kernels have all completed,
            // so no writer is still live for this buffer index.
            let current = unsafe { render.pool().get_dyn(idx) };
            copy(current, entry.buffer.as_mut());
        }
    }

    /// `ReadGraphValue`: a copy of the last produced value, and whether
    /// the subscription's target is still alive.
    pub fn read(&self, id: GraphValueId) -> Result<(&dyn DataValue, bool), EngineError> {
        let entry = self.entries.get(id)?;
        Ok((entry.buffer.as_ref(), entry.target_exists))
    }
}

/// Covers the reference node library's element types (f32/f64/i32/i64/
/// bool); see `render::acquire_builtin` for the matching allocation-side
/// helper. Callers with custom element types supply their own copy fn to
/// `update_from_render`.
pub fn copy_builtin(src: &dyn DataValue, dst: &mut dyn DataValue) {
    if let (Some(s), Some(d)) = (src.downcast_ref::<f32>(), dst.downcast_mut::<f32>()) {
        *d = *s;
    } else if let (Some(s), Some(d)) = (src.downcast_ref::<f64>(), dst.downcast_mut::<f64>()) {
        *d = *s;
    } else if let (Some(s), Some(d)) = (src.downcast_ref::<i32>(), dst.downcast_mut::<i32>()) {
        *d = *s;
    } else if let (Some(s), Some(d)) = (src.downcast_ref::<i64>(), dst.downcast_mut::<i64>()) {
        *d = *s;
    } else if let (Some(s), Some(d)) = (src.downcast_ref::<bool>(), dst.downcast_mut::<bool>()) {
        *d = *s;
    }
}

#[cfg(test)]
mod tests {
    use smallvec::smallvec;

    use flowgraph_core::{PortCategory, PortDesc};

    use super::*;

    fn output_port(id: u32, element_type: ElementType) -> PortDesc {
        PortDesc {
            id: PortId(id),
            category: PortCategory::Data,
            direction: PortDirection::Output,
            element_type,
            array: None,
            buffer: None,
        }
    }

    #[test]
    fn create_rejects_element_type_mismatch() {
        let set_id = NodeSetId::next();
        let mut db: TopologyDatabase<()> = TopologyDatabase::new(set_id, 4, 4);
        let node = db.insert_node(
            "producer",
            smallvec![output_port(0, ElementType::of::<f32>())],
            (),
        );

        let mut values = GraphValueTable::new(set_id, 4);
        let err = values
            .create(
                &db,
                node,
                PortId(0),
                ElementType::of::<i32>(),
                Box::new(0i32),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::TypeMismatch { .. }));
    }

    #[test]
    fn target_destruction_keeps_last_value_but_clears_existence() {
        let set_id = NodeSetId::next();
        let mut db: TopologyDatabase<()> = TopologyDatabase::new(set_id, 4, 4);
        let node = db.insert_node(
            "producer",
            smallvec![output_port(0, ElementType::of::<f32>())],
            (),
        );

        let mut values = GraphValueTable::new(set_id, 4);
        let id = values
            .create(
                &db,
                node,
                PortId(0),
                ElementType::of::<f32>(),
                Box::new(0.0f32),
            )
            .unwrap();

        let (_, exists_before) = values.read(id).unwrap();
        assert!(exists_before);

        db.remove_node(node).unwrap();
        values.refresh_target_existence(&db);

        let (value, exists_after) = values.read(id).unwrap();
        assert!(!exists_after);
        assert_eq!(*value.downcast_ref::<f32>().unwrap(), 0.0);
    }
}
