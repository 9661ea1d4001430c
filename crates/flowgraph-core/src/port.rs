use std::any::{Any, TypeId};
use std::fmt;

/// Storage-shape category of a port. Distinct from [`EdgeCategory`](crate::edge::EdgeCategory):
/// this tag describes *what a port holds*, the edge category describes
/// *how a connection between two ports is dispatched*.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortCategory {
    /// A discrete, delivered-once value, dispatched to `on_message`.
    Message,
    /// A domain-specific signalling channel (DSL in the glossary); dispatch
    /// semantics are defined by the node definition, not the engine.
    DomainSpecific,
    /// A single typed value, patched from producer to consumer each tick.
    Data,
    /// A contiguous typed buffer (more than one element of the same type).
    DataBuffer,
    /// An aggregate of sub-buffers described by [`BufferDescriptor`]s.
    DataArray,
}

impl PortCategory {
    /// Message and domain-specific ports are dispatched synchronously at
    /// tick start rather than through the render graph's buffer pool.
    pub const fn is_message_like(self) -> bool {
        matches!(self, Self::Message | Self::DomainSpecific)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortDirection {
    Input,
    Output,
}

/// A small integer identifying a port within its node definition's static
/// port table.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(pub u32);

impl fmt::Debug for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port[{}]", self.0)
    }
}

impl From<u32> for PortId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}
impl From<usize> for PortId {
    fn from(value: usize) -> Self {
        Self(value as u32)
    }
}

/// An index into a port array. Validity is governed by the port array's
/// current size: indices must be `< size` to be live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArrayIndex(pub u32);

impl From<u32> for ArrayIndex {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// The full address of a port endpoint: a port, and (if the port is an
/// array) which sub-index is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortAddr {
    pub port: PortId,
    pub array_index: Option<ArrayIndex>,
}

impl PortAddr {
    pub const fn scalar(port: PortId) -> Self {
        Self {
            port,
            array_index: None,
        }
    }

    pub const fn array(port: PortId, index: ArrayIndex) -> Self {
        Self {
            port,
            array_index: Some(index),
        }
    }
}

impl From<PortId> for PortAddr {
    fn from(port: PortId) -> Self {
        Self::scalar(port)
    }
}

/// A `(offset, element_size)` pair describing one sub-buffer within an
/// aggregate [`PortCategory::DataArray`] port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDescriptor {
    pub offset: usize,
    pub element_size: usize,
}

/// A type tag for the payload carried by a [`PortCategory::Data`] (or
/// buffer/array) port, compared by [`TypeId`] so that two ports can only be
/// connected when their element types are identical (no implicit
/// conversion).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementType {
    type_id: TypeId,
    name: &'static str,
}

impl ElementType {
    pub fn of<T: Any>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// The static description of one port on a node definition. Node
/// definitions expose a slice of these; runtime port IDs index into that
/// slice.
#[derive(Debug, Clone, Copy)]
pub struct PortDesc {
    pub id: PortId,
    pub category: PortCategory,
    pub direction: PortDirection,
    pub element_type: ElementType,
    /// `Some(initial_size)` if this port is a port array.
    pub array: Option<u32>,
    /// Set for ports of category [`PortCategory::DataArray`]: the layout of
    /// each sub-buffer making up the aggregate.
    pub buffer: Option<BufferDescriptor>,
}

impl PortDesc {
    pub const fn is_array(&self) -> bool {
        self.array.is_some()
    }
}

bitflags::bitflags! {
    /// Capability flags in place of an inheritance/mixin hierarchy of
    /// node-definition traits: one bitmask plus trait methods with default
    /// no-op bodies, gated on the matching flag.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct NodeCapabilities: u32 {
        const SIMULATION      = 0b0000_0001;
        const KERNEL          = 0b0000_0010;
        const MESSAGES_IN     = 0b0000_0100;
        const MESSAGES_OUT    = 0b0000_1000;
        const DOMAIN_SPECIFIC = 0b0001_0000;
        const DATA_IN         = 0b0010_0000;
        const DATA_OUT        = 0b0100_0000;
        const PORT_ARRAYS     = 0b1000_0000;
    }
}

/// Maximum number of sub-ports a single port array may hold. Resizing
/// beyond this is rejected with
/// [`crate::error::EngineError::OutOfRange`] at the call site rather than
/// being fatal for the whole set.
pub const MAX_PORT_ARRAY_SIZE: u32 = 4096;

/// Maximum number of ports (input or output, scalar or array-wide) a single
/// node definition may declare.
pub const MAX_PORTS_PER_NODE: usize = 64;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_type_compares_by_identity_not_name() {
        let a = ElementType::of::<f32>();
        let b = ElementType::of::<f32>();
        let c = ElementType::of::<i32>();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
