pub mod blank;
pub mod edge;
pub mod error;
pub mod handle;
pub mod node_def;
pub mod port;
pub mod runtime;
pub mod safety;
pub mod value;

pub use edge::{EdgeCategory, EdgeEndpoints};
pub use error::EngineError;
pub use handle::{
    EdgeId, ForwardId, GraphValueId, Handle, HandleKind, NodeId, NodeSetId, PortArraySizeId,
    SlotTable, Validated,
};
pub use node_def::{ExecuteContext, Kernel, NodeDefinition, PortAccess, PortsView};
pub use runtime::{Fence, KernelExecutionRuntime};
pub use port::{
    ArrayIndex, BufferDescriptor, ElementType, NodeCapabilities, PortAddr, PortCategory,
    PortDesc, PortDirection, PortId, MAX_PORTS_PER_NODE, MAX_PORT_ARRAY_SIZE,
};
pub use safety::{AccessMode, AtomicSafetyManager, GraphValueBinding, SafetyHandle};
pub use value::{Blank, DataValue};

/// The default initial capacity reserved in a new `NodeSet`'s slot tables.
/// Chosen to avoid a reallocation for small graphs without committing much
/// memory up front; a tuned default, not a hard limit.
pub const DEFAULT_NODE_SET_CAPACITY: usize = 64;
