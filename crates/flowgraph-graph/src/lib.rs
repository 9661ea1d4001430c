pub mod diff;
pub mod forwarding;
pub mod node_set;
pub mod port_array;
pub mod render;
pub mod scheduler;
pub mod topology;
pub mod traversal;
pub mod value;

pub use diff::{EntityMoveSource, GraphDiff, RepatchRequest};
pub use forwarding::{ForwardEntry, ForwardingTable};
pub use node_set::{NodeSet, NodeSetConfig};
pub use port_array::{PortArraySizeEntry, PortArraySizeTable};
pub use render::{acquire_builtin, release_builtin, BufferPool, KernelEntry, PortSource, RenderGraph};
pub use scheduler::{ExecutionStrategy, Scheduler};
pub use topology::{Edge, NodeEntry, TopologyDatabase};
pub use traversal::{
    EdgeCategoryMask, GroupError, GroupState, SortStrategy, TraversalCache, TraversalGroup,
    SCHEDULING_MASK,
};
pub use value::{copy_builtin, GraphValueSubscription, GraphValueTable};
