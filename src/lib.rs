pub use flowgraph_core::*;
pub use flowgraph_graph::*;

#[cfg(feature = "jobs")]
pub use flowgraph_jobs::*;

#[cfg(feature = "nodes")]
pub use flowgraph_nodes as nodes;
