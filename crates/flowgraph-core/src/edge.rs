use std::fmt;

use crate::port::PortAddr;

/// Dispatch semantics of a connection between two ports. Distinct from
/// [`PortCategory`](crate::port::PortCategory): a port's category says what
/// the port stores, this says how a live connection between two such ports
/// is driven each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeCategory {
    /// A one-shot delivery dispatched synchronously at tick start.
    Message,
    /// Domain-specific dispatch, meaning defined by the node definitions on
    /// both ends.
    DomainSpecific,
    /// A steady-state data connection, repatched whenever the producer's
    /// buffer moves.
    DataFlow,
    /// A data connection that closes a cycle; excluded from the normal
    /// topological ordering and scheduled specially by the traversal
    /// cache's cycle handling.
    Feedback,
}

impl EdgeCategory {
    pub const fn is_data(self) -> bool {
        matches!(self, Self::DataFlow | Self::Feedback)
    }
}

/// An edge's endpoints, prior to being interned in the topology database.
/// `source` is always an output port, `target` always an input port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeEndpoints {
    pub source_port: PortAddr,
    pub target_port: PortAddr,
}

impl fmt::Display for EdgeEndpoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} -> {:?}", self.source_port, self.target_port)
    }
}
