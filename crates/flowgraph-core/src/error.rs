use std::error::Error;
use std::fmt;

use crate::port::PortId;

/// The engine's user-surfaced error/status enumeration: validation,
/// definition, structural, and concurrency errors all surface through
/// this type; fatal errors are logged rather than returned, since by
/// definition the set is no longer in a state that can be meaningfully
/// recovered from by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The handle is stale (destroyed) or was never issued by this table.
    InvalidHandle,
    /// The handle was minted by a different `NodeSet`.
    InvalidForSet,
    /// A downcast to a concrete node/kernel/value type failed.
    InvalidCast,
    /// Two ports were connected despite having different element types.
    TypeMismatch { expected: &'static str, found: &'static str },
    /// A port, port-array index, or buffer size fell outside its valid range.
    OutOfRange,
    /// A data-flow/feedback cycle was detected in a traversal group.
    Cycles,
    /// A job touched a buffer it did not declare as a dependency.
    MissingDependency,
    /// The object has already been disposed/released.
    AlreadyDisposed,
    /// A node definition failed validation at registration time.
    InvalidNodeDefinition(&'static str),
    /// An operation is not permitted given the object's current state
    /// (e.g. `set_data` on a port that is receiving an edge).
    InvalidOperation(&'static str),
    /// A port was not found, or was of the wrong category/direction for the
    /// requested operation.
    InvalidPort(PortId),
}

impl Error for EngineError {}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidHandle => write!(f, "handle is invalid or has been destroyed"),
            Self::InvalidForSet => write!(f, "handle does not belong to this node set"),
            Self::InvalidCast => write!(f, "downcast to the requested type failed"),
            Self::TypeMismatch { expected, found } => {
                write!(f, "port element type mismatch: expected {expected}, found {found}")
            }
            Self::OutOfRange => write!(f, "value is out of the allowed range"),
            Self::Cycles => write!(f, "a cycle was detected in the traversal group"),
            Self::MissingDependency => {
                write!(f, "job scheduled without declaring a buffer dependency it touches")
            }
            Self::AlreadyDisposed => write!(f, "object has already been disposed"),
            Self::InvalidNodeDefinition(reason) => {
                write!(f, "invalid node definition: {reason}")
            }
            Self::InvalidOperation(reason) => write!(f, "invalid operation: {reason}"),
            Self::InvalidPort(port) => write!(f, "invalid port: {port:?}"),
        }
    }
}
