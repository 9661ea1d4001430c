//! A small reference node library: a handful of node definitions exercising
//! every port category the engine supports, kept simple enough to double
//! as fixtures for integration tests elsewhere in the workspace.

mod add_one;
mod message_echo;
mod scale;
mod sum;

pub use add_one::AddOneNode;
pub use message_echo::{EchoedMessage, MessageEchoNode};
pub use scale::ScaleNode;
pub use sum::SumNode;
