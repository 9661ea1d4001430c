use std::any::Any;
use std::error::Error;

use downcast_rs::{impl_downcast, Downcast};

use crate::port::{NodeCapabilities, PortDesc};
use crate::value::DataValue;

/// The main-thread half of a node: configuration data plus the factory that
/// produces the kernel that actually runs on the render graph.
///
/// A `NodeDefinition` is free to hold non-`Send` state (UI bindings, file
/// handles) because only [`activate`](Self::activate)'s return value ever
/// crosses into the render graph.
pub trait NodeDefinition: 'static + Downcast {
    fn debug_name(&self) -> &'static str;

    fn capabilities(&self) -> NodeCapabilities;

    /// The node's static port table. Index into this slice with a
    /// [`PortId`](crate::port::PortId) to recover a port's description.
    fn ports(&self) -> &[PortDesc];

    /// Produce the pure kernel that will run on the render graph. Called
    /// once per node, the first time the render graph is rebuilt after the
    /// node is created.
    fn activate(&mut self) -> Result<Box<dyn Kernel>, Box<dyn Error>>;

    /// Called when the kernel counterpart has been removed from the render
    /// graph and dropped. `kernel` is `Some` if the render graph shut it
    /// down gracefully rather than being dropped mid-panic.
    #[allow(unused_variables)]
    fn deactivate(&mut self, kernel: Option<Box<dyn Kernel>>) {}

    /// Called once per tick on the thread that owns the `NodeSet`, before
    /// the render graph executes, to let simulation-capable nodes update
    /// their kernel's parameters. Only invoked if
    /// [`NodeCapabilities::SIMULATION`] is set.
    #[allow(unused_variables)]
    fn update(&mut self) {}

    /// Dispatch a message delivered to one of this node's message input
    /// ports. Invoked synchronously at tick start, never from the render
    /// graph. Only called if [`NodeCapabilities::MESSAGES_IN`] is set.
    /// `port` carries the array index when the message targeted a port
    /// array subport rather than a scalar one.
    #[allow(unused_variables)]
    fn on_message(&mut self, port: crate::port::PortAddr, message: &dyn Any) {}
}
impl_downcast!(NodeDefinition);

/// The render-graph half of a node: the pure, `Send` kernel that the
/// scheduler invokes once per port-patched tick.
///
/// Generalizes a fixed `&[&[f32]]`-slice style `process` call to a
/// [`PortsView`] addressing arbitrary typed ports (scalar, buffer, or
/// array).
pub trait Kernel: 'static + Send + Downcast {
    fn execute(&mut self, ports: &mut PortsView<'_>, ctx: &ExecuteContext<'_>);
}
impl_downcast!(Kernel);

/// Per-tick context handed to a kernel alongside its ports.
pub struct ExecuteContext<'a> {
    pub tick: u64,
    pub render_generation: u64,
    /// A global user-defined context, threaded through unchanged each tick.
    pub user: &'a mut dyn Any,
}

/// The storage-level operations a render graph's buffer pool must expose
/// to a kernel. `flowgraph-graph`'s render graph implements this against
/// its `BufferPool`; `flowgraph-core` only needs the seam.
///
/// Addressed by [`PortAddr`](crate::port::PortAddr) rather than a bare
/// port ID so that one scalar port and every subport of a port array
/// share the same lookup path.
pub trait PortAccess {
    fn input_ref(&self, port: crate::port::PortAddr) -> Option<&dyn DataValue>;
    fn output_mut(&mut self, port: crate::port::PortAddr) -> Option<&mut dyn DataValue>;
}

/// A kernel's view of its patched input and output ports for the current
/// tick. Instead of fixed `inputs`/`outputs` slices, a kernel asks for a
/// specific port (optionally a specific array subport) by address and
/// downcasts to its known element type.
pub struct PortsView<'a> {
    pub inputs: &'a [crate::port::PortAddr],
    pub outputs: &'a [crate::port::PortAddr],
    access: &'a mut dyn PortAccess,
}

impl<'a> PortsView<'a> {
    pub fn new(
        inputs: &'a [crate::port::PortAddr],
        outputs: &'a [crate::port::PortAddr],
        access: &'a mut dyn PortAccess,
    ) -> Self {
        Self {
            inputs,
            outputs,
            access,
        }
    }

    pub fn input<T: DataValue>(&self, port: impl Into<crate::port::PortAddr>) -> Option<&T> {
        self.access.input_ref(port.into()).and_then(|v| v.downcast_ref())
    }

    pub fn output_mut<T: DataValue>(&mut self, port: impl Into<crate::port::PortAddr>) -> Option<&mut T> {
        self.access.output_mut(port.into()).and_then(|v| v.downcast_mut())
    }
}
