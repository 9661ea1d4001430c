use std::any::Any;
use std::error::Error;
use std::sync::{Arc, Mutex, OnceLock};

use flowgraph_core::{
    ElementType, Kernel, NodeCapabilities, NodeDefinition, PortAddr, PortCategory, PortDesc,
    PortDirection, PortId,
};

const MESSAGE_IN: PortId = PortId(0);

fn ports() -> &'static [PortDesc; 1] {
    static PORTS: OnceLock<[PortDesc; 1]> = OnceLock::new();
    PORTS.get_or_init(|| {
        [PortDesc {
            id: MESSAGE_IN,
            category: PortCategory::Message,
            direction: PortDirection::Input,
            element_type: ElementType::of::<EchoedMessage>(),
            array: None,
            buffer: None,
        }]
    })
}

/// The payload a `MessageEchoNode` logs and records. Any `Send + 'static`
/// message type works, but tests and demos use this one so assertions do
/// not have to downcast an arbitrary `&dyn Any`.
#[derive(Debug, Clone, PartialEq)]
pub struct EchoedMessage(pub String);

/// Accepts messages on one input port and appends each one, in arrival
/// order, to a shared log the host can inspect at any time. Declares no
/// kernel: dispatch happens entirely through `on_message`, synchronously
/// at the start of the tick that delivers it, never on the render graph.
pub struct MessageEchoNode {
    log: Arc<Mutex<Vec<String>>>,
}

impl MessageEchoNode {
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A handle to the node's log, clonable so the host can keep a copy
    /// after handing the node itself off to `NodeSet::create_node`.
    pub fn log_handle(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.log)
    }
}

impl Default for MessageEchoNode {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeDefinition for MessageEchoNode {
    fn debug_name(&self) -> &'static str {
        "message_echo"
    }

    fn capabilities(&self) -> NodeCapabilities {
        NodeCapabilities::MESSAGES_IN
    }

    fn ports(&self) -> &[PortDesc] {
        ports()
    }

    fn activate(&mut self) -> Result<Box<dyn Kernel>, Box<dyn Error>> {
        Err("message_echo declares no kernel".into())
    }

    fn on_message(&mut self, port: PortAddr, message: &dyn Any) {
        if port.port != MESSAGE_IN {
            return;
        }
        if let Some(echoed) = message.downcast_ref::<EchoedMessage>() {
            log::trace!("message_echo received {:?}", echoed);
            self.log.lock().expect("log mutex poisoned").push(echoed.0.clone());
        }
    }
}
