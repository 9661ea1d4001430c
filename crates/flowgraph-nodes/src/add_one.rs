use std::error::Error;
use std::sync::OnceLock;

use flowgraph_core::{
    ElementType, ExecuteContext, Kernel, NodeCapabilities, NodeDefinition, PortCategory,
    PortDesc, PortDirection, PortId, PortsView,
};

const INPUT: PortId = PortId(0);
const OUTPUT: PortId = PortId(1);

fn ports() -> &'static [PortDesc; 2] {
    static PORTS: OnceLock<[PortDesc; 2]> = OnceLock::new();
    PORTS.get_or_init(|| {
        [
            PortDesc {
                id: INPUT,
                category: PortCategory::Data,
                direction: PortDirection::Input,
                element_type: ElementType::of::<f32>(),
                array: None,
                buffer: None,
            },
            PortDesc {
                id: OUTPUT,
                category: PortCategory::Data,
                direction: PortDirection::Output,
                element_type: ElementType::of::<f32>(),
                array: None,
                buffer: None,
            },
        ]
    })
}

/// The simplest possible kernel-bearing node: one scalar `f32` input, one
/// scalar `f32` output, output equals input plus one. Useful as a minimal
/// fixture for exercising connect/disconnect and tick scheduling without
/// any node-local state to account for.
pub struct AddOneNode;

impl NodeDefinition for AddOneNode {
    fn debug_name(&self) -> &'static str {
        "add_one"
    }

    fn capabilities(&self) -> NodeCapabilities {
        NodeCapabilities::KERNEL | NodeCapabilities::DATA_IN | NodeCapabilities::DATA_OUT
    }

    fn ports(&self) -> &[PortDesc] {
        ports()
    }

    fn activate(&mut self) -> Result<Box<dyn Kernel>, Box<dyn Error>> {
        Ok(Box::new(AddOneKernel))
    }
}

struct AddOneKernel;

impl Kernel for AddOneKernel {
    fn execute(&mut self, ports: &mut PortsView<'_>, _ctx: &ExecuteContext<'_>) {
        let input = ports.input::<f32>(INPUT).copied().unwrap_or(0.0);
        if let Some(out) = ports.output_mut::<f32>(OUTPUT) {
            *out = input + 1.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_adds_one_to_its_input() {
        let input = 41.0f32;
        let mut output = 0.0f32;
        let ports = [flowgraph_core::PortAddr::scalar(INPUT)];
        let outputs = [flowgraph_core::PortAddr::scalar(OUTPUT)];

        struct Access<'a> {
            input: &'a f32,
            output: &'a mut f32,
        }
        impl<'a> flowgraph_core::PortAccess for Access<'a> {
            fn input_ref(
                &self,
                port: flowgraph_core::PortAddr,
            ) -> Option<&dyn flowgraph_core::DataValue> {
                if port.port == INPUT {
                    Some(self.input)
                } else {
                    None
                }
            }
            fn output_mut(
                &mut self,
                port: flowgraph_core::PortAddr,
            ) -> Option<&mut dyn flowgraph_core::DataValue> {
                if port.port == OUTPUT {
                    Some(self.output)
                } else {
                    None
                }
            }
        }

        let mut access = Access {
            input: &input,
            output: &mut output,
        };
        let mut view = PortsView::new(&ports, &outputs, &mut access);
        let mut user = ();
        let ctx = ExecuteContext {
            tick: 0,
            render_generation: 0,
            user: &mut user,
        };
        let mut kernel = AddOneKernel;
        kernel.execute(&mut view, &ctx);
        assert_eq!(output, 42.0);
    }
}
