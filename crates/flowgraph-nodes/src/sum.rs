use std::error::Error;
use std::sync::OnceLock;

use flowgraph_core::{
    ArrayIndex, ElementType, ExecuteContext, Kernel, NodeCapabilities, NodeDefinition, PortAddr,
    PortCategory, PortDesc, PortDirection, PortId, PortsView, MAX_PORT_ARRAY_SIZE,
};

const INPUTS: PortId = PortId(0);
const OUTPUT: PortId = PortId(1);

/// Default subport count for a freshly created `SumNode`'s array input,
/// before any `resize_port_array` call. Two inputs is the smallest size
/// for which "sum" is distinct from "passthrough".
const DEFAULT_ARRAY_SIZE: u32 = 2;

fn ports() -> &'static [PortDesc; 2] {
    static PORTS: OnceLock<[PortDesc; 2]> = OnceLock::new();
    PORTS.get_or_init(|| {
        [
            PortDesc {
                id: INPUTS,
                category: PortCategory::Data,
                direction: PortDirection::Input,
                element_type: ElementType::of::<f32>(),
                array: Some(DEFAULT_ARRAY_SIZE),
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

/// Sums every connected subport of its array input onto one scalar output.
/// Unconnected subports read as `0.0` (the element type's blank), so a
/// partially wired sum is just a sum over fewer addends, not an error. Call
/// `resize_port_array` on the owning graph to change the addend count, up
/// to [`MAX_PORT_ARRAY_SIZE`].
pub struct SumNode;

impl NodeDefinition for SumNode {
    fn debug_name(&self) -> &'static str {
        "sum"
    }

    fn capabilities(&self) -> NodeCapabilities {
        NodeCapabilities::KERNEL | NodeCapabilities::DATA_IN | NodeCapabilities::DATA_OUT
    }

    fn ports(&self) -> &[PortDesc] {
        ports()
    }

    fn activate(&mut self) -> Result<Box<dyn Kernel>, Box<dyn Error>> {
        Ok(Box::new(SumKernel))
    }
}

struct SumKernel;

impl Kernel for SumKernel {
    fn execute(&mut self, ports: &mut PortsView<'_>, _ctx: &ExecuteContext<'_>) {
        let mut total = 0.0f32;
        for index in 0..MAX_PORT_ARRAY_SIZE {
            let addr = PortAddr::array(INPUTS, ArrayIndex(index));
            if !ports.inputs.contains(&addr) {
                break;
            }
            total += ports.input::<f32>(addr).copied().unwrap_or(0.0);
        }
        if let Some(out) = ports.output_mut::<f32>(OUTPUT) {
            *out = total;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgraph_core::{DataValue, PortAccess};

    struct Access {
        values: Vec<(PortAddr, f32)>,
        output: f32,
    }
    impl PortAccess for Access {
        fn input_ref(&self, port: PortAddr) -> Option<&dyn DataValue> {
            self.values
                .iter()
                .find(|(addr, _)| *addr == port)
                .map(|(_, v)| v as &dyn DataValue)
        }
        fn output_mut(&mut self, port: PortAddr) -> Option<&mut dyn DataValue> {
            if port.port == OUTPUT {
                Some(&mut self.output)
            } else {
                None
            }
        }
    }

    #[test]
    fn sums_connected_subports_and_treats_missing_ones_as_zero() {
        let inputs = [
            PortAddr::array(INPUTS, ArrayIndex(0)),
            PortAddr::array(INPUTS, ArrayIndex(1)),
        ];
        let outputs = [PortAddr::scalar(OUTPUT)];
        let mut access = Access {
            values: vec![(inputs[0], 1.5), (inputs[1], 2.5)],
            output: 0.0,
        };
        let mut view = PortsView::new(&inputs, &outputs, &mut access);
        let mut user = ();
        let ctx = ExecuteContext {
            tick: 0,
            render_generation: 0,
            user: &mut user,
        };
        let mut kernel = SumKernel;
        kernel.execute(&mut view, &ctx);
        assert_eq!(access.output, 4.0);
    }
}
