use std::error::Error;
use std::sync::atomic::Ordering;
use std::sync::{Arc, OnceLock};

use atomic_float::AtomicF32;

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

/// Multiplies its scalar input by a factor the host can change at any time
/// from the thread that owns the `NodeSet`; the kernel picks up the new
/// factor on its next tick via a shared atomic rather than a message, since
/// the factor is a continuously adjustable parameter rather than a discrete
/// event.
pub struct ScaleNode {
    factor: Arc<AtomicF32>,
}

impl ScaleNode {
    pub fn new(factor: f32) -> Self {
        Self {
            factor: Arc::new(AtomicF32::new(factor)),
        }
    }

    pub fn factor(&self) -> f32 {
        self.factor.load(Ordering::Relaxed)
    }

    pub fn set_factor(&mut self, factor: f32) {
        self.factor.store(factor, Ordering::Relaxed);
    }
}

impl NodeDefinition for ScaleNode {
    fn debug_name(&self) -> &'static str {
        "scale"
    }

    fn capabilities(&self) -> NodeCapabilities {
        NodeCapabilities::KERNEL | NodeCapabilities::DATA_IN | NodeCapabilities::DATA_OUT
    }

    fn ports(&self) -> &[PortDesc] {
        ports()
    }

    fn activate(&mut self) -> Result<Box<dyn Kernel>, Box<dyn Error>> {
        Ok(Box::new(ScaleKernel {
            factor: Arc::clone(&self.factor),
        }))
    }
}

struct ScaleKernel {
    factor: Arc<AtomicF32>,
}

impl Kernel for ScaleKernel {
    fn execute(&mut self, ports: &mut PortsView<'_>, _ctx: &ExecuteContext<'_>) {
        let input = ports.input::<f32>(INPUT).copied().unwrap_or(0.0);
        let factor = self.factor.load(Ordering::Relaxed);
        if let Some(out) = ports.output_mut::<f32>(OUTPUT) {
            *out = input * factor;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgraph_core::{DataValue, PortAccess, PortAddr};

    struct Access<'a> {
        input: &'a f32,
        output: &'a mut f32,
    }
    impl<'a> PortAccess for Access<'a> {
        fn input_ref(&self, port: PortAddr) -> Option<&dyn DataValue> {
            if port.port == INPUT {
                Some(self.input)
            } else {
                None
            }
        }
        fn output_mut(&mut self, port: PortAddr) -> Option<&mut dyn DataValue> {
            if port.port == OUTPUT {
                Some(self.output)
            } else {
                None
            }
        }
    }

    #[test]
    fn set_factor_takes_effect_on_the_next_tick() {
        let mut node = ScaleNode::new(2.0);
        let mut kernel = node.activate().unwrap();

        let input = 3.0f32;
        let mut output = 0.0f32;
        let ports = [PortAddr::scalar(INPUT)];
        let outputs = [PortAddr::scalar(OUTPUT)];
        let mut access = Access {
            input: &input,
            output: &mut output,
        };
        let mut user = ();
        let ctx = ExecuteContext {
            tick: 0,
            render_generation: 0,
            user: &mut user,
        };

        {
            let mut view = PortsView::new(&ports, &outputs, &mut access);
            kernel.execute(&mut view, &ctx);
        }
        assert_eq!(output, 6.0);

        node.set_factor(5.0);
        let mut access = Access {
            input: &input,
            output: &mut output,
        };
        let mut view = PortsView::new(&ports, &outputs, &mut access);
        kernel.execute(&mut view, &ctx);
        assert_eq!(output, 15.0);
    }
}
