use std::time::Duration;

use flowgraph_core::{DataValue, ElementType, PortAddr, PortId};
use flowgraph_graph::{ExecutionStrategy, NodeSet, NodeSetConfig};
use flowgraph_jobs::SynchronousRuntime;
use flowgraph_nodes::{AddOneNode, ScaleNode};

const TICK_COUNT: u32 = 5;
const TICK_INTERVAL: Duration = Duration::from_millis(50);

fn main() {
    env_logger::init();

    println!("chain_tick: two add_one nodes feeding a scale(2.0) node");

    let mut set = NodeSet::with_config(NodeSetConfig {
        execution_strategy: ExecutionStrategy::Synchronous,
        ..NodeSetConfig::default()
    });

    let a = set.create_node(Box::new(AddOneNode));
    let b = set.create_node(Box::new(AddOneNode));
    let mut scale_node = ScaleNode::new(2.0);
    let scale_handle = scale_node.factor();
    log::info!("initial scale factor: {}", scale_handle);
    let c = set.create_node(Box::new(scale_node));

    set.connect(
        a,
        PortAddr::scalar(PortId(1)),
        b,
        PortAddr::scalar(PortId(0)),
        flowgraph_core::EdgeCategory::DataFlow,
    )
    .expect("a -> b connect");
    set.connect(
        b,
        PortAddr::scalar(PortId(1)),
        c,
        PortAddr::scalar(PortId(0)),
        flowgraph_core::EdgeCategory::DataFlow,
    )
    .expect("b -> c connect");

    let output = set
        .create_graph_value(c, PortId(1), ElementType::of::<f32>(), Box::new(0.0f32))
        .expect("subscribe to c's output");

    let mut runtime = SynchronousRuntime::new();
    let mut user = ();
    for tick in 0..TICK_COUNT {
        set.update(&mut runtime, &mut user).expect("tick");
        let (value, exists) = set.read_graph_value(output).expect("read output");
        log::info!(
            "tick {}: c's output = {:?} (target alive: {})",
            tick,
            value.downcast_ref::<f32>(),
            exists
        );
        std::thread::sleep(TICK_INTERVAL);
    }

    println!("finished");
}
