use flowgraph_core::{Fence, KernelExecutionRuntime};

/// Runs every job on the calling thread the instant it is scheduled.
///
/// A valid [`KernelExecutionRuntime`]: since nothing ever runs
/// concurrently, every dependency fence named in a later `schedule` call
/// is necessarily already satisfied by the time that call happens. Used
/// by the `Synchronous`/`SingleThreaded` execution strategies, and for
/// tests that want deterministic single-threaded kernel execution.
pub struct SynchronousRuntime {
    next_fence: u64,
}

impl SynchronousRuntime {
    pub fn new() -> Self {
        Self { next_fence: 0 }
    }
}

impl Default for SynchronousRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelExecutionRuntime for SynchronousRuntime {
    fn schedule(&mut self, work: Box<dyn FnOnce() + Send + 'static>, _deps: &[Fence]) -> Fence {
        work();
        self.next_fence += 1;
        Fence(self.next_fence)
    }

    fn complete(&mut self, _fence: Fence) {}
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn jobs_run_in_schedule_order() {
        let mut runtime = SynchronousRuntime::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5u32 {
            let order = order.clone();
            runtime.schedule(Box::new(move || order.lock().unwrap().push(i)), &[]);
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }
}
