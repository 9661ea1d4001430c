use std::collections::HashSet;
use std::sync::{Condvar, Mutex};

use flowgraph_core::Fence;

/// Tracks which fences have completed, with a condvar to wake threads
/// blocked waiting on one. Shared by every worker and by
/// `ThreadedRuntime::complete`.
#[derive(Default)]
pub(crate) struct FenceRegistry {
    done: Mutex<HashSet<u64>>,
    cv: Condvar,
}

impl FenceRegistry {
    pub(crate) fn wait_for(&self, fence: Fence) {
        let mut guard = self.done.lock().unwrap();
        while !guard.contains(&fence.0) {
            guard = self.cv.wait(guard).unwrap();
        }
    }

    pub(crate) fn mark_done(&self, fence: Fence) {
        let mut guard = self.done.lock().unwrap();
        guard.insert(fence.0);
        self.cv.notify_all();
    }
}
