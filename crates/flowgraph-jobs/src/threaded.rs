use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use flowgraph_core::{Fence, KernelExecutionRuntime};

use crate::registry::FenceRegistry;

#[derive(Debug, thiserror::Error)]
pub enum JobsError {
    #[error("threaded runtime requires at least one worker")]
    NoWorkers,
}

struct Job {
    work: Box<dyn FnOnce() + Send + 'static>,
    deps: Vec<Fence>,
    fence: Fence,
}

/// A fixed-size pool of OS threads pulling jobs off a shared channel: any
/// idle worker takes the next queued job rather than jobs being pinned to
/// a particular thread.
///
/// Dependency fences (`deps` passed to `schedule`) are honored by having
/// each job block on its declared dependencies' completion before
/// running its payload, rather than by ordering the queue itself; a
/// worker stalled on a dependency simply does not claim further jobs
/// until it completes, since the channel is a single shared queue rather
/// than one queue per worker.
pub struct ThreadedRuntime {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    registry: Arc<FenceRegistry>,
    next_fence: u64,
}

impl ThreadedRuntime {
    pub fn new(worker_count: usize) -> Result<Self, JobsError> {
        if worker_count == 0 {
            return Err(JobsError::NoWorkers);
        }

        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let registry = Arc::new(FenceRegistry::default());

        let workers = (0..worker_count)
            .map(|_| {
                let receiver = Arc::clone(&receiver);
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || loop {
                    let received = {
                        let rx = receiver.lock().unwrap();
                        rx.recv()
                    };
                    let Ok(job) = received else {
                        break;
                    };
                    for dep in &job.deps {
                        registry.wait_for(*dep);
                    }
                    (job.work)();
                    registry.mark_done(job.fence);
                })
            })
            .collect();

        Ok(Self {
            sender: Some(sender),
            workers,
            registry,
            next_fence: 0,
        })
    }

    /// One worker per available CPU, falling back to one if the platform
    /// cannot report a count.
    pub fn with_default_parallelism() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::new(workers).expect("with_default_parallelism always requests at least one worker")
    }
}

impl Default for ThreadedRuntime {
    fn default() -> Self {
        Self::with_default_parallelism()
    }
}

impl KernelExecutionRuntime for ThreadedRuntime {
    fn schedule(&mut self, work: Box<dyn FnOnce() + Send + 'static>, deps: &[Fence]) -> Fence {
        self.next_fence += 1;
        let fence = Fence(self.next_fence);
        let job = Job {
            work,
            deps: deps.to_vec(),
            fence,
        };
        self.sender
            .as_ref()
            .expect("sender is only taken in Drop")
            .send(job)
            .expect("worker pool outlives every call to schedule");
        fence
    }

    fn complete(&mut self, fence: Fence) {
        self.registry.wait_for(fence);
    }
}

impl Drop for ThreadedRuntime {
    fn drop(&mut self) {
        // Drop the sender first so the channel closes and every worker's
        // blocking `recv()` returns `Err`, letting its loop exit before
        // we join it below. Field drop order alone would join while the
        // sender is still alive and deadlock.
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn zero_workers_is_rejected() {
        assert!(matches!(ThreadedRuntime::new(0), Err(JobsError::NoWorkers)));
    }

    #[test]
    fn all_scheduled_jobs_run_exactly_once() {
        let mut runtime = ThreadedRuntime::new(4).unwrap();
        let counter = Arc::new(AtomicU32::new(0));

        let mut fences = Vec::new();
        for _ in 0..50 {
            let counter = counter.clone();
            fences.push(runtime.schedule(
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
                &[],
            ));
        }
        for fence in fences {
            runtime.complete(fence);
        }

        assert_eq!(counter.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn a_job_waits_for_its_declared_dependency() {
        let mut runtime = ThreadedRuntime::new(4).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        let log_a = log.clone();
        let first = runtime.schedule(Box::new(move || log_a.lock().unwrap().push(1)), &[]);

        let log_b = log.clone();
        let second = runtime.schedule(
            Box::new(move || log_b.lock().unwrap().push(2)),
            &[first],
        );

        runtime.complete(second);
        assert_eq!(*log.lock().unwrap(), vec![1, 2]);
    }
}
