//! Worker pool with exclusively owned per-worker resources.
//!
//! A fixed set of OS threads is spawned once; each thread takes permanent
//! ownership of one resource (typically an acoustic scorer instance), so no
//! locking is ever needed inside the scorer. Tasks are dispatched FIFO to
//! whichever worker goes idle first and run to completion on that worker.
//!
//! Shutdown is cooperative: dropping the pool sets a stop flag and wakes
//! every idle worker; workers executing a task finish it first.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

/// A unit of work bound to a worker and its leased resource for the whole
/// run.
pub trait PoolTask<R>: Send + Sync {
    fn run(&self, resource: &mut R);
}

struct PoolState<R> {
    tasks: VecDeque<Arc<dyn PoolTask<R>>>,
    stop: bool,
}

struct PoolShared<R> {
    state: Mutex<PoolState<R>>,
    available: Condvar,
}

impl<R> PoolShared<R> {
    /// Block until a task arrives or shutdown is requested.
    fn wait_task(&self) -> Option<Arc<dyn PoolTask<R>>> {
        let mut state = self.state.lock();
        loop {
            if let Some(task) = state.tasks.pop_front() {
                return Some(task);
            }
            if state.stop {
                return None;
            }
            self.available.wait(&mut state);
        }
    }
}

/// Fixed-size pool of worker threads, one resource per worker.
pub struct WorkerPool<R: Send + 'static> {
    shared: Arc<PoolShared<R>>,
    workers: Vec<JoinHandle<()>>,
}

impl<R: Send + 'static> WorkerPool<R> {
    /// Spawn one worker per resource. Each resource is moved into its
    /// worker thread and owned by it until shutdown.
    pub fn new(resources: Vec<R>) -> Self {
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                tasks: VecDeque::new(),
                stop: false,
            }),
            available: Condvar::new(),
        });

        let workers = resources
            .into_iter()
            .enumerate()
            .map(|(id, mut resource)| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || {
                    debug!(worker = id, "worker started");
                    while let Some(task) = shared.wait_task() {
                        task.run(&mut resource);
                    }
                    debug!(worker = id, "worker stopped");
                })
            })
            .collect();

        Self { shared, workers }
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Queue a task for the next idle worker. The caller keeps its own
    /// handle to communicate with the task while it runs.
    pub fn submit(&self, task: Arc<dyn PoolTask<R>>) {
        let mut state = self.shared.state.lock();
        state.tasks.push_back(task);
        drop(state);
        self.shared.available.notify_one();
    }
}

impl<R: Send + 'static> Drop for WorkerPool<R> {
    fn drop(&mut self) {
        self.shared.state.lock().stop = true;
        self.shared.available.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
