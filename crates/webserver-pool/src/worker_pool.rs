use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
};

use webserver_utils::ThreadPriority;

use crate::BlockingQueue;

/// A unit of work a worker thread can run to completion without touching
/// the reactor's notifier (DESIGN.md: "workers never touch the notifier
/// directly").
pub trait Task: Send + 'static {
    fn process(self);
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("worker pool thread_num must be positive, got {0}")]
    ZeroThreads(usize),
    #[error("worker pool max_requests must be positive, got {0}")]
    ZeroCapacity(usize),
}

/// Fixed number of worker threads draining a bounded task queue, grounded in
/// the source's `threadpool.h`.
///
/// Workers are spawned once at construction and joined on
/// [`shutdown`](Self::shutdown) or [`Drop`] — the source detaches its
/// threads and relies on process exit to reclaim them, which this engine
/// cannot do since graceful `SIGTERM` shutdown must return control to
/// `main`.
pub struct WorkerPool<T: Task> {
    queue: Arc<BlockingQueue<T>>,
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl<T: Task> WorkerPool<T> {
    /// `thread_num` defaults to 8, `max_requests` to 10000 in the source;
    /// callers here pass both explicitly since the CLI exposes them.
    pub fn new(thread_num: usize, max_requests: usize) -> Result<Self, PoolError> {
        Self::with_priority(thread_num, max_requests, ThreadPriority::OSDefault)
    }

    pub fn with_priority(
        thread_num: usize,
        max_requests: usize,
        priority: ThreadPriority,
    ) -> Result<Self, PoolError> {
        if thread_num == 0 {
            return Err(PoolError::ZeroThreads(thread_num));
        }
        if max_requests == 0 {
            return Err(PoolError::ZeroCapacity(max_requests));
        }

        let queue = Arc::new(BlockingQueue::new(max_requests));
        let stop = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::with_capacity(thread_num);

        for idx in 0..thread_num {
            let queue = queue.clone();
            let stop = stop.clone();
            let handle = thread::Builder::new()
                .name(format!("webserver-worker-{idx}"))
                .spawn(move || {
                    webserver_utils::thread_boot(None, priority);
                    run(&queue, &stop);
                })
                .expect("spawning a worker thread should not fail under normal resource limits");
            handles.push(handle);
        }

        tracing::info!(thread_num, max_requests, "worker pool started");
        Ok(Self { queue, stop, handles })
    }

    /// Enqueues `task`. Refuses (returning `false`, without blocking) once
    /// the queue holds `max_requests` tasks.
    pub fn append(&self, task: T) -> bool {
        self.queue.push(task)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Sets the stop flag, wakes every worker, and joins all threads.
    pub fn shutdown(mut self) {
        self.shutdown_mut();
    }

    fn shutdown_mut(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.queue.close();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl<T: Task> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            self.shutdown_mut();
        }
    }
}

fn run<T: Task>(queue: &BlockingQueue<T>, stop: &AtomicBool) {
    while !stop.load(Ordering::SeqCst) {
        let Some(task) = queue.pop() else {
            // queue closed and drained
            break;
        };
        task.process();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    struct CountingTask(Arc<AtomicUsize>);
    impl Task for CountingTask {
        fn process(self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn construction_rejects_zero_threads_or_capacity() {
        assert!(matches!(WorkerPool::<CountingTask>::new(0, 10), Err(PoolError::ZeroThreads(0))));
        assert!(matches!(WorkerPool::<CountingTask>::new(4, 0), Err(PoolError::ZeroCapacity(0))));
    }

    #[test]
    fn every_enqueued_task_runs_exactly_once_under_saturation() {
        let pool = WorkerPool::new(4, 200).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..200 {
            assert!(pool.append(CountingTask(counter.clone())));
        }
        // one over capacity once all 200 are in flight is not guaranteed to
        // fail deterministically (workers may have already drained some),
        // so just drive the queue to empty and check the total.
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 200);
    }

    #[test]
    fn append_refuses_once_queue_is_at_capacity() {
        let queue: BlockingQueue<u32> = BlockingQueue::new(2);
        assert!(queue.push(1));
        assert!(queue.push(2));
        assert!(!queue.push(3));
    }
}
