//! Bounded blocking queue and fixed worker pool, grounded in the source's
//! `block_queue.h` and `threadpool.h`.
//!
//! The source pairs a `pthread_mutex_t` + `pthread_cond_t` ring buffer with
//! a semaphore-counted work queue; `std::sync::{Mutex, Condvar}` over a
//! `VecDeque` is the direct idiomatic equivalent — a condvar's `notify_one`
//! plays the role of `sem_post`/`cond.signal`, and "queue length" directly
//! replaces the semaphore's count, so a separate semaphore type adds
//! nothing here.

mod queue;
mod worker_pool;

pub use queue::BlockingQueue;
pub use worker_pool::{PoolError, Task, WorkerPool};
