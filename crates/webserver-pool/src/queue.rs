use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex},
    time::Duration,
};

struct Inner<T> {
    items: VecDeque<T>,
    capacity: usize,
    closed: bool,
}

/// Fixed-capacity MPMC queue. `push` into a full queue fails and wakes every
/// waiter (mirrors `block_queue::push`'s `m_cond.broadcast()` on overflow,
/// so blocked consumers re-check rather than deadlock); `pop` blocks while
/// empty, and [`BlockingQueue::pop_timeout`] returns `None` once the
/// deadline elapses.
pub struct BlockingQueue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> BlockingQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        Self {
            inner: Mutex::new(Inner { items: VecDeque::with_capacity(capacity), capacity, closed: false }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Appends `item` if the queue has room. Returns `false` (and leaves the
    /// queue's back index unmoved) if it was already at capacity.
    pub fn push(&self, item: T) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.items.len() >= inner.capacity {
            self.not_empty.notify_all();
            return false;
        }
        inner.items.push_back(item);
        drop(inner);
        self.not_empty.notify_one();
        true
    }

    /// Blocks until an item is available or the queue is closed.
    pub fn pop(&self) -> Option<T> {
        let mut inner = self.inner.lock().unwrap();
        while inner.items.is_empty() && !inner.closed {
            inner = self.not_empty.wait(inner).unwrap();
        }
        let item = inner.items.pop_front();
        if item.is_some() {
            drop(inner);
            self.not_full.notify_one();
        }
        item
    }

    /// As [`pop`](Self::pop), but gives up after `timeout` and returns
    /// `None` if still empty (the source's `block_queue::pop(T&, int
    /// ms_timeout)` overload).
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let mut inner = self.inner.lock().unwrap();
        if inner.items.is_empty() && !inner.closed {
            let (guard, result) =
                self.not_empty.wait_timeout_while(inner, timeout, |i| i.items.is_empty() && !i.closed).unwrap();
            inner = guard;
            if result.timed_out() && inner.items.is_empty() {
                return None;
            }
        }
        let item = inner.items.pop_front();
        if item.is_some() {
            drop(inner);
            self.not_full.notify_one();
        }
        item
    }

    /// Wakes every blocked `pop` so workers observing a stop flag can exit;
    /// further `pop` calls drain whatever remains, then return `None`.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        drop(inner);
        self.not_empty.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.items.len() >= inner.capacity
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread, time::Duration};

    use super::*;

    #[test]
    fn push_into_full_queue_fails_without_advancing() {
        let q: BlockingQueue<u32> = BlockingQueue::new(2);
        assert!(q.push(1));
        assert!(q.push(2));
        assert!(!q.push(3));
        assert_eq!(q.len(), 2);
        assert!(q.is_full());
    }

    #[test]
    fn pop_timeout_returns_none_once_deadline_elapses() {
        let q: BlockingQueue<u32> = BlockingQueue::new(4);
        let start = std::time::Instant::now();
        let got = q.pop_timeout(Duration::from_millis(50));
        assert!(got.is_none());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn pop_blocks_until_a_matching_push() {
        let q = Arc::new(BlockingQueue::<u32>::new(4));
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.pop());
        thread::sleep(Duration::from_millis(20));
        assert!(q.push(42));
        assert_eq!(handle.join().unwrap(), Some(42));
    }

    #[test]
    fn fifo_order_preserved() {
        let q: BlockingQueue<u32> = BlockingQueue::new(10);
        for i in 0..5 {
            assert!(q.push(i));
        }
        for i in 0..5 {
            assert_eq!(q.pop(), Some(i));
        }
    }
}
