//! Sorted doubly linked list, the second interchangeable timer
//! implementation alongside [`crate::heap`].
//!
//! The source's version is an intrusive `prev`/`next` linked list of heap
//! allocated nodes; an arena (slab) of nodes addressed by index is the
//! Rust-idiomatic rendition, replacing the raw pointer back-edges with
//! plain indices into the arena.

use std::time::Instant;

use crate::TimerDriver;

struct Node<T> {
    payload: T,
    expire: Instant,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Handle into a [`TimerList`]. Opaque outside this crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListHandle(usize);

pub struct TimerList<T> {
    nodes: Vec<Option<Node<T>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl<T: Copy> Default for TimerList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy> TimerList<T> {
    pub fn new() -> Self {
        Self { nodes: Vec::new(), free: Vec::new(), head: None, tail: None, len: 0 }
    }

    fn alloc(&mut self, node: Node<T>) -> usize {
        if let Some(slot) = self.free.pop() {
            self.nodes[slot] = Some(node);
            slot
        } else {
            self.nodes.push(Some(node));
            self.nodes.len() - 1
        }
    }

    /// Unlinks `slot` from the list without freeing it.
    fn unlink(&mut self, slot: usize) {
        let (prev, next) = {
            let node = self.nodes[slot].as_ref().expect("unlink on occupied slot");
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.nodes[p].as_mut().unwrap().next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].as_mut().unwrap().prev = prev,
            None => self.tail = prev,
        }
        self.len -= 1;
    }

    /// Inserts `slot` (already populated, unlinked) keeping the list
    /// non-decreasing by expiry, walking from the head as the source does.
    fn insert_sorted(&mut self, slot: usize) {
        let expire = self.nodes[slot].as_ref().unwrap().expire;
        let mut cursor = self.head;
        while let Some(c) = cursor {
            if self.nodes[c].as_ref().unwrap().expire > expire {
                break;
            }
            cursor = self.nodes[c].as_ref().unwrap().next;
        }
        match cursor {
            Some(before) => {
                let prev = self.nodes[before].as_ref().unwrap().prev;
                self.nodes[slot].as_mut().unwrap().prev = prev;
                self.nodes[slot].as_mut().unwrap().next = Some(before);
                match prev {
                    Some(p) => self.nodes[p].as_mut().unwrap().next = Some(slot),
                    None => self.head = Some(slot),
                }
                self.nodes[before].as_mut().unwrap().prev = Some(slot);
            }
            None => {
                self.nodes[slot].as_mut().unwrap().prev = self.tail;
                self.nodes[slot].as_mut().unwrap().next = None;
                match self.tail {
                    Some(t) => self.nodes[t].as_mut().unwrap().next = Some(slot),
                    None => self.head = Some(slot),
                }
                self.tail = Some(slot);
            }
        }
        self.len += 1;
    }
}

impl<T: Copy> TimerDriver<T> for TimerList<T> {
    type Handle = ListHandle;

    fn add(&mut self, payload: T, expire_at: Instant) -> ListHandle {
        let slot = self.alloc(Node { payload, expire: expire_at, prev: None, next: None });
        self.insert_sorted(slot);
        ListHandle(slot)
    }

    fn adjust(&mut self, handle: ListHandle, new_expire_at: Instant) {
        let slot = handle.0;
        if self.nodes.get(slot).is_none_or(Option::is_none) {
            return;
        }
        debug_assert!(
            new_expire_at >= self.nodes[slot].as_ref().unwrap().expire,
            "adjust must only push a timer's expiry forward"
        );
        self.unlink(slot);
        self.nodes[slot].as_mut().unwrap().expire = new_expire_at;
        self.insert_sorted(slot);
    }

    fn del(&mut self, handle: ListHandle) {
        let slot = handle.0;
        if self.nodes.get(slot).is_none_or(Option::is_none) {
            return;
        }
        self.unlink(slot);
        self.nodes[slot] = None;
        self.free.push(slot);
    }

    fn tick(&mut self, now: Instant, expired: &mut Vec<T>) {
        let before = expired.len();
        while let Some(h) = self.head {
            if self.nodes[h].as_ref().unwrap().expire > now {
                break;
            }
            let payload = self.nodes[h].as_ref().unwrap().payload;
            self.unlink(h);
            self.nodes[h] = None;
            self.free.push(h);
            expired.push(payload);
        }
        if expired.len() > before {
            tracing::trace!(count = expired.len() - before, "timers expired");
        }
    }

    fn len(&self) -> usize {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn assert_non_decreasing<T: Copy>(l: &TimerList<T>) {
        let mut cursor = l.head;
        let mut prev_expire = None;
        let mut count = 0;
        while let Some(c) = cursor {
            let node = l.nodes[c].as_ref().unwrap();
            if let Some(p) = prev_expire {
                assert!(p <= node.expire);
            }
            prev_expire = Some(node.expire);
            cursor = node.next;
            count += 1;
        }
        assert_eq!(count, l.len);
    }

    #[test]
    fn list_stays_sorted_after_every_operation() {
        let base = Instant::now();
        let mut l: TimerList<u32> = TimerList::new();
        let mut handles = Vec::new();
        for i in 0..15u32 {
            handles.push(l.add(i, base + Duration::from_secs(u64::from(15 - i))));
            assert_non_decreasing(&l);
        }
        l.adjust(handles[3], base + Duration::from_secs(50));
        assert_non_decreasing(&l);
        l.del(handles[7]);
        assert_non_decreasing(&l);

        let mut expired = Vec::new();
        l.tick(base + Duration::from_secs(15), &mut expired);
        assert_non_decreasing(&l);
        assert!(!expired.contains(&7));
        assert!(!expired.contains(&11), "adjust(handles[3]) pushed payload 11 past t=15");
    }

    #[test]
    fn head_pop_order_matches_expiry_order() {
        let base = Instant::now();
        let mut l: TimerList<&'static str> = TimerList::new();
        l.add("third", base + Duration::from_secs(3));
        l.add("first", base + Duration::from_secs(1));
        l.add("second", base + Duration::from_secs(2));
        let mut expired = Vec::new();
        l.tick(base + Duration::from_secs(10), &mut expired);
        assert_eq!(expired, vec!["first", "second", "third"]);
    }
}
