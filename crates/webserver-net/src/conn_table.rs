use std::time::Instant;

use mio::net::TcpStream;
use webserver_http::HttpConnection;
use webserver_timer::heap::HeapHandle;

/// Hard cap on simultaneously open connections (`MAX_FD` in the source).
/// Unlike the source's `users[MAX_FD]` array indexed by raw fd, slots here
/// are indexed independently of the fd and tagged with a generation
/// counter, so a timer or event referencing a closed-then-reused slot can
/// be told apart from one referencing the connection it was issued for.
pub const MAX_CONNECTIONS: usize = 65_536;

/// A non-owning reference to a connection table slot. Two `ConnId`s can
/// share an `index` across the lifetime of the table if the slot was
/// freed and reused; `generation` distinguishes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId {
    pub(crate) index: usize,
    pub(crate) generation: u32,
}

struct Occupant {
    stream: TcpStream,
    conn: HttpConnection,
    last_active: Instant,
    /// Set right after insertion, once the caller has registered an idle
    /// timer for this slot; absent only in the brief window between
    /// `insert` and `set_timer_handle`.
    timer_handle: Option<HeapHandle>,
}

struct Slot {
    generation: u32,
    occupant: Option<Occupant>,
}

/// Dense table of live connections, bounded by [`MAX_CONNECTIONS`].
#[derive(Default)]
pub struct ConnTable {
    slots: Vec<Slot>,
    free: Vec<usize>,
}

impl ConnTable {
    pub fn new() -> Self {
        Self { slots: Vec::new(), free: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts a freshly accepted connection. Returns `None` if the table
    /// is already at [`MAX_CONNECTIONS`] (the caller should refuse the
    /// accepted socket, mirroring the source's fd-exhaustion handling).
    pub fn insert(&mut self, stream: TcpStream, conn: HttpConnection, now: Instant) -> Option<(ConnId, usize)> {
        let occupant = Occupant { stream, conn, last_active: now, timer_handle: None };
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index];
            slot.occupant = Some(occupant);
            Some((ConnId { index, generation: slot.generation }, index))
        } else if self.slots.len() < MAX_CONNECTIONS {
            let index = self.slots.len();
            self.slots.push(Slot { generation: 0, occupant: Some(occupant) });
            Some((ConnId { index, generation: 0 }, index))
        } else {
            None
        }
    }

    /// Looks a slot up by its raw index (as recovered from an `mio::Token`),
    /// without a generation check — used for dispatching I/O readiness,
    /// which always arrives for the slot's *current* occupant.
    pub fn get_by_index(&mut self, index: usize) -> Option<(&mut TcpStream, &mut HttpConnection)> {
        let slot = self.slots.get_mut(index)?;
        let occ = slot.occupant.as_mut()?;
        Some((&mut occ.stream, &mut occ.conn))
    }

    pub fn touch(&mut self, index: usize, now: Instant) {
        if let Some(occ) = self.slots.get_mut(index).and_then(|s| s.occupant.as_mut()) {
            occ.last_active = now;
        }
    }

    pub fn last_active(&self, index: usize) -> Option<Instant> {
        self.slots.get(index)?.occupant.as_ref().map(|o| o.last_active)
    }

    pub fn set_timer_handle(&mut self, index: usize, handle: HeapHandle) {
        if let Some(occ) = self.slots.get_mut(index).and_then(|s| s.occupant.as_mut()) {
            occ.timer_handle = Some(handle);
        }
    }

    pub fn timer_handle(&self, index: usize) -> Option<HeapHandle> {
        self.slots.get(index)?.occupant.as_ref()?.timer_handle
    }

    /// Removes and returns the occupant at `id`, provided it still matches
    /// the slot's current generation. A mismatch means the slot was
    /// already recycled for a different connection — a stale timer, say —
    /// and is a no-op.
    pub fn remove(&mut self, id: ConnId) -> Option<(TcpStream, HttpConnection)> {
        let slot = self.slots.get_mut(id.index)?;
        if slot.generation != id.generation {
            return None;
        }
        let occ = slot.occupant.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Some((occ.stream, occ.conn))
    }

    pub fn id_for_index(&self, index: usize) -> Option<ConnId> {
        let slot = self.slots.get(index)?;
        slot.occupant.as_ref()?;
        Some(ConnId { index, generation: slot.generation })
    }
}
