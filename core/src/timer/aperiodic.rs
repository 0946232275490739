//! Per-CPU aperiodic master: an array-backed binary heap keyed by absolute
//! TSC expiry, with a monotonic sequence number as the FIFO tie-break so
//! timers with equal expiry fire in insertion order.

use nucleus_abi::{Errno, KernelResult};

use super::TimerHandler;

/// Upper bound on outstanding timers per CPU. Sized comfortably above the
/// worked aperiodic-timer-storm scenario (1,000 one-shot timers).
pub const MAX_TIMERS_PER_CPU: usize = 2048;

bitflags::bitflags! {
    /// Status bits carried per timer.
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct TimerStatus: u8 {
        /// Not currently on the heap.
        const DEQUEUED = 1 << 0;
        /// Destroyed; slot pending reuse.
        const KILLED   = 1 << 1;
        /// Owned by a periodic wheel's cascade, not user-started directly.
        const PERIODIC = 1 << 2;
    }
}

/// Stable handle to a timer slot. Heap position moves as the timer is
/// re-ordered; this index does not.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TimerId(pub usize);

#[derive(Clone, Copy)]
struct TimerSlot {
    expiry: u64,
    interval: u64,
    handler: TimerHandler,
    cookie: u64,
    seq: u64,
    status: TimerStatus,
    /// Index of this slot within `heap`, or `usize::MAX` if dequeued.
    heap_pos: usize,
    allocated: bool,
}

impl TimerSlot {
    const fn empty() -> Self {
        Self {
            expiry: 0,
            interval: 0,
            handler: no_op_handler,
            cookie: 0,
            seq: 0,
            status: TimerStatus::DEQUEUED,
            heap_pos: usize::MAX,
            allocated: false,
        }
    }
}

fn no_op_handler(_cookie: u64) {}

pub struct AperiodicMaster {
    slots: [TimerSlot; MAX_TIMERS_PER_CPU],
    /// Min-heap of slot indices, ordered by `(expiry, seq)`.
    heap: [usize; MAX_TIMERS_PER_CPU],
    heap_len: usize,
    next_seq: u64,
}

impl AperiodicMaster {
    pub const fn new() -> Self {
        Self {
            slots: [TimerSlot::empty(); MAX_TIMERS_PER_CPU],
            heap: [0; MAX_TIMERS_PER_CPU],
            heap_len: 0,
            next_seq: 0,
        }
    }

    fn less(&self, a: usize, b: usize) -> bool {
        let sa = &self.slots[a];
        let sb = &self.slots[b];
        (sa.expiry, sa.seq) < (sb.expiry, sb.seq)
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.less(self.heap[i], self.heap[parent]) {
                self.heap.swap(i, parent);
                self.slots[self.heap[i]].heap_pos = i;
                self.slots[self.heap[parent]].heap_pos = parent;
                i = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        loop {
            let left = 2 * i + 1;
            let right = 2 * i + 2;
            let mut smallest = i;
            if left < self.heap_len && self.less(self.heap[left], self.heap[smallest]) {
                smallest = left;
            }
            if right < self.heap_len && self.less(self.heap[right], self.heap[smallest]) {
                smallest = right;
            }
            if smallest == i {
                break;
            }
            self.heap.swap(i, smallest);
            self.slots[self.heap[i]].heap_pos = i;
            self.slots[self.heap[smallest]].heap_pos = smallest;
            i = smallest;
        }
    }

    fn heap_push(&mut self, slot: usize) {
        let pos = self.heap_len;
        self.heap[pos] = slot;
        self.slots[slot].heap_pos = pos;
        self.heap_len += 1;
        self.sift_up(pos);
    }

    fn heap_remove_at(&mut self, pos: usize) {
        let last = self.heap_len - 1;
        self.heap[pos] = self.heap[last];
        self.slots[self.heap[pos]].heap_pos = pos;
        self.heap_len -= 1;
        if pos < self.heap_len {
            self.sift_down(pos);
            self.sift_up(pos);
        }
    }

    /// Allocates an idle timer slot. The timer is not armed until `start`.
    pub fn create(&mut self, handler: TimerHandler, cookie: u64) -> KernelResult<TimerId> {
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if !slot.allocated {
                *slot = TimerSlot {
                    allocated: true,
                    handler,
                    cookie,
                    status: TimerStatus::DEQUEUED,
                    heap_pos: usize::MAX,
                    ..TimerSlot::empty()
                };
                return Ok(TimerId(idx));
            }
        }
        Err(Errno::Enomem)
    }

    fn slot_mut(&mut self, id: TimerId) -> KernelResult<&mut TimerSlot> {
        let slot = self.slots.get_mut(id.0).ok_or(Errno::Esrch)?;
        if !slot.allocated {
            return Err(Errno::Esrch);
        }
        Ok(slot)
    }

    fn is_queued(&self, id: TimerId) -> bool {
        self.slots[id.0].heap_pos != usize::MAX
    }

    fn dequeue(&mut self, id: TimerId) {
        if self.is_queued(id) {
            let pos = self.slots[id.0].heap_pos;
            self.heap_remove_at(pos);
            self.slots[id.0].heap_pos = usize::MAX;
            self.slots[id.0].status.insert(TimerStatus::DEQUEUED);
        }
    }

    /// Arms `id` at absolute `expiry` (TSC ticks), with `interval` (0 for
    /// one-shot). If the timer is already queued this moves it. Returns
    /// `Ok(true)` if the newly enqueued timer became the new head (the
    /// caller should reprogram/poke hardware), `Ok(false)` otherwise.
    /// `Err(Etimedout)` is returned for a past `expiry`, but the handler
    /// still fires synchronously before returning, exactly as the
    /// original `xntimer_start_aperiodic` does.
    pub fn start(
        &mut self,
        id: TimerId,
        expiry: u64,
        interval: u64,
        now: u64,
    ) -> KernelResult<bool> {
        self.dequeue(id);
        let seq = self.next_seq;
        self.next_seq += 1;

        if expiry <= now {
            let (handler, cookie) = {
                let slot = self.slot_mut(id)?;
                slot.expiry = expiry;
                slot.interval = interval;
                slot.seq = seq;
                (slot.handler, slot.cookie)
            };
            handler(cookie);
            if interval > 0 {
                let mut next_expiry = expiry + interval;
                while next_expiry <= now {
                    next_expiry += interval;
                }
                let slot = self.slot_mut(id)?;
                slot.expiry = next_expiry;
                slot.status.remove(TimerStatus::DEQUEUED);
                let slot_idx = id.0;
                self.heap_push(slot_idx);
            }
            return Err(Errno::Etimedout);
        }

        {
            let slot = self.slot_mut(id)?;
            slot.expiry = expiry;
            slot.interval = interval;
            slot.seq = seq;
            slot.status.remove(TimerStatus::DEQUEUED);
        }
        let was_head_before = self.heap_len > 0 && self.peek().map(|h| h.0) != Some(id.0);
        self.heap_push(id.0);
        let became_head = self.peek().map(|h| h.0) == Some(id.0);
        Ok(became_head && (was_head_before || self.heap_len == 1))
    }

    pub fn stop(&mut self, id: TimerId) -> KernelResult<()> {
        let _ = self.slot_mut(id)?;
        self.dequeue(id);
        Ok(())
    }

    pub fn destroy(&mut self, id: TimerId) -> KernelResult<()> {
        self.stop(id)?;
        let slot = self.slot_mut(id)?;
        slot.allocated = false;
        slot.status = TimerStatus::DEQUEUED | TimerStatus::KILLED;
        Ok(())
    }

    /// The slot holding the current head of the queue, if any.
    pub fn peek(&self) -> Option<TimerId> {
        if self.heap_len == 0 {
            None
        } else {
            Some(TimerId(self.heap[0]))
        }
    }

    pub fn peek_expiry(&self) -> Option<u64> {
        self.peek().map(|id| self.slots[id.0].expiry)
    }

    pub fn len(&self) -> usize {
        self.heap_len
    }

    pub fn is_empty(&self) -> bool {
        self.heap_len == 0
    }

    /// Pops and fires every timer whose expiry is `<= now`, in
    /// non-decreasing `(expiry, seq)` order, re-enqueuing periodic timers
    /// at `expiry += interval` (wrapped forward past `now` if multiple
    /// periods elapsed). Returns the number of timers fired.
    pub fn fire_due(&mut self, now: u64) -> u32 {
        let mut fired = 0;
        while let Some(head) = self.peek() {
            if self.slots[head.0].expiry > now {
                break;
            }
            self.dequeue(head);
            let (handler, cookie, interval, expiry) = {
                let slot = &self.slots[head.0];
                (slot.handler, slot.cookie, slot.interval, slot.expiry)
            };
            handler(cookie);
            fired += 1;
            if interval > 0 {
                let mut next_expiry = expiry + interval;
                while next_expiry <= now {
                    next_expiry += interval;
                }
                let slot = &mut self.slots[head.0];
                slot.expiry = next_expiry;
                slot.seq = self.next_seq;
                self.next_seq += 1;
                slot.status.remove(TimerStatus::DEQUEUED);
                self.heap_push(head.0);
            }
        }
        fired
    }
}

impl Default for AperiodicMaster {
    fn default() -> Self {
        Self::new()
    }
}
