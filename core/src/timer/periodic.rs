//! Periodic cascade: a jiffy hash-bucket wheel driven by one cascading
//! aperiodic timer per CPU. Jiffies increment on exactly one CPU (the
//! `KEEPER`, CPU 0); a periodic timer lands in slot `expiry mod WHEELSIZE`
//! of its owning CPU's wheel and fires in insertion order with the other
//! timers sharing that jiffy.

use nucleus_abi::{Errno, KernelResult};

use super::TimerHandler;

pub const WHEELSIZE: usize = 64;
const MAX_PERIODIC_TIMERS: usize = 256;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PeriodicId(pub usize);

#[derive(Clone, Copy)]
struct PeriodicSlot {
    expiry_jiffy: u64,
    interval_jiffies: u64,
    handler: TimerHandler,
    cookie: u64,
    next: Option<usize>,
    queued: bool,
    allocated: bool,
}

impl PeriodicSlot {
    const fn empty() -> Self {
        Self {
            expiry_jiffy: 0,
            interval_jiffies: 0,
            handler: no_op_handler,
            cookie: 0,
            next: None,
            queued: false,
            allocated: false,
        }
    }
}

fn no_op_handler(_cookie: u64) {}

/// A periodic time base: jiffies plus a hash-bucketed wheel of timers.
pub struct PeriodicWheel {
    slots: [PeriodicSlot; MAX_PERIODIC_TIMERS],
    /// Head/tail of each bucket's intrusive singly linked list, so timers
    /// sharing a jiffy fire in the order they were inserted.
    bucket_head: [Option<usize>; WHEELSIZE],
    bucket_tail: [Option<usize>; WHEELSIZE],
    jiffies: u64,
    is_keeper: bool,
}

impl PeriodicWheel {
    pub const fn new(is_keeper: bool) -> Self {
        Self {
            slots: [PeriodicSlot::empty(); MAX_PERIODIC_TIMERS],
            bucket_head: [None; WHEELSIZE],
            bucket_tail: [None; WHEELSIZE],
            jiffies: 0,
            is_keeper,
        }
    }

    pub fn jiffies(&self) -> u64 {
        self.jiffies
    }

    pub fn create(&mut self, handler: TimerHandler, cookie: u64) -> KernelResult<PeriodicId> {
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if !slot.allocated {
                *slot = PeriodicSlot {
                    allocated: true,
                    handler,
                    cookie,
                    ..PeriodicSlot::empty()
                };
                return Ok(PeriodicId(idx));
            }
        }
        Err(Errno::Enomem)
    }

    fn bucket_of(&self, expiry_jiffy: u64) -> usize {
        (expiry_jiffy % WHEELSIZE as u64) as usize
    }

    fn unlink(&mut self, id: PeriodicId) {
        if !self.slots[id.0].queued {
            return;
        }
        let bucket = self.bucket_of(self.slots[id.0].expiry_jiffy);
        let mut cursor = self.bucket_head[bucket];
        let mut prev: Option<usize> = None;
        while let Some(idx) = cursor {
            if idx == id.0 {
                let next = self.slots[idx].next;
                match prev {
                    Some(p) => self.slots[p].next = next,
                    None => self.bucket_head[bucket] = next,
                }
                if self.bucket_tail[bucket] == Some(idx) {
                    self.bucket_tail[bucket] = prev;
                }
                break;
            }
            prev = Some(idx);
            cursor = self.slots[idx].next;
        }
        self.slots[id.0].queued = false;
        self.slots[id.0].next = None;
    }

    fn link_tail(&mut self, id: PeriodicId) {
        let bucket = self.bucket_of(self.slots[id.0].expiry_jiffy);
        self.slots[id.0].next = None;
        match self.bucket_tail[bucket] {
            Some(tail) => self.slots[tail].next = Some(id.0),
            None => self.bucket_head[bucket] = Some(id.0),
        }
        self.bucket_tail[bucket] = Some(id.0);
        self.slots[id.0].queued = true;
    }

    /// Starts (or moves) a periodic timer at absolute jiffy `expiry`.
    pub fn start(
        &mut self,
        id: PeriodicId,
        expiry_jiffy: u64,
        interval_jiffies: u64,
    ) -> KernelResult<()> {
        if !self.slots.get(id.0).is_some_and(|s| s.allocated) {
            return Err(Errno::Esrch);
        }
        self.unlink(id);
        self.slots[id.0].expiry_jiffy = expiry_jiffy;
        self.slots[id.0].interval_jiffies = interval_jiffies;
        self.link_tail(id);
        Ok(())
    }

    pub fn stop(&mut self, id: PeriodicId) -> KernelResult<()> {
        if !self.slots.get(id.0).is_some_and(|s| s.allocated) {
            return Err(Errno::Esrch);
        }
        self.unlink(id);
        Ok(())
    }

    pub fn destroy(&mut self, id: PeriodicId) -> KernelResult<()> {
        self.stop(id)?;
        self.slots[id.0].allocated = false;
        Ok(())
    }

    /// Advances jiffies by one (only meaningful on the `KEEPER` CPU) and
    /// fires every timer in the now-current bucket, re-enqueuing periodic
    /// ones at `expiry += interval`.
    pub fn tick(&mut self) -> u32 {
        debug_assert!(self.is_keeper, "only the KEEPER CPU advances jiffies");
        self.jiffies += 1;
        self.fire_bucket(self.jiffies)
    }

    fn fire_bucket(&mut self, jiffy: u64) -> u32 {
        let bucket = self.bucket_of(jiffy);
        let mut fired = 0;
        let mut cursor = self.bucket_head[bucket];
        let mut due = [0usize; MAX_PERIODIC_TIMERS];
        let mut due_len = 0;
        while let Some(idx) = cursor {
            let next = self.slots[idx].next;
            if self.slots[idx].expiry_jiffy == jiffy {
                due[due_len] = idx;
                due_len += 1;
            }
            cursor = next;
        }
        for &idx in &due[..due_len] {
            let id = PeriodicId(idx);
            self.unlink(id);
            let (handler, cookie, interval) = {
                let slot = &self.slots[idx];
                (slot.handler, slot.cookie, slot.interval_jiffies)
            };
            handler(cookie);
            fired += 1;
            if interval > 0 {
                self.slots[idx].expiry_jiffy = jiffy + interval;
                self.link_tail(id);
            }
        }
        fired
    }
}
