use bitflags::bitflags;
use nucleus_abi::{Errno, KernelResult, SynchId, ThreadId};

/// Maximum simultaneous waiters on a single synch.
pub const MAX_WAITERS: usize = 64;

/// Maximum live synchs in a single nucleus image.
pub const MAX_SYNCHS: usize = 128;

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct SynchFlags: u8 {
        /// Waiters ordered by weighted priority, FIFO among equals.
        const PRIO  = 1 << 0;
        /// Waiters ordered strictly FIFO.
        const FIFO  = 1 << 1;
        /// Tracks a current owner for priority inheritance.
        const OWNER = 1 << 2;
        /// Explicitly disables inheritance even when `OWNER` is set.
        const NOPIP = 1 << 3;
    }
}

#[derive(Clone, Copy)]
struct Waiter {
    thread: ThreadId,
    prio: u16,
}

/// A named sleeping queue, optionally tracking an owner for priority
/// inheritance (4.C).
pub struct Synch {
    pub id: SynchId,
    pub flags: SynchFlags,
    pub owner: Option<ThreadId>,
    waiters: [Option<Waiter>; MAX_WAITERS],
    waiters_len: usize,
}

impl Synch {
    fn empty(id: SynchId) -> Self {
        Self {
            id,
            flags: SynchFlags::empty(),
            owner: None,
            waiters: [None; MAX_WAITERS],
            waiters_len: 0,
        }
    }

    /// Inserts a waiter. `PRIO` synchs insert after every existing waiter
    /// of greater-or-equal priority, preserving FIFO order among equals;
    /// `FIFO` synchs (the default when neither flag is set) always append.
    pub fn insert_waiter(&mut self, thread: ThreadId, prio: u16) {
        let entry = Waiter { thread, prio };
        if self.flags.contains(SynchFlags::PRIO) {
            let mut pos = self.waiters_len;
            for i in 0..self.waiters_len {
                if self.waiters[i].unwrap().prio < prio {
                    pos = i;
                    break;
                }
            }
            for i in (pos..self.waiters_len).rev() {
                self.waiters[i + 1] = self.waiters[i];
            }
            self.waiters[pos] = Some(entry);
        } else {
            self.waiters[self.waiters_len] = Some(entry);
        }
        self.waiters_len += 1;
    }

    pub fn remove_waiter(&mut self, thread: ThreadId) -> bool {
        if let Some(pos) = self.waiters[..self.waiters_len]
            .iter()
            .position(|w| w.map(|w| w.thread) == Some(thread))
        {
            for i in pos..self.waiters_len - 1 {
                self.waiters[i] = self.waiters[i + 1];
            }
            self.waiters_len -= 1;
            self.waiters[self.waiters_len] = None;
            true
        } else {
            false
        }
    }

    pub fn pop_head(&mut self) -> Option<ThreadId> {
        let head = self.waiters[0]?.thread;
        self.remove_waiter(head);
        Some(head)
    }

    /// The priority of the queue head, used to fold this synch into its
    /// owner's boosted priority.
    pub fn head_prio(&self) -> Option<u16> {
        self.waiters[0].map(|w| w.prio)
    }

    pub fn requeue_waiter(&mut self, thread: ThreadId, new_prio: u16) {
        if self.remove_waiter(thread) {
            self.insert_waiter(thread, new_prio);
        }
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters_len
    }
}

/// The table every live synch is registered in.
pub struct SynchTable {
    slots: [Option<Synch>; MAX_SYNCHS],
    len: usize,
}

impl SynchTable {
    pub const fn new() -> Self {
        const EMPTY: Option<Synch> = None;
        Self {
            slots: [EMPTY; MAX_SYNCHS],
            len: 0,
        }
    }

    /// `init(synch, flags, fastlock?)`.
    pub fn init(&mut self, flags: SynchFlags) -> KernelResult<SynchId> {
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                let id = SynchId(idx as u32);
                let mut synch = Synch::empty(id);
                synch.flags = flags;
                *slot = Some(synch);
                self.len += 1;
                return Ok(id);
            }
        }
        Err(Errno::Enomem)
    }

    pub fn get(&self, id: SynchId) -> KernelResult<&Synch> {
        self.slots
            .get(id.0 as usize)
            .and_then(|s| s.as_ref())
            .ok_or(Errno::Esrch)
    }

    pub fn get_mut(&mut self, id: SynchId) -> KernelResult<&mut Synch> {
        self.slots
            .get_mut(id.0 as usize)
            .and_then(|s| s.as_mut())
            .ok_or(Errno::Esrch)
    }

    /// `destroy(synch)`: the caller must have already flushed waiters.
    /// Fails with `EBUSY` if the synch is still owned.
    pub fn destroy(&mut self, id: SynchId) -> KernelResult<()> {
        let synch = self.get(id)?;
        if synch.owner.is_some() {
            return Err(Errno::Ebusy);
        }
        self.slots[id.0 as usize] = None;
        self.len -= 1;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for SynchTable {
    fn default() -> Self {
        Self::new()
    }
}
