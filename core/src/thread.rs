//! Thread object and lifecycle (component E): the thread control block and
//! the global thread set it lives in. A `Thread` never outlives its slot in
//! a [`ThreadTable`]; every cross-module reference to a thread is a
//! [`ThreadId`] index, never a pointer, so the core stays allocator-free.

use nucleus_abi::{CpuId, Errno, Info, KernelResult, PersonalityCookie, State, SynchId, ThreadId};

/// Upper bound on claim-queue depth: the number of synchs a single thread
/// may own (and therefore inherit priority through) at once.
pub const MAX_CLAIMQ: usize = 8;

/// Upper bound on live threads in a single nucleus image.
pub const MAX_THREADS: usize = 256;

/// Scheduling class a thread is currently declared under.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ClassId {
    Idle,
    Weak,
    Tp,
    Sporadic,
    Rt,
}

impl ClassId {
    /// Relative weight used to break ties between classes when more than
    /// one has a runnable thread; higher runs first. Mirrors the
    /// descending-weight consultation order in the scheduler's `pick`.
    pub const fn weight(self) -> u32 {
        match self {
            ClassId::Idle => 0,
            ClassId::Weak => 1,
            ClassId::Tp => 2,
            ClassId::Sporadic => 3,
            ClassId::Rt => 4,
        }
    }
}

/// A priority as seen by the scheduler: the class weight in the high bits,
/// the in-class priority in the low bits, so a single `u32` totally orders
/// threads across classes without per-class special-casing in the ready
/// queue.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct WeightedPrio(pub u32);

impl WeightedPrio {
    pub const fn new(class: ClassId, in_class_prio: u16) -> Self {
        Self(((class.weight()) << 16) | in_class_prio as u32)
    }
}

/// Class-private parameters a sporadic-server thread carries in addition to
/// its base thread state.
#[derive(Clone, Copy, Debug, Default)]
pub struct SporadicParams {
    pub low_prio: i16,
    pub normal_prio: u16,
    pub init_budget: u64,
    pub repl_period: u64,
    pub max_repl: u8,
    pub current_budget: u64,
    pub outstanding_repl: u8,
}

/// Class-private parameters a TP thread carries: which partition it is
/// bound to.
#[derive(Clone, Copy, Debug, Default)]
pub struct TpParams {
    pub partition_id: i32,
}

/// The thread control block.
pub struct Thread {
    pub id: ThreadId,
    pub base_prio: u16,
    pub current_prio: WeightedPrio,
    pub class: ClassId,
    pub state: State,
    pub info: Info,
    pub cpu: CpuId,
    /// Synch this thread is currently blocked on, if any.
    pub wchan: Option<SynchId>,
    /// Synch that most recently woke this thread (diagnostic / ABI surface).
    pub wwake: Option<SynchId>,
    /// Synchs currently owned by this thread that have at least one waiter
    /// and therefore contribute to its boosted priority.
    pub claimq: [Option<SynchId>; MAX_CLAIMQ],
    pub claimq_len: usize,
    /// Recursive scheduler-lock depth; zero means unlocked.
    pub lock_depth: u32,
    pub rrb_quantum_ticks: u64,
    pub sporadic: SporadicParams,
    pub tp: TpParams,
    pub modeswitches: u64,
    /// Execution-time accounting (4.F): ticks this thread has spent
    /// running in primary (head-domain) mode and in secondary (relaxed,
    /// root-domain) mode. Updated by `shadow::relax`/`harden`, which close
    /// out the mode being left against `mode_since`.
    pub primary_ticks: u64,
    pub secondary_ticks: u64,
    /// Absolute tick the thread's current mode segment began, i.e. the
    /// `now` of its last relax/harden transition (or of `init`, for a
    /// thread that has never bounced).
    pub mode_since: u64,
    pub personality: PersonalityCookie,
    pub cancel_pending: bool,
}

impl Thread {
    fn new(id: ThreadId, class: ClassId, base_prio: u16, cpu: CpuId) -> Self {
        Self {
            id,
            base_prio,
            current_prio: WeightedPrio::new(class, base_prio),
            class,
            state: State::DORMANT,
            info: Info::empty(),
            cpu,
            wchan: None,
            wwake: None,
            claimq: [None; MAX_CLAIMQ],
            claimq_len: 0,
            lock_depth: 0,
            rrb_quantum_ticks: 0,
            sporadic: SporadicParams::default(),
            tp: TpParams::default(),
            modeswitches: 0,
            primary_ticks: 0,
            secondary_ticks: 0,
            mode_since: 0,
            personality: PersonalityCookie::default(),
            cancel_pending: false,
        }
    }

    pub fn is_runnable(&self) -> bool {
        self.state.is_runnable()
    }

    /// Recomputes `current_prio` as the max of base priority and the head
    /// priority of every synch on `claimq`, per the owner invariant. The
    /// per-synch head priority is supplied by the caller (the sync module
    /// owns synch internals); this just folds them.
    pub fn recompute_boost(&mut self, claim_heads: &[u16]) {
        let mut prio = self.base_prio;
        for &head in claim_heads {
            if head > prio {
                prio = head;
            }
        }
        if prio > self.base_prio {
            self.state.insert(State::BOOST);
        } else {
            self.state.remove(State::BOOST);
        }
        self.current_prio = WeightedPrio::new(self.class, prio);
    }

    pub fn push_claim(&mut self, synch: SynchId) -> KernelResult<()> {
        if self.claimq[..self.claimq_len].iter().any(|s| *s == Some(synch)) {
            return Ok(());
        }
        if self.claimq_len >= MAX_CLAIMQ {
            return Err(Errno::Enomem);
        }
        self.claimq[self.claimq_len] = Some(synch);
        self.claimq_len += 1;
        Ok(())
    }

    pub fn pop_claim(&mut self, synch: SynchId) {
        if let Some(pos) = self.claimq[..self.claimq_len].iter().position(|s| *s == Some(synch)) {
            for i in pos..self.claimq_len - 1 {
                self.claimq[i] = self.claimq[i + 1];
            }
            self.claimq_len -= 1;
            self.claimq[self.claimq_len] = None;
        }
    }
}

/// The global thread set every thread is registered in at `init`, and
/// deregistered from at reap time.
pub struct ThreadTable {
    slots: [Option<Thread>; MAX_THREADS],
    len: usize,
}

impl ThreadTable {
    pub const fn new() -> Self {
        const EMPTY: Option<Thread> = None;
        Self {
            slots: [EMPTY; MAX_THREADS],
            len: 0,
        }
    }

    /// `init`: allocates a TCB, declares its class, and marks it `DORMANT`.
    pub fn init(&mut self, class: ClassId, base_prio: u16, cpu: CpuId) -> KernelResult<ThreadId> {
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                let id = ThreadId(idx as u32);
                *slot = Some(Thread::new(id, class, base_prio, cpu));
                self.len += 1;
                return Ok(id);
            }
        }
        Err(Errno::Enomem)
    }

    /// `start`: clears `DORMANT`, marks the thread ready for the scheduler
    /// to enqueue. Enqueuing itself is the scheduler's job.
    pub fn start(&mut self, id: ThreadId) -> KernelResult<()> {
        let thread = self.get_mut(id)?;
        if !thread.state.contains(State::DORMANT) {
            return Err(Errno::Einval);
        }
        thread.state.remove(State::DORMANT);
        thread.state.insert(State::STARTED | State::READY);
        Ok(())
    }

    pub fn get(&self, id: ThreadId) -> KernelResult<&Thread> {
        self.slots
            .get(id.0 as usize)
            .and_then(|slot| slot.as_ref())
            .ok_or(Errno::Esrch)
    }

    pub fn get_mut(&mut self, id: ThreadId) -> KernelResult<&mut Thread> {
        self.slots
            .get_mut(id.0 as usize)
            .and_then(|slot| slot.as_mut())
            .ok_or(Errno::Esrch)
    }

    /// `deletion`: marks `ZOMBIE` and, once waiters have joined and cleanup
    /// ran, frees the TCB slot.
    pub fn mark_zombie(&mut self, id: ThreadId) -> KernelResult<()> {
        let thread = self.get_mut(id)?;
        thread.state.insert(State::ZOMBIE);
        thread.state.remove(State::READY);
        Ok(())
    }

    pub fn reap(&mut self, id: ThreadId) -> KernelResult<()> {
        let thread = self.get(id)?;
        if !thread.state.contains(State::ZOMBIE) {
            return Err(Errno::Einval);
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

impl Default for ThreadTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nucleus_lib::testing::TestResult;
    use nucleus_lib::{fail, pass};

    fn test_init_then_start_transitions_dormant_to_ready() -> TestResult {
        let mut table = ThreadTable::new();
        let id = match table.init(ClassId::Rt, 10, CpuId(0)) {
            Ok(id) => id,
            Err(_) => return fail!("init should succeed"),
        };
        if !table.get(id).unwrap().state.contains(State::DORMANT) {
            return fail!("freshly initialized thread should be DORMANT");
        }
        if table.start(id).is_err() {
            return fail!("start should succeed from DORMANT");
        }
        let thread = table.get(id).unwrap();
        if thread.state.contains(State::DORMANT) || !thread.state.contains(State::READY) {
            return fail!("start should clear DORMANT and set READY");
        }
        pass!()
    }

    fn test_start_twice_fails() -> TestResult {
        let mut table = ThreadTable::new();
        let id = table.init(ClassId::Rt, 10, CpuId(0)).unwrap();
        table.start(id).unwrap();
        match table.start(id) {
            Err(Errno::Einval) => pass!(),
            _ => fail!("starting an already-started thread should fail"),
        }
    }

    fn test_claimq_push_pop_and_boost_recompute() -> TestResult {
        let mut table = ThreadTable::new();
        let id = table.init(ClassId::Rt, 10, CpuId(0)).unwrap();
        let thread = table.get_mut(id).unwrap();
        thread.push_claim(SynchId(1)).unwrap();
        thread.recompute_boost(&[20]);
        if thread.current_prio != WeightedPrio::new(ClassId::Rt, 20) {
            return fail!("boosted priority should reflect claim head");
        }
        if !thread.state.contains(State::BOOST) {
            return fail!("BOOST should be set while boosted");
        }
        thread.pop_claim(SynchId(1));
        thread.recompute_boost(&[]);
        if thread.current_prio != WeightedPrio::new(ClassId::Rt, 10) {
            return fail!("priority should revert to base once claims are gone");
        }
        if thread.state.contains(State::BOOST) {
            return fail!("BOOST should clear once no claim exceeds base");
        }
        pass!()
    }

    fn test_reap_requires_zombie() -> TestResult {
        let mut table = ThreadTable::new();
        let id = table.init(ClassId::Idle, 0, CpuId(0)).unwrap();
        match table.reap(id) {
            Err(Errno::Einval) => {}
            _ => return fail!("reaping a non-zombie thread should fail"),
        }
        table.mark_zombie(id).unwrap();
        if table.reap(id).is_err() {
            return fail!("reaping a zombie thread should succeed");
        }
        if table.len() != 0 {
            return fail!("reap should free the slot");
        }
        pass!()
    }

    nucleus_lib::test_suite!(thread_suite, [
        test_init_then_start_transitions_dormant_to_ready,
        test_start_twice_fails,
        test_claimq_push_pop_and_boost_recompute,
        test_reap_requires_zombie,
    ]);
}
