//! Multi-class per-CPU scheduler (component D). `pick` effectively
//! consults classes in descending weight order because every thread's
//! [`WeightedPrio`](crate::thread::WeightedPrio) already encodes its
//! class's weight in its high bits; a single weighted-priority-ordered
//! ready queue therefore reproduces the same result as walking the class
//! list, without a second indirection through a class table.

pub mod idle;
pub mod rt;
pub mod sporadic;
pub mod tp;
pub mod weak;

use nucleus_abi::{CpuId, Errno, KernelResult, ThreadId};

use crate::thread::{ClassId, ThreadTable, WeightedPrio, MAX_THREADS};

/// Capability set every scheduling class exposes, mirroring 4.D. Classes
/// with no meaningful `tick`/`rotate`/`migrate` leave the default no-op.
pub trait SchedClass {
    fn class_id(&self) -> ClassId;

    /// Applies or reverts a priority boost; the default folds the claimq
    /// as `Thread::recompute_boost` already does, so classes only need to
    /// override this when they have class-private boost semantics (none
    /// currently do).
    fn trackprio(&self, threads: &mut ThreadTable, id: ThreadId, claim_heads: &[u16]) -> KernelResult<()> {
        threads.get_mut(id)?.recompute_boost(claim_heads);
        Ok(())
    }

    /// Called once per scheduler tick for the currently running thread of
    /// this class, if it wants one (round-robin slice expiry, sporadic
    /// budget consumption). Returns `true` if a reschedule is now needed.
    fn tick(&self, _threads: &mut ThreadTable, _id: ThreadId, _now: u64) -> bool {
        false
    }

    /// Moves a thread to the tail of its priority band (round-robin
    /// rotation). No-op for classes without time-slicing.
    fn rotate(&self, _threads: &mut ThreadTable, _ready: &mut ReadyQueue, _id: ThreadId) {}
}

/// A priority-ordered, FIFO-within-priority queue of runnable threads for
/// one CPU. Backs the runqueue invariant (8.1): exactly the non-blocked,
/// non-running threads of this CPU, in this order.
pub struct ReadyQueue {
    entries: [Option<ThreadId>; MAX_THREADS],
    len: usize,
}

impl ReadyQueue {
    pub const fn new() -> Self {
        Self {
            entries: [None; MAX_THREADS],
            len: 0,
        }
    }

    pub fn enqueue(&mut self, threads: &ThreadTable, id: ThreadId) -> KernelResult<()> {
        if self.entries[..self.len].iter().any(|e| *e == Some(id)) {
            return Ok(());
        }
        if self.len >= MAX_THREADS {
            return Err(Errno::Enomem);
        }
        let prio = threads.get(id)?.current_prio;
        let mut pos = self.len;
        for i in 0..self.len {
            let other = self.entries[i].unwrap();
            if threads.get(other)?.current_prio < prio {
                pos = i;
                break;
            }
        }
        for i in (pos..self.len).rev() {
            self.entries[i + 1] = self.entries[i];
        }
        self.entries[pos] = Some(id);
        self.len += 1;
        Ok(())
    }

    pub fn dequeue(&mut self, id: ThreadId) -> bool {
        if let Some(pos) = self.entries[..self.len].iter().position(|e| *e == Some(id)) {
            for i in pos..self.len - 1 {
                self.entries[i] = self.entries[i + 1];
            }
            self.len -= 1;
            self.entries[self.len] = None;
            true
        } else {
            false
        }
    }

    /// Re-inserts a thread whose priority changed, preserving order.
    pub fn requeue(&mut self, threads: &ThreadTable, id: ThreadId) -> KernelResult<()> {
        self.dequeue(id);
        self.enqueue(threads, id)
    }

    /// `pick`: the highest-weighted-priority runnable thread eligible to
    /// run right now, or `None` if nothing but idle is runnable (the caller
    /// falls back to the per-CPU idle thread in that case). A `Tp`-class
    /// entry is skipped unless its bound partition matches
    /// `active_partition`, so a window boundary is enforced here rather
    /// than only recorded in `Thread::tp`.
    pub fn pick(&self, threads: &ThreadTable, active_partition: i32) -> Option<ThreadId> {
        self.entries[..self.len].iter().filter_map(|e| *e).find(|&id| match threads.get(id) {
            Ok(t) if t.class == ClassId::Tp => t.tp.partition_id == active_partition,
            Ok(_) => true,
            Err(_) => false,
        })
    }

    /// Moves the band of threads sharing `id`'s priority so `id` is last
    /// among them (round-robin rotation).
    pub fn rotate_band(&mut self, threads: &ThreadTable, id: ThreadId) -> KernelResult<()> {
        let prio = threads.get(id)?.current_prio;
        let mut start = self.len;
        let mut end = self.len;
        for i in 0..self.len {
            let entry_prio = threads.get(self.entries[i].unwrap())?.current_prio;
            if entry_prio == prio {
                if start == self.len {
                    start = i;
                }
                end = i + 1;
            }
        }
        if start == self.len {
            return Ok(());
        }
        if let Some(pos) = self.entries[start..end].iter().position(|e| *e == Some(id)) {
            let abs = start + pos;
            for i in abs..end - 1 {
                self.entries[i] = self.entries[i + 1];
            }
            self.entries[end - 1] = Some(id);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, id: ThreadId) -> bool {
        self.entries[..self.len].iter().any(|e| *e == Some(id))
    }
}

impl Default for ReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-CPU scheduler state: the ready queue, the currently running thread,
/// the idle (root) thread that `pick` falls back to, and this CPU's TP
/// window schedule and current time, consulted by `pick`/`tick` to enforce
/// partition eligibility.
pub struct PerCpuScheduler {
    pub cpu: CpuId,
    pub ready: ReadyQueue,
    pub current: Option<ThreadId>,
    pub idle: Option<ThreadId>,
    /// Set when a higher-priority thread became runnable and a context
    /// switch must happen at the next safe point.
    pub resched_pending: bool,
    tp_schedule: tp::Schedule,
    now: u64,
}

impl PerCpuScheduler {
    pub const fn new(cpu: CpuId) -> Self {
        Self {
            cpu,
            ready: ReadyQueue::new(),
            current: None,
            idle: None,
            resched_pending: false,
            tp_schedule: tp::Schedule::empty(),
            now: 0,
        }
    }

    pub fn set_idle(&mut self, id: ThreadId) {
        self.idle = Some(id);
    }

    /// Installs this CPU's TP window schedule (`sched_setconfig_np`).
    pub fn set_tp_schedule(&mut self, schedule: tp::Schedule) {
        self.tp_schedule = schedule;
    }

    /// Advances this CPU's notion of "now" without running a full tick,
    /// so `pick` can be consulted between ticks (e.g. right after a
    /// voluntary yield) with an up-to-date active partition.
    pub fn advance_time(&mut self, now: u64) {
        self.now = now;
    }

    pub fn enqueue(&mut self, threads: &ThreadTable, id: ThreadId) -> KernelResult<()> {
        self.ready.enqueue(threads, id)?;
        self.maybe_request_resched(threads);
        Ok(())
    }

    pub fn dequeue(&mut self, id: ThreadId) {
        self.ready.dequeue(id);
    }

    fn maybe_request_resched(&mut self, threads: &ThreadTable) {
        let active_partition = self.tp_schedule.active_partition(self.now);
        let candidate = self.ready.pick(threads, active_partition);
        match (candidate, self.current) {
            (Some(c), Some(cur)) => {
                if let (Ok(cand_t), Ok(cur_t)) = (threads.get(c), threads.get(cur)) {
                    if cand_t.current_prio > cur_t.current_prio {
                        self.resched_pending = true;
                    }
                }
            }
            (Some(_), None) => self.resched_pending = true,
            _ => {}
        }
    }

    /// `pick`: highest-priority runnable thread eligible to run in the
    /// currently active TP partition, falling back to idle.
    pub fn pick(&self, threads: &ThreadTable) -> Option<ThreadId> {
        let active_partition = self.tp_schedule.active_partition(self.now);
        self.ready.pick(threads, active_partition).or(self.idle)
    }

    /// Performs the logical part of a context switch: dequeues the
    /// incoming thread, requeues the outgoing one if still runnable, and
    /// updates `current`. The architectural half is `crate::arch`'s job.
    pub fn switch_to(&mut self, threads: &mut ThreadTable, next: ThreadId) -> KernelResult<()> {
        if let Some(prev) = self.current {
            if threads.get(prev)?.is_runnable() {
                self.ready.enqueue(threads, prev)?;
            }
        }
        self.ready.dequeue(next);
        self.current = Some(next);
        self.resched_pending = false;
        Ok(())
    }

    /// Services a tick for the current thread: RT/sporadic round-robin
    /// expiry requests a `rotate`, a sporadic thread's budget is consumed
    /// and dropped on exhaustion, and a TP thread outside its active
    /// window requests a reschedule.
    pub fn tick(&mut self, threads: &mut ThreadTable, now: u64) -> KernelResult<()> {
        self.now = now;
        let Some(current) = self.current else {
            return Ok(());
        };
        let rrb = threads.get(current)?.state.contains(nucleus_abi::State::RRB);
        if rrb {
            let due = {
                let thread = threads.get_mut(current)?;
                if thread.rrb_quantum_ticks == 0 {
                    false
                } else {
                    thread.rrb_quantum_ticks = thread.rrb_quantum_ticks.saturating_sub(1);
                    thread.rrb_quantum_ticks == 0
                }
            };
            if due {
                self.ready.enqueue(threads, current)?;
                self.ready.rotate_band(threads, current)?;
                self.ready.dequeue(current);
                self.resched_pending = true;
            }
        }
        match threads.get(current)?.class {
            ClassId::Sporadic => {
                if sporadic::consume(threads, current, 1)? {
                    sporadic::on_drop(threads, current, now)?;
                    self.resched_pending = true;
                }
            }
            ClassId::Tp => {
                let active = self.tp_schedule.active_partition(now);
                if threads.get(current)?.tp.partition_id != active {
                    self.resched_pending = true;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::ClassId;
    use nucleus_lib::testing::TestResult;
    use nucleus_lib::{fail, pass};

    fn test_ready_queue_orders_by_weighted_priority() -> TestResult {
        let mut threads = ThreadTable::new();
        let low = threads.init(ClassId::Rt, 10, CpuId(0)).unwrap();
        let high = threads.init(ClassId::Rt, 50, CpuId(0)).unwrap();
        let mut ready = ReadyQueue::new();
        ready.enqueue(&threads, low).unwrap();
        ready.enqueue(&threads, high).unwrap();
        if ready.pick(&threads, tp::GAP_PARTITION) != Some(high) {
            return fail!("pick should return the highest-priority thread");
        }
        pass!()
    }

    fn test_ready_queue_fifo_within_same_priority() -> TestResult {
        let mut threads = ThreadTable::new();
        let a = threads.init(ClassId::Rt, 20, CpuId(0)).unwrap();
        let b = threads.init(ClassId::Rt, 20, CpuId(0)).unwrap();
        let mut ready = ReadyQueue::new();
        ready.enqueue(&threads, a).unwrap();
        ready.enqueue(&threads, b).unwrap();
        if ready.pick(&threads, tp::GAP_PARTITION) != Some(a) {
            return fail!("equal-priority threads should pick in FIFO order");
        }
        pass!()
    }

    fn test_idle_class_is_lowest_weight_fallback() -> TestResult {
        let mut threads = ThreadTable::new();
        let idle = threads.init(ClassId::Idle, 0, CpuId(0)).unwrap();
        let mut sched = PerCpuScheduler::new(CpuId(0));
        sched.set_idle(idle);
        if sched.pick(&threads) != Some(idle) {
            return fail!("with nothing ready, pick should fall back to idle");
        }
        let rt = threads.init(ClassId::Rt, 5, CpuId(0)).unwrap();
        sched.enqueue(&threads, rt).unwrap();
        if sched.pick(&threads) != Some(rt) {
            return fail!("any RT thread should outrank idle regardless of in-class priority");
        }
        pass!()
    }

    fn test_tp_partition_ineligible_thread_is_skipped_by_pick() -> TestResult {
        let mut threads = ThreadTable::new();
        let idle = threads.init(ClassId::Idle, 0, CpuId(0)).unwrap();
        let a = threads.init(ClassId::Tp, 10, CpuId(0)).unwrap();
        threads.get_mut(a).unwrap().tp.partition_id = 0;
        let b = threads.init(ClassId::Tp, 10, CpuId(0)).unwrap();
        threads.get_mut(b).unwrap().tp.partition_id = 1;

        let mut schedule = tp::Schedule::empty();
        schedule
            .set_config(&[
                tp::Window { offset: 0, duration: 20, partition_id: 0 },
                tp::Window { offset: 20, duration: 30, partition_id: 1 },
            ])
            .unwrap();

        let mut sched = PerCpuScheduler::new(CpuId(0));
        sched.set_idle(idle);
        sched.set_tp_schedule(schedule);
        sched.enqueue(&threads, a).unwrap();
        sched.enqueue(&threads, b).unwrap();

        sched.advance_time(10);
        if sched.pick(&threads) != Some(a) {
            return fail!("only the thread bound to the active partition should be picked");
        }
        sched.advance_time(25);
        if sched.pick(&threads) != Some(b) {
            return fail!("pick should track the active partition as time advances");
        }
        pass!()
    }

    fn test_tick_consumes_sporadic_budget_and_drops_on_exhaustion() -> TestResult {
        let mut threads = ThreadTable::new();
        let id = threads.init(ClassId::Sporadic, 0, CpuId(0)).unwrap();
        sporadic::admit(
            &mut threads,
            id,
            crate::thread::SporadicParams {
                low_prio: 5,
                normal_prio: 50,
                init_budget: 2,
                repl_period: 100,
                max_repl: 4,
                current_budget: 0,
                outstanding_repl: 0,
            },
        )
        .unwrap();

        let mut sched = PerCpuScheduler::new(CpuId(0));
        sched.enqueue(&threads, id).unwrap();
        sched.switch_to(&mut threads, id).unwrap();

        sched.tick(&mut threads, 1).unwrap();
        if sched.resched_pending {
            return fail!("one tick of a two-tick budget should not yet be exhausted");
        }
        sched.tick(&mut threads, 2).unwrap();
        if !sched.resched_pending {
            return fail!("exhausting the sporadic budget during tick should request a reschedule");
        }
        if threads.get(id).unwrap().current_prio.0 as u16 != 5 {
            return fail!("an exhausted sporadic thread should be demoted to low_prio");
        }
        pass!()
    }

    fn test_switch_to_requeues_outgoing_runnable_thread() -> TestResult {
        let mut threads = ThreadTable::new();
        let a = threads.init(ClassId::Rt, 10, CpuId(0)).unwrap();
        let b = threads.init(ClassId::Rt, 20, CpuId(0)).unwrap();
        threads.get_mut(a).unwrap().state = nucleus_abi::State::READY;
        let mut sched = PerCpuScheduler::new(CpuId(0));
        sched.enqueue(&threads, a).unwrap();
        sched.switch_to(&mut threads, a).unwrap();
        sched.enqueue(&threads, b).unwrap();
        sched.switch_to(&mut threads, b).unwrap();
        if !sched.ready.contains(a) {
            return fail!("outgoing runnable thread should be requeued, not dropped");
        }
        pass!()
    }

    nucleus_lib::test_suite!(sched_suite, [
        test_ready_queue_orders_by_weighted_priority,
        test_ready_queue_fifo_within_same_priority,
        test_idle_class_is_lowest_weight_fallback,
        test_switch_to_requeues_outgoing_runnable_thread,
        test_tp_partition_ineligible_thread_is_skipped_by_pick,
        test_tick_consumes_sporadic_budget_and_drops_on_exhaustion,
    ]);
}
