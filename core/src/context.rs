//! The core context (§9 design note: "represent global mutable state as a
//! single core context object" rather than scattered statics). Owns the
//! global thread set, per-CPU schedulers, the synch table, per-CPU timer
//! masters, the personality registry, and the pipeline backend, and
//! enforces the nklock nesting order through the typestate lock levels in
//! `nucleus_lib::sync`:
//!
//!   L0 `threads` (the nklock proper) → L1 per-CPU scheduler →
//!   L2 `synchs` → L3 per-CPU aperiodic timer master → L4 `personalities`
//!   → L5 `pipeline`.
//!
//! Every public entry point takes a fresh `CleanLockToken` and threads it
//! down through nested `.lock()` calls in that order, so the compiler
//! rejects any accidental out-of-order acquisition.

use nucleus_abi::{CpuId, KernelResult, SynchId, ThreadId};
use nucleus_lib::sync::{CleanLockToken, Mutex, L0, L1, L2, L3, L4, L5};
use nucleus_lib::MAX_CPUS;

use crate::api::PersonalityRegistry;
use crate::pipeline::Pipeline;
use crate::sched::idle::create_idle_thread;
use crate::sched::PerCpuScheduler;
use crate::sync::{self as synch_ops, SynchFlags, SynchTable, Timeout};
use crate::thread::{ClassId, ThreadTable};
use crate::timer::AperiodicMaster;

/// The nucleus's entire mutable state, generic over the host's pipeline
/// backend so the same context type serves both the `SoftwarePipeline`
/// test double and a real hardware backend.
pub struct CoreContext<P: Pipeline> {
    threads: Mutex<L0, ThreadTable>,
    schedulers: [Mutex<L1, PerCpuScheduler>; MAX_CPUS],
    synchs: Mutex<L2, SynchTable>,
    aperiodic: [Mutex<L3, AperiodicMaster>; MAX_CPUS],
    personalities: Mutex<L4, PersonalityRegistry>,
    pipeline: Mutex<L5, P>,
}

impl<P: Pipeline> CoreContext<P> {
    pub fn new(pipeline: P) -> Self {
        Self {
            threads: Mutex::new(ThreadTable::new()),
            schedulers: core::array::from_fn(|i| Mutex::new(PerCpuScheduler::new(CpuId(i as u8)))),
            synchs: Mutex::new(SynchTable::new()),
            aperiodic: core::array::from_fn(|_| Mutex::new(AperiodicMaster::new())),
            personalities: Mutex::new(PersonalityRegistry::new()),
            pipeline: Mutex::new(pipeline),
        }
    }

    /// Boot-time bring-up: creates and starts the idle thread on every
    /// CPU and wires it into that CPU's scheduler.
    pub fn boot(&self) {
        let mut clean = unsafe { CleanLockToken::new() };
        let mut threads = self.threads.lock(clean.token());
        for (cpu, sched_lock) in self.schedulers.iter().enumerate() {
            let id = create_idle_thread(&mut threads, CpuId(cpu as u8))
                .expect("idle thread creation must not fail at boot");
            let mut sched = sched_lock.lock(threads.token());
            sched.set_idle(id);
        }
    }

    /// `create(thread, attr, sched, class, param)`: allocates a TCB under
    /// `class` on `cpu`.
    pub fn create_thread(&self, class: ClassId, base_prio: u16, cpu: CpuId) -> KernelResult<ThreadId> {
        let mut clean = unsafe { CleanLockToken::new() };
        let mut threads = self.threads.lock(clean.token());
        threads.init(class, base_prio, cpu)
    }

    /// `start(thread, entry, cookie, flags)`: clears `DORMANT` and
    /// enqueues the thread on its CPU's ready queue.
    pub fn start_thread(&self, id: ThreadId) -> KernelResult<()> {
        let mut clean = unsafe { CleanLockToken::new() };
        let mut threads = self.threads.lock(clean.token());
        threads.start(id)?;
        let cpu = threads.get(id)?.cpu;
        let mut sched = self.schedulers[cpu.0 as usize].lock(threads.token());
        sched.enqueue(&threads, id)
    }

    /// `init(synch, flags, fastlock?)`.
    pub fn create_synch(&self, flags: SynchFlags) -> KernelResult<SynchId> {
        let mut clean = unsafe { CleanLockToken::new() };
        // threads is not needed here, but acquiring it first keeps every
        // entry point honoring the same L0-before-L2 order even when one
        // level is a no-op for that call.
        let threads = self.threads.lock(clean.token());
        let mut synchs = self.synchs.lock(threads.token());
        synchs.init(flags)
    }

    /// `acquire(synch, timeout, mode)`.
    pub fn acquire_synch(&self, synch: SynchId, thread: ThreadId, timeout: Timeout) -> KernelResult<()> {
        let mut clean = unsafe { CleanLockToken::new() };
        let mut threads = self.threads.lock(clean.token());
        let mut synchs = self.synchs.lock(threads.token());
        synch_ops::acquire(&mut threads, &mut synchs, synch, thread, timeout)
    }

    /// `release(synch)`.
    pub fn release_synch(&self, synch: SynchId, thread: ThreadId) -> KernelResult<()> {
        let mut clean = unsafe { CleanLockToken::new() };
        let mut threads = self.threads.lock(clean.token());
        let mut synchs = self.synchs.lock(threads.token());
        synch_ops::release(&mut threads, &mut synchs, synch, thread)
    }

    /// `destroy(synch)`: flushes every waiter with `RMID`.
    pub fn destroy_synch(&self, synch: SynchId) -> KernelResult<()> {
        let mut clean = unsafe { CleanLockToken::new() };
        let mut threads = self.threads.lock(clean.token());
        let mut synchs = self.synchs.lock(threads.token());
        synch_ops::destroy(&mut threads, &mut synchs, synch)
    }

    /// Services a scheduler tick on `cpu` at `now`: round-robin quantum
    /// expiry, sporadic budget consumption/drop, and TP window-boundary
    /// detection all happen here. Returns whether a reschedule is now
    /// pending, so the caller knows whether to follow up with
    /// [`Self::pick_next`].
    pub fn tick(&self, cpu: CpuId, now: u64) -> KernelResult<bool> {
        let mut clean = unsafe { CleanLockToken::new() };
        let mut threads = self.threads.lock(clean.token());
        let mut sched = self.schedulers[cpu.0 as usize].lock(threads.token());
        sched.tick(&mut threads, now)?;
        Ok(sched.resched_pending)
    }

    /// The thread `cpu` should run at `now`: the highest-priority runnable
    /// thread eligible under that CPU's active TP partition, or its idle
    /// thread if none is.
    pub fn pick_next(&self, cpu: CpuId, now: u64) -> KernelResult<Option<ThreadId>> {
        let mut clean = unsafe { CleanLockToken::new() };
        let threads = self.threads.lock(clean.token());
        let mut sched = self.schedulers[cpu.0 as usize].lock(threads.token());
        sched.advance_time(now);
        Ok(sched.pick(&threads))
    }

    /// Fires every aperiodic timer due on `cpu` as of `now`, with the
    /// CPU's timer-wheel lock (L3) the innermost lock taken.
    pub fn fire_due_timers(&self, cpu: CpuId, now: u64) -> u32 {
        let mut clean = unsafe { CleanLockToken::new() };
        let threads = self.threads.lock(clean.token());
        let sched = self.schedulers[cpu.0 as usize].lock(threads.token());
        let mut aperiodic = self.aperiodic[cpu.0 as usize].lock(sched.token());
        aperiodic.fire_due(now)
    }

    pub fn personalities(&self) -> &Mutex<L4, PersonalityRegistry> {
        &self.personalities
    }

    pub fn pipeline(&self) -> &Mutex<L5, P> {
        &self.pipeline
    }
}
