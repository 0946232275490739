//! Shadow / bi-mode threads (component G): the real-time persona of a
//! host task. `relax` parks it on the root stage so host-only work (a
//! syscall, a page fault) can run; `harden` brings it back to the head
//! stage. Priority-inheritance state is preserved across the round trip:
//! a boost a shadow owns when it relaxes is re-applied verbatim on
//! harden, since it never left the thread object.

use nucleus_abi::{Errno, Info, KernelResult, State, ThreadId};

use crate::thread::ThreadTable;

/// A single involuntary relax spot: the user-space return address the
/// relax happened at, and how many times it has recurred. The trace
/// coalesces repeats of the same address instead of growing unbounded.
#[derive(Clone, Copy, Default, Debug)]
pub struct RelaxSpot {
    pub address: u64,
    pub count: u32,
}

/// Fixed-capacity ring of the most recent distinct involuntary relax
/// spots, exposed through a debug read interface for post-mortem
/// analysis. Coalesces on address; counts saturate rather than wrap.
pub struct RelaxTrace {
    spots: [RelaxSpot; Self::CAPACITY],
    len: usize,
}

impl RelaxTrace {
    pub const CAPACITY: usize = 32;

    pub const fn new() -> Self {
        Self {
            spots: [RelaxSpot { address: 0, count: 0 }; Self::CAPACITY],
            len: 0,
        }
    }

    /// Records an involuntary relax at `address`. If the address is
    /// already the newest or an existing entry, its count is incremented
    /// (saturating); otherwise a new entry is appended, evicting the
    /// oldest once the ring is full.
    pub fn record(&mut self, address: u64) {
        if let Some(existing) = self.spots[..self.len].iter_mut().find(|s| s.address == address) {
            existing.count = existing.count.saturating_add(1);
            return;
        }
        if self.len < Self::CAPACITY {
            self.spots[self.len] = RelaxSpot { address, count: 1 };
            self.len += 1;
        } else {
            for i in 1..Self::CAPACITY {
                self.spots[i - 1] = self.spots[i];
            }
            self.spots[Self::CAPACITY - 1] = RelaxSpot { address, count: 1 };
        }
    }

    pub fn iter(&self) -> core::slice::Iter<'_, RelaxSpot> {
        self.spots[..self.len].iter()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for RelaxTrace {
    fn default() -> Self {
        Self::new()
    }
}

/// An asynchronous command delivered to a shadow thread from debug/trace
/// code running outside it, the `SIGSHADOW` equivalent in
/// `examples/original_source/ksrc/nucleus/debug.c`: notified threads act on
/// it the next time they pass through a relax/harden boundary rather than
/// being interrupted out-of-band.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ShadowSignal {
    /// Capture and log a backtrace of the current relax spot.
    Backtrace,
    /// Re-apply a priority change that raced with a relax.
    Renice(u16),
}

const MAX_PENDING_SIGNALS: usize = 32;

/// Fixed-capacity mailbox of undelivered shadow signals, one entry per
/// `(target, signal)` pair. A thread can have at most one pending signal of
/// each kind at a time; sending the same kind again overwrites it rather
/// than queuing duplicates.
pub struct ShadowSignalQueue {
    pending: [Option<(ThreadId, ShadowSignal)>; MAX_PENDING_SIGNALS],
    len: usize,
}

impl ShadowSignalQueue {
    pub const fn new() -> Self {
        Self {
            pending: [None; MAX_PENDING_SIGNALS],
            len: 0,
        }
    }

    pub fn send(&mut self, target: ThreadId, signal: ShadowSignal) -> KernelResult<()> {
        for slot in self.pending[..self.len].iter_mut() {
            if let Some((t, s)) = slot {
                if *t == target && core::mem::discriminant(s) == core::mem::discriminant(&signal) {
                    *s = signal;
                    return Ok(());
                }
            }
        }
        if self.len == MAX_PENDING_SIGNALS {
            return Err(Errno::Enomem);
        }
        self.pending[self.len] = Some((target, signal));
        self.len += 1;
        Ok(())
    }

    /// Takes the oldest pending signal addressed to `target`, if any.
    pub fn take_for(&mut self, target: ThreadId) -> Option<ShadowSignal> {
        let pos = self.pending[..self.len]
            .iter()
            .position(|slot| slot.map(|(t, _)| t) == Some(target))?;
        let (_, signal) = self.pending[pos].take().unwrap();
        for i in pos..self.len - 1 {
            self.pending[i] = self.pending[i + 1];
        }
        self.len -= 1;
        self.pending[self.len] = None;
        Some(signal)
    }
}

impl Default for ShadowSignalQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// `relax`: sets `RELAX`, bumps `modeswitches`, credits the ticks since the
/// last mode transition to `primary_ticks` (4.F execution-time accounting),
/// and, if the relax was involuntary (the caller supplies the user-space
/// return address), records it in `trace`. The real-time scheduler is
/// expected to pick a replacement on this CPU; that is the caller's
/// (scheduler's) job once this returns `Ok`.
pub fn relax(
    threads: &mut ThreadTable,
    trace: &mut RelaxTrace,
    id: ThreadId,
    involuntary_pc: Option<u64>,
    now: u64,
) -> KernelResult<()> {
    let thread = threads.get_mut(id)?;
    if thread.state.contains(State::RELAX) {
        return Err(Errno::Einval);
    }
    thread.primary_ticks += now.saturating_sub(thread.mode_since);
    thread.mode_since = now;
    thread.state.insert(State::RELAX);
    thread.modeswitches += 1;
    if let Some(pc) = involuntary_pc {
        if !thread.info.contains(Info::SWREP) {
            trace.record(pc);
            thread.info.insert(Info::SWREP);
        }
    }
    Ok(())
}

/// `harden`: clears `RELAX`, bumps `modeswitches`, credits the ticks since
/// the relax to `secondary_ticks`, and clears the once-per-relax `SWREP`
/// marker so the next involuntary relax is traced again. Fails fatally
/// (not just with an error) if the mirrored host task was killed while
/// relaxed: per 4.F that is fatal to the shadow, but the secondary time
/// already spent relaxed is still credited before that failure is
/// returned.
pub fn harden(threads: &mut ThreadTable, id: ThreadId, host_task_alive: bool, now: u64) -> KernelResult<()> {
    let thread = threads.get_mut(id)?;
    if !thread.state.contains(State::RELAX) {
        return Err(Errno::Einval);
    }
    thread.secondary_ticks += now.saturating_sub(thread.mode_since);
    thread.mode_since = now;
    if !host_task_alive {
        thread.state.insert(State::ZOMBIE);
        thread.state.remove(State::RELAX);
        return Err(Errno::Esrch);
    }
    thread.state.remove(State::RELAX);
    thread.modeswitches += 1;
    thread.info.remove(Info::SWREP);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::ClassId;
    use nucleus_abi::CpuId;
    use nucleus_lib::testing::TestResult;
    use nucleus_lib::{fail, pass};

    fn test_s4_mode_bounce_counts_four_modeswitches() -> TestResult {
        let mut threads = ThreadTable::new();
        let mut trace = RelaxTrace::new();
        let id = threads.init(ClassId::Rt, 50, CpuId(0)).unwrap();
        threads.start(id).unwrap();

        // relax at t=0, returns (harden) at t=1ms, 9ms in primary, relaxes
        // again at t=10ms, hardens for good at t=11ms.
        relax(&mut threads, &mut trace, id, Some(0xdead_beef), 0).unwrap();
        harden(&mut threads, id, true, 1).unwrap();
        relax(&mut threads, &mut trace, id, Some(0xdead_beef), 10).unwrap();
        harden(&mut threads, id, true, 11).unwrap();

        let thread = threads.get(id).unwrap();
        if thread.modeswitches != 4 {
            return fail!("two relax/harden round trips should total 4 modeswitches");
        }
        if thread.primary_ticks != 9 {
            return fail!("9 ticks spent between the first harden and the second relax should be credited to primary");
        }
        if thread.secondary_ticks != 2 {
            return fail!("the two relaxed spans (0..1 and 10..11) should total 2 ticks of secondary time");
        }
        if trace.len() != 1 {
            return fail!("the same involuntary relax address should coalesce to one spot");
        }
        let spot = trace.iter().next().unwrap();
        if spot.count != 2 {
            return fail!("a repeated relax spot should have its count incremented");
        }
        pass!()
    }

    fn test_relax_twice_without_harden_fails() -> TestResult {
        let mut threads = ThreadTable::new();
        let mut trace = RelaxTrace::new();
        let id = threads.init(ClassId::Rt, 10, CpuId(0)).unwrap();
        relax(&mut threads, &mut trace, id, None, 0).unwrap();
        match relax(&mut threads, &mut trace, id, None, 1) {
            Err(Errno::Einval) => pass!(),
            _ => fail!("relaxing an already-relaxed thread should fail"),
        }
    }

    fn test_harden_after_host_task_death_zombifies() -> TestResult {
        let mut threads = ThreadTable::new();
        let mut trace = RelaxTrace::new();
        let id = threads.init(ClassId::Rt, 10, CpuId(0)).unwrap();
        relax(&mut threads, &mut trace, id, None, 0).unwrap();
        match harden(&mut threads, id, false, 5) {
            Err(Errno::Esrch) => {}
            _ => return fail!("hardening with a dead host task should fail"),
        }
        let thread = threads.get(id).unwrap();
        if !thread.state.contains(State::ZOMBIE) {
            return fail!("a shadow whose host task died should be marked ZOMBIE");
        }
        if thread.secondary_ticks != 5 {
            return fail!("secondary time up to the fatal harden should still be credited");
        }
        pass!()
    }

    fn test_shadow_signal_send_then_take_roundtrips() -> TestResult {
        let mut queue = ShadowSignalQueue::new();
        let target = ThreadId(0);
        queue.send(target, ShadowSignal::Backtrace).unwrap();
        match queue.take_for(target) {
            Some(ShadowSignal::Backtrace) => {}
            _ => return fail!("the sent signal should be delivered on take_for"),
        }
        if queue.take_for(target).is_some() {
            return fail!("a delivered signal should not be redelivered");
        }
        pass!()
    }

    fn test_shadow_signal_resend_overwrites_same_kind() -> TestResult {
        let mut queue = ShadowSignalQueue::new();
        let target = ThreadId(0);
        queue.send(target, ShadowSignal::Renice(10)).unwrap();
        queue.send(target, ShadowSignal::Renice(20)).unwrap();
        match queue.take_for(target) {
            Some(ShadowSignal::Renice(20)) => pass!(),
            _ => fail!("resending the same signal kind should overwrite, not queue"),
        }
    }

    nucleus_lib::test_suite!(shadow_suite, [
        test_s4_mode_bounce_counts_four_modeswitches,
        test_relax_twice_without_harden_fails,
        test_harden_after_host_task_death_zombifies,
        test_shadow_signal_send_then_take_roundtrips,
        test_shadow_signal_resend_overwrites_same_kind,
    ]);
}
