//! Sleep-queue core (component C): wait objects, wakeups, and priority
//! inheritance. Operations are free functions over a [`ThreadTable`] and a
//! [`SynchTable`] rather than methods that embed an owning pointer, since
//! the PIP boost walk must mutate both a synch's waiter list and the
//! priority of threads several links up the ownership chain at once.

mod synch;

pub use synch::{Synch, SynchFlags, SynchTable, MAX_SYNCHS, MAX_WAITERS};

use nucleus_abi::{Errno, Info, KernelResult, SuspendReason, SynchId, ThreadId};
use nucleus_abi::State;

use crate::thread::ThreadTable;

/// How long a blocking call is willing to wait.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Timeout {
    Infinite,
    /// Absolute TSC tick deadline.
    Absolute(u64),
}

/// `sleep_on(synch, timeout, mode)`: atomically marks the caller `PEND`
/// (plus `DELAY` for a finite timeout), records `synch` as its `wchan`,
/// and inserts it into the synch's waiter queue in the synch's ordering
/// mode. Cancellation point: a caller with `CANCELD` set returns `EINTR`
/// without blocking.
pub fn sleep_on(
    threads: &mut ThreadTable,
    synchs: &mut SynchTable,
    synch_id: SynchId,
    thread_id: ThreadId,
    timeout: Timeout,
) -> KernelResult<()> {
    if threads.get(thread_id)?.cancel_pending {
        return Err(Errno::Eintr);
    }
    {
        let thread = threads.get_mut(thread_id)?;
        thread.state.remove(State::READY);
        thread.state.insert(State::PEND);
        if matches!(timeout, Timeout::Absolute(_)) {
            thread.state.insert(State::DELAY);
        }
        thread.wchan = Some(synch_id);
    }
    let prio = threads.get(thread_id)?.current_prio.0 as u16;
    let synch = synchs.get_mut(synch_id)?;
    synch.insert_waiter(thread_id, prio);
    Ok(())
}

fn clear_wait_state(thread: &mut crate::thread::Thread, reason: SuspendReason) {
    thread.state.remove(State::PEND | State::DELAY);
    thread.state.insert(State::READY);
    thread.wchan = None;
    thread.info.insert(reason.info_bit());
    if matches!(reason, SuspendReason::Normal) {
        thread.info.insert(Info::WAKEN);
    }
}

/// `wakeup_one_sleeper`: removes the queue head, clears `PEND`/`DELAY`,
/// sets `WAKEN`, records `synch` as the thread's `wwake`.
pub fn wakeup_one_sleeper(
    threads: &mut ThreadTable,
    synchs: &mut SynchTable,
    synch_id: SynchId,
) -> KernelResult<Option<ThreadId>> {
    let woken = synchs.get_mut(synch_id)?.pop_head();
    if let Some(thread_id) = woken {
        let thread = threads.get_mut(thread_id)?;
        clear_wait_state(thread, SuspendReason::Normal);
        thread.wwake = Some(synch_id);
    }
    Ok(woken)
}

/// `wakeup_this_sleeper`: like `wakeup_one_sleeper` but targets a specific
/// waiter regardless of queue position.
pub fn wakeup_this_sleeper(
    threads: &mut ThreadTable,
    synchs: &mut SynchTable,
    synch_id: SynchId,
    thread_id: ThreadId,
) -> KernelResult<()> {
    let synch = synchs.get_mut(synch_id)?;
    if !synch.remove_waiter(thread_id) {
        return Err(Errno::Esrch);
    }
    let thread = threads.get_mut(thread_id)?;
    clear_wait_state(thread, SuspendReason::Normal);
    thread.wwake = Some(synch_id);
    Ok(())
}

/// `flush`: wakes every waiter with `reason` set, typically `RMID` on
/// destruction.
pub fn flush(
    threads: &mut ThreadTable,
    synchs: &mut SynchTable,
    synch_id: SynchId,
    reason: SuspendReason,
) -> KernelResult<usize> {
    let mut count = 0;
    loop {
        let woken = synchs.get_mut(synch_id)?.pop_head();
        match woken {
            Some(thread_id) => {
                let thread = threads.get_mut(thread_id)?;
                clear_wait_state(thread, reason);
                count += 1;
            }
            None => break,
        }
    }
    Ok(count)
}

/// `destroy`: flushes every waiter with `RMID` and, if the synch was
/// owned, clears the claim from the owner.
pub fn destroy(threads: &mut ThreadTable, synchs: &mut SynchTable, synch_id: SynchId) -> KernelResult<()> {
    flush(threads, synchs, synch_id, SuspendReason::Rmid)?;
    let owner = synchs.get(synch_id)?.owner;
    if let Some(owner_id) = owner {
        if let Ok(thread) = threads.get_mut(owner_id) {
            thread.pop_claim(synch_id);
        }
        recompute_owner_chain(threads, synchs, owner_id)?;
    }
    synchs.get_mut(synch_id)?.owner = None;
    synchs.destroy(synch_id)
}

/// Maximum owner-chain depth the boost walk will traverse before treating
/// the graph as corrupted (a claim-queue cycle is a fatal invariant
/// violation, never a legitimate wait graph).
const MAX_BOOST_DEPTH: usize = crate::thread::MAX_THREADS;

/// Folds the per-synch head priorities of everything on `thread_id`'s
/// claimq into its current priority, then, if that changed the thread's
/// own position in whatever it is itself waiting on, repeats one link up
/// the ownership chain. This is the PIP propagation in 4.C: "a boosted
/// owner boosts its own waiters' targets."
fn recompute_owner_chain(
    threads: &mut ThreadTable,
    synchs: &mut SynchTable,
    mut thread_id: ThreadId,
) -> KernelResult<()> {
    for _ in 0..MAX_BOOST_DEPTH {
        let mut heads = [0u16; crate::thread::MAX_CLAIMQ];
        let mut heads_len = 0;
        let claim_count = threads.get(thread_id)?.claimq_len;
        for i in 0..claim_count {
            if let Some(sid) = threads.get(thread_id)?.claimq[i] {
                if let Some(head) = synchs.get(sid)?.head_prio() {
                    heads[heads_len] = head;
                    heads_len += 1;
                }
            }
        }
        let before = threads.get(thread_id)?.current_prio;
        threads.get_mut(thread_id)?.recompute_boost(&heads[..heads_len]);
        let after = threads.get(thread_id)?.current_prio;
        if before == after {
            return Ok(());
        }
        let wchan = threads.get(thread_id)?.wchan;
        match wchan {
            Some(blocking_on) => {
                let new_prio = after.0 as u16;
                synchs.get_mut(blocking_on)?.requeue_waiter(thread_id, new_prio);
                match synchs.get(blocking_on)?.owner {
                    Some(next_owner) => thread_id = next_owner,
                    None => return Ok(()),
                }
            }
            None => return Ok(()),
        }
    }
    crate::diag::fatal("claim-queue cycle detected during priority inheritance walk")
}

/// `acquire(synch, timeout, mode)`: takes ownership of an unowned synch
/// immediately; otherwise performs the owner boost (4.C) and queues the
/// caller. "A boost applied by contender C to owner O takes effect before
/// C completes the acquire call it is in": the boost runs synchronously
/// here, before `sleep_on` returns.
pub fn acquire(
    threads: &mut ThreadTable,
    synchs: &mut SynchTable,
    synch_id: SynchId,
    thread_id: ThreadId,
    timeout: Timeout,
) -> KernelResult<()> {
    let (owner, nopip) = {
        let synch = synchs.get(synch_id)?;
        (synch.owner, synch.flags.contains(SynchFlags::NOPIP))
    };
    match owner {
        None => {
            synchs.get_mut(synch_id)?.owner = Some(thread_id);
            Ok(())
        }
        Some(owner_id) if owner_id == thread_id => Err(Errno::Ebusy),
        Some(owner_id) => {
            sleep_on(threads, synchs, synch_id, thread_id, timeout)?;
            if !nopip {
                threads.get_mut(owner_id)?.push_claim(synch_id)?;
                recompute_owner_chain(threads, synchs, owner_id)?;
            }
            Ok(())
        }
    }
}

/// `release(synch)`: transfers ownership to the new head waiter (if any),
/// removes the synch from the outgoing owner's claimq, and recomputes the
/// outgoing owner's priority. If the synch still has waiters after the
/// transfer, it is pushed onto the new owner's claimq (mirroring
/// `acquire`'s `push_claim`) so the owner invariant — "every owned synch
/// with at least one waiter is on owner(S).claimq" — keeps holding across
/// the handoff, and the new owner's priority is recomputed to fold in
/// whatever remains queued behind it. A `WEAK` thread always reverts to
/// base on its last release, never keeping a hidden boost.
pub fn release(
    threads: &mut ThreadTable,
    synchs: &mut SynchTable,
    synch_id: SynchId,
    thread_id: ThreadId,
) -> KernelResult<()> {
    {
        let synch = synchs.get(synch_id)?;
        if synch.owner != Some(thread_id) {
            return Err(Errno::Eperm);
        }
    }
    threads.get_mut(thread_id)?.pop_claim(synch_id);
    let next_owner = wakeup_one_sleeper(threads, synchs, synch_id)?;
    synchs.get_mut(synch_id)?.owner = next_owner;
    if let Some(new_owner) = next_owner {
        threads.get_mut(new_owner)?.state.remove(State::PEND);
        if synchs.get(synch_id)?.waiter_count() > 0 {
            threads.get_mut(new_owner)?.push_claim(synch_id)?;
            recompute_owner_chain(threads, synchs, new_owner)?;
        }
    }
    let is_weak = threads.get(thread_id)?.class == crate::thread::ClassId::Weak;
    if is_weak && threads.get(thread_id)?.claimq_len == 0 {
        let thread = threads.get_mut(thread_id)?;
        thread.current_prio = crate::thread::WeightedPrio::new(thread.class, thread.base_prio);
        thread.state.remove(State::BOOST);
    } else {
        recompute_owner_chain(threads, synchs, thread_id)?;
    }
    Ok(())
}

/// `peek_claimq(thread)`: the thread's currently-effective boosted
/// priority, i.e. what `recompute_boost` last settled on.
pub fn peek_claimq(threads: &ThreadTable, thread_id: ThreadId) -> KernelResult<u16> {
    Ok(threads.get(thread_id)?.current_prio.0 as u16)
}

/// `requeue_sleeper(thread)`: re-sorts a waiter within whatever synch it is
/// blocked on after its priority changed for a reason external to that
/// synch (e.g. `setsched`). If this moves the waiter to the queue head,
/// the synch's owner is re-boosted through `recompute_owner_chain`: per
/// 4.C, a rising claim-queue head always calls back into the owner's
/// current priority, not just into the waiter's own queue position.
pub fn requeue_sleeper(threads: &mut ThreadTable, synchs: &mut SynchTable, thread_id: ThreadId) -> KernelResult<()> {
    let (synch_id, prio) = {
        let thread = threads.get(thread_id)?;
        match thread.wchan {
            Some(synch_id) => (synch_id, thread.current_prio.0 as u16),
            None => return Ok(()),
        }
    };
    synchs.get_mut(synch_id)?.requeue_waiter(thread_id, prio);
    if let Some(owner_id) = synchs.get(synch_id)?.owner {
        recompute_owner_chain(threads, synchs, owner_id)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::ClassId;
    use nucleus_abi::CpuId;
    use nucleus_lib::testing::TestResult;
    use nucleus_lib::{fail, pass};

    fn setup() -> (ThreadTable, SynchTable) {
        (ThreadTable::new(), SynchTable::new())
    }

    fn test_acquire_uncontended_grants_immediately() -> TestResult {
        let (mut threads, mut synchs) = setup();
        let t = threads.init(ClassId::Rt, 10, CpuId(0)).unwrap();
        let s = synchs.init(SynchFlags::PRIO | SynchFlags::OWNER).unwrap();
        if acquire(&mut threads, &mut synchs, s, t, Timeout::Infinite).is_err() {
            return fail!("uncontended acquire should succeed");
        }
        if synchs.get(s).unwrap().owner != Some(t) {
            return fail!("owner should be set to the acquiring thread");
        }
        pass!()
    }

    fn test_contended_acquire_boosts_owner() -> TestResult {
        let (mut threads, mut synchs) = setup();
        let low = threads.init(ClassId::Rt, 10, CpuId(0)).unwrap();
        let high = threads.init(ClassId::Rt, 50, CpuId(0)).unwrap();
        let s = synchs.init(SynchFlags::PRIO | SynchFlags::OWNER).unwrap();
        acquire(&mut threads, &mut synchs, s, low, Timeout::Infinite).unwrap();
        if acquire(&mut threads, &mut synchs, s, high, Timeout::Infinite).is_ok() {
            return fail!("second acquire of an owned synch should block, not grant");
        }
        let owner = threads.get(low).unwrap();
        if owner.current_prio.0 as u16 != 50 {
            return fail!("owner should inherit the contender's priority");
        }
        if !owner.state.contains(State::BOOST) {
            return fail!("BOOST should be set on the inheriting owner");
        }
        pass!()
    }

    fn test_release_transfers_ownership_and_drops_boost() -> TestResult {
        let (mut threads, mut synchs) = setup();
        let low = threads.init(ClassId::Rt, 10, CpuId(0)).unwrap();
        let high = threads.init(ClassId::Rt, 50, CpuId(0)).unwrap();
        let s = synchs.init(SynchFlags::PRIO | SynchFlags::OWNER).unwrap();
        acquire(&mut threads, &mut synchs, s, low, Timeout::Infinite).unwrap();
        let _ = acquire(&mut threads, &mut synchs, s, high, Timeout::Infinite);
        release(&mut threads, &mut synchs, s, low).unwrap();
        if synchs.get(s).unwrap().owner != Some(high) {
            return fail!("release should hand ownership to the head waiter");
        }
        let former_owner = threads.get(low).unwrap();
        if former_owner.current_prio.0 as u16 != 10 {
            return fail!("former owner should drop back to base priority");
        }
        if former_owner.state.contains(State::BOOST) {
            return fail!("BOOST should clear once the claim is gone");
        }
        pass!()
    }

    fn test_destroy_flushes_waiters_with_rmid() -> TestResult {
        let (mut threads, mut synchs) = setup();
        let owner = threads.init(ClassId::Rt, 10, CpuId(0)).unwrap();
        let waiter = threads.init(ClassId::Rt, 20, CpuId(0)).unwrap();
        let s = synchs.init(SynchFlags::PRIO | SynchFlags::OWNER).unwrap();
        acquire(&mut threads, &mut synchs, s, owner, Timeout::Infinite).unwrap();
        let _ = acquire(&mut threads, &mut synchs, s, waiter, Timeout::Infinite);
        destroy(&mut threads, &mut synchs, s).unwrap();
        let waiter_state = threads.get(waiter).unwrap();
        if !waiter_state.info.contains(Info::RMID) {
            return fail!("flushed waiter should have RMID set");
        }
        if waiter_state.state.contains(State::PEND) {
            return fail!("flushed waiter should no longer be PEND");
        }
        if synchs.get(s).is_ok() {
            return fail!("destroyed synch should be gone from the table");
        }
        pass!()
    }

    fn test_nopip_synch_does_not_boost_owner() -> TestResult {
        let (mut threads, mut synchs) = setup();
        let low = threads.init(ClassId::Rt, 10, CpuId(0)).unwrap();
        let high = threads.init(ClassId::Rt, 50, CpuId(0)).unwrap();
        let s = synchs
            .init(SynchFlags::PRIO | SynchFlags::OWNER | SynchFlags::NOPIP)
            .unwrap();
        acquire(&mut threads, &mut synchs, s, low, Timeout::Infinite).unwrap();
        let _ = acquire(&mut threads, &mut synchs, s, high, Timeout::Infinite);
        if threads.get(low).unwrap().current_prio.0 as u16 != 10 {
            return fail!("NOPIP synchs must never boost their owner");
        }
        pass!()
    }

    fn test_s1_boost_propagates_through_a_two_link_chain() -> TestResult {
        let (mut threads, mut synchs) = setup();
        let low = threads.init(ClassId::Rt, 10, CpuId(0)).unwrap();
        let mid = threads.init(ClassId::Rt, 50, CpuId(0)).unwrap();
        let high = threads.init(ClassId::Rt, 90, CpuId(0)).unwrap();
        let synch_a = synchs.init(SynchFlags::PRIO | SynchFlags::OWNER).unwrap();
        let synch_b = synchs.init(SynchFlags::PRIO | SynchFlags::OWNER).unwrap();

        // low owns A, mid owns B. mid then blocks on A (boosting low to 50),
        // and high blocks on B (boosting mid to 90, which must in turn
        // re-propagate through mid's own wait on A up to low).
        acquire(&mut threads, &mut synchs, synch_a, low, Timeout::Infinite).unwrap();
        acquire(&mut threads, &mut synchs, synch_b, mid, Timeout::Infinite).unwrap();
        acquire(&mut threads, &mut synchs, synch_a, mid, Timeout::Infinite).unwrap();
        if threads.get(low).unwrap().current_prio.0 as u16 != 50 {
            return fail!("low should inherit mid's priority once mid blocks on A");
        }
        acquire(&mut threads, &mut synchs, synch_b, high, Timeout::Infinite).unwrap();
        if threads.get(mid).unwrap().current_prio.0 as u16 != 90 {
            return fail!("mid should inherit high's priority once high blocks on B");
        }
        if threads.get(low).unwrap().current_prio.0 as u16 != 90 {
            return fail!("low should transitively inherit high's priority through the chain");
        }
        pass!()
    }

    fn test_s5_destroy_wakes_three_waiters_in_priority_order() -> TestResult {
        let (mut threads, mut synchs) = setup();
        let owner = threads.init(ClassId::Rt, 5, CpuId(0)).unwrap();
        let low = threads.init(ClassId::Rt, 10, CpuId(0)).unwrap();
        let mid = threads.init(ClassId::Rt, 20, CpuId(0)).unwrap();
        let high = threads.init(ClassId::Rt, 30, CpuId(0)).unwrap();
        let s = synchs.init(SynchFlags::PRIO | SynchFlags::OWNER).unwrap();

        acquire(&mut threads, &mut synchs, s, owner, Timeout::Infinite).unwrap();
        acquire(&mut threads, &mut synchs, s, low, Timeout::Infinite).unwrap();
        acquire(&mut threads, &mut synchs, s, mid, Timeout::Infinite).unwrap();
        acquire(&mut threads, &mut synchs, s, high, Timeout::Infinite).unwrap();

        if synchs.get(s).unwrap().waiter_count() != 3 {
            return fail!("three contenders should be queued");
        }
        let order = [
            wakeup_one_sleeper(&mut threads, &mut synchs, s).unwrap(),
            wakeup_one_sleeper(&mut threads, &mut synchs, s).unwrap(),
            wakeup_one_sleeper(&mut threads, &mut synchs, s).unwrap(),
        ];
        if order != [Some(high), Some(mid), Some(low)] {
            return fail!("a PRIO synch should wake waiters highest priority first");
        }

        // Re-queue the same three and destroy, expecting every one of them
        // to observe RMID regardless of wake order.
        for (t, p) in [(low, 10u16), (mid, 20), (high, 30)] {
            synchs.get_mut(s).unwrap().insert_waiter(t, p);
            threads.get_mut(t).unwrap().state.insert(State::PEND);
        }
        destroy(&mut threads, &mut synchs, s).unwrap();
        for t in [low, mid, high] {
            if !threads.get(t).unwrap().info.contains(Info::RMID) {
                return fail!("every waiter should observe RMID after destroy");
            }
        }
        pass!()
    }

    fn test_release_pushes_claim_onto_new_owner_when_waiters_remain() -> TestResult {
        let (mut threads, mut synchs) = setup();
        let owner = threads.init(ClassId::Rt, 5, CpuId(0)).unwrap();
        let mid = threads.init(ClassId::Rt, 20, CpuId(0)).unwrap();
        let high = threads.init(ClassId::Rt, 30, CpuId(0)).unwrap();
        let s = synchs.init(SynchFlags::PRIO | SynchFlags::OWNER).unwrap();
        acquire(&mut threads, &mut synchs, s, owner, Timeout::Infinite).unwrap();
        let _ = acquire(&mut threads, &mut synchs, s, mid, Timeout::Infinite);
        let _ = acquire(&mut threads, &mut synchs, s, high, Timeout::Infinite);
        release(&mut threads, &mut synchs, s, owner).unwrap();
        // A PRIO queue's head is its highest-priority waiter, so the
        // higher of the two contenders (high) becomes the new owner, with
        // mid still queued behind it.
        if synchs.get(s).unwrap().owner != Some(high) {
            return fail!("release should hand ownership to the head waiter");
        }
        let new_owner = threads.get(high).unwrap();
        if new_owner.claimq[..new_owner.claimq_len].iter().all(|c| *c != Some(s)) {
            return fail!("a synch with a remaining waiter should be on the new owner's claimq");
        }
        pass!()
    }

    fn test_requeue_sleeper_reboosts_owner_when_head_priority_rises() -> TestResult {
        let (mut threads, mut synchs) = setup();
        let owner = threads.init(ClassId::Rt, 5, CpuId(0)).unwrap();
        let waiter = threads.init(ClassId::Rt, 10, CpuId(0)).unwrap();
        let s = synchs.init(SynchFlags::PRIO | SynchFlags::OWNER).unwrap();
        acquire(&mut threads, &mut synchs, s, owner, Timeout::Infinite).unwrap();
        let _ = acquire(&mut threads, &mut synchs, s, waiter, Timeout::Infinite);
        if threads.get(owner).unwrap().current_prio.0 as u16 != 10 {
            return fail!("owner should be boosted to the waiter's priority once it blocks");
        }
        // A setsched on the waiter raises its own priority without touching
        // the synch's queue order.
        threads.get_mut(waiter).unwrap().current_prio = crate::thread::WeightedPrio::new(ClassId::Rt, 50);
        requeue_sleeper(&mut threads, &mut synchs, waiter).unwrap();
        if threads.get(owner).unwrap().current_prio.0 as u16 != 50 {
            return fail!("requeue_sleeper should re-boost the owner once the head priority rises");
        }
        pass!()
    }

    nucleus_lib::test_suite!(synch_suite, [
        test_acquire_uncontended_grants_immediately,
        test_contended_acquire_boosts_owner,
        test_release_transfers_ownership_and_drops_boost,
        test_destroy_flushes_waiters_with_rmid,
        test_nopip_synch_does_not_boost_owner,
        test_s1_boost_propagates_through_a_two_link_chain,
        test_s5_destroy_wakes_three_waiters_in_priority_order,
        test_release_pushes_claim_onto_new_owner_when_waiters_remain,
        test_requeue_sleeper_reboosts_owner_when_head_priority_rises,
    ]);
}
