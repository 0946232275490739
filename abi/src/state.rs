//! Thread state/info bitmasks and the lock-free user-observable status window.
//!
//! The low 24 bits of the state word are reserved for the core (enumerated
//! below); the top 4 bits (`SPARE0..SPARE3`) are left for whichever
//! personality is attached, matching the 32-bit encoding described for the
//! host-task API.

use bitflags::bitflags;

bitflags! {
    /// Non-exclusive thread state bits, except where noted.
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct State: u32 {
        /// Explicitly suspended (e.g. debugger, emergency hold source).
        const SUSPEND = 1 << 0;
        /// Waiting on a resource (synch).
        const PEND    = 1 << 1;
        /// Timed wait only; always paired with `PEND` or standalone sleep.
        const DELAY   = 1 << 2;
        /// On a runqueue.
        const READY   = 1 << 3;
        /// Created but not started, or killed and not yet reaped.
        const DORMANT = 1 << 4;
        /// Terminal: cleanup ran, waiting to be reaped.
        const ZOMBIE  = 1 << 5;
        /// Has been started at least once.
        const STARTED = 1 << 6;
        /// Mirrored to a host task (shadow thread).
        const MAPPED  = 1 << 7;
        /// Currently running under the host scheduler (secondary mode).
        const RELAX   = 1 << 8;
        /// Being moved between CPUs.
        const MIGRATE = 1 << 9;
        /// Emergency-held.
        const HELD    = 1 << 10;
        /// Current priority is boosted above base by PIP.
        const BOOST   = 1 << 11;
        /// Scheduler lock held (non-preemptible by same/lower priority).
        const LOCK    = 1 << 12;
        /// Round-robin time-slicing enabled.
        const RRB     = 1 << 13;
        /// Thread has touched the FPU; context switch must save/restore it.
        const FPU     = 1 << 14;
        /// The per-CPU idle/root thread.
        const ROOT    = 1 << 15;
        /// Weak scheduling class: releases always revert to base priority.
        const WEAK    = 1 << 16;
        /// Attached to a personality as a user thread.
        const USER    = 1 << 17;
        /// Personality-private bits, opaque to the core.
        const SPARE0  = 1 << 28;
        const SPARE1  = 1 << 29;
        const SPARE2  = 1 << 30;
        const SPARE3  = 1 << 31;
    }
}

impl State {
    /// The block-set: a thread is runnable iff none of these bits is set.
    pub const BLOCK_SET: State = State::SUSPEND
        .union(State::PEND)
        .union(State::DELAY)
        .union(State::DORMANT)
        .union(State::RELAX)
        .union(State::MIGRATE)
        .union(State::HELD);

    #[inline]
    pub fn is_runnable(self) -> bool {
        !self.intersects(Self::BLOCK_SET)
    }
}

bitflags! {
    /// Transient info bits, cleared on acknowledgment by the thread that
    /// observes them.
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct Info: u32 {
        /// Blocking wait expired.
        const TIMEO   = 1 << 0;
        /// The resource being waited on was destroyed.
        const RMID    = 1 << 1;
        /// Forcibly awoken (e.g. `rel_wai`-style explicit unblock).
        const BREAK   = 1 << 2;
        /// Forced out of primary mode.
        const KICKED  = 1 << 3;
        /// Woken by an explicit wakeup (as opposed to timeout/break/rmid).
        const WAKEN   = 1 << 4;
        /// Lock ownership was transferred away from this thread.
        const ROBBED  = 1 << 5;
        /// Affinity was changed by another thread.
        const AFFSET  = 1 << 6;
        /// Cancellation was requested; honored at the next cancellation point.
        const CANCELD = 1 << 7;
        /// A mode switch was already reported to the relax tracer.
        const SWREP   = 1 << 8;
    }
}

/// Reason a blocking wait returned, replacing info-bit polling in the core's
/// own control flow with a sum type. The corresponding info bits are still
/// set on the thread for ABI observability through the user window.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SuspendReason {
    /// Woken normally (lock granted, explicit wakeup target).
    Normal,
    /// Timeout expired before the wait was satisfied.
    Timeo,
    /// The synch was destroyed while the thread was pending on it.
    Rmid,
    /// Forcibly awoken without acquiring anything.
    Break,
}

impl SuspendReason {
    /// The info bit this reason sets on the thread, if any (`Normal` sets none).
    #[inline]
    pub fn info_bit(self) -> Info {
        match self {
            SuspendReason::Normal => Info::empty(),
            SuspendReason::Timeo => Info::TIMEO,
            SuspendReason::Rmid => Info::RMID,
            SuspendReason::Break => Info::BREAK,
        }
    }
}

/// Lock-free, read-only window into a thread's status, updated by the core
/// on every state change and mapped into user space for personalities that
/// want to poll state without a syscall.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct UserWindow {
    pub state: u32,
    pub info: u32,
    /// Incremented on every update; lets a lock-free reader detect a torn read.
    pub grant_counter: u64,
}

impl UserWindow {
    pub const fn zeroed() -> Self {
        Self {
            state: 0,
            info: 0,
            grant_counter: 0,
        }
    }

    pub fn publish(&mut self, state: State, info: Info) {
        self.grant_counter = self.grant_counter.wrapping_add(1);
        self.state = state.bits();
        self.info = info.bits();
    }
}
