//! Tickless timer wheel (component B): a per-CPU aperiodic master keyed
//! directly on the TSC, with an optional periodic cascade emulated above
//! it by one cascading aperiodic timer per CPU.

mod aperiodic;
mod periodic;

pub use aperiodic::{AperiodicMaster, TimerId, TimerStatus, MAX_TIMERS_PER_CPU};
pub use periodic::{PeriodicId, PeriodicWheel, WHEELSIZE};

use nucleus_lib::tsc::rdtsc;

/// A timer callback: invoked with the caller-supplied cookie. Kept as a
/// plain function pointer (no closures) since the nucleus has no heap to
/// box a capturing closure into.
pub type TimerHandler = fn(u64);

/// Number of calibration samples averaged by [`calibrate`].
const CALIBRATION_SAMPLES: u32 = 8;

/// Measures `sched_latency`/`timer_latency` against the TSC (or its
/// software stand-in off real x86_64) by timing a short empty loop,
/// mirroring the original's `nkschedlat`/`nktimerlat` boot-time
/// calibration. Returns `(sched_latency, timer_latency)` in TSC ticks.
pub fn calibrate() -> (u64, u64) {
    let mut total = 0u64;
    for _ in 0..CALIBRATION_SAMPLES {
        let start = rdtsc();
        core::hint::black_box(&start);
        let end = rdtsc();
        total += end.saturating_sub(start);
    }
    let avg = (total / CALIBRATION_SAMPLES as u64).max(1);
    (avg, avg)
}
