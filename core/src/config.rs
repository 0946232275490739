//! Boot-time configuration. No persisted configuration format exists; every
//! value here is constructed once at boot and carried in the `CoreContext`.

/// Default round-robin quantum, in TSC ticks, used when a thread enables
/// `RRB` without an explicit slice.
pub const DEFAULT_RR_QUANTUM_TICKS: u64 = 10_000_000;

/// Boot parameters affecting the core.
#[derive(Clone, Copy, Debug)]
pub struct CoreConfig {
    /// Per-CPU tick frequency in Hz; 0 means tickless/aperiodic.
    pub tick_hz: u32,
    /// Default round-robin quantum in TSC ticks.
    pub rr_quantum_ticks: u64,
    /// Correction subtracted from a timer's programmed expiry to account
    /// for the measured cost of entering the scheduler, in TSC ticks.
    pub sched_latency: u64,
    /// Correction subtracted from a timer's programmed expiry to account
    /// for the measured cost of reprogramming hardware, in TSC ticks.
    pub timer_latency: u64,
}

impl CoreConfig {
    pub const fn tickless() -> Self {
        Self {
            tick_hz: 0,
            rr_quantum_ticks: DEFAULT_RR_QUANTUM_TICKS,
            sched_latency: 0,
            timer_latency: 0,
        }
    }

    /// Combined correction applied when programming hardware for a timer.
    #[inline]
    pub fn reprogram_correction(&self) -> u64 {
        self.sched_latency + self.timer_latency
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self::tickless()
    }
}

/// Measures `sched_latency`/`timer_latency` and returns a `CoreConfig` with
/// them filled in. See `crate::timer::calibrate` for the measurement.
pub fn calibrate() -> CoreConfig {
    let (sched_latency, timer_latency) = crate::timer::calibrate();
    CoreConfig {
        tick_hz: 0,
        rr_quantum_ticks: DEFAULT_RR_QUANTUM_TICKS,
        sched_latency,
        timer_latency,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nucleus_lib::testing::TestResult;
    use nucleus_lib::{fail, pass};

    fn test_tickless_default_has_no_latency_correction() -> TestResult {
        let cfg = CoreConfig::tickless();
        if cfg.tick_hz != 0 {
            return fail!("expected tickless default");
        }
        if cfg.reprogram_correction() != 0 {
            return fail!("expected zero correction before calibration");
        }
        pass!()
    }

    fn test_calibrate_produces_nonzero_corrections() -> TestResult {
        let cfg = calibrate();
        if cfg.sched_latency == 0 || cfg.timer_latency == 0 {
            return fail!("calibrate() should measure a nonzero correction");
        }
        pass!()
    }

    nucleus_lib::test_suite!(config_suite, [
        test_tickless_default_has_no_latency_correction,
        test_calibrate_produces_nonzero_corrections,
    ]);
}
