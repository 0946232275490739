//! Time-partitioned scheduling class (4.D). Each CPU owns a `schedule`: an
//! ordered list of `(offset, duration, partition_id)` windows recurring on
//! a global time-frame boundary. `partition_id == -1` is a gap window
//! during which no TP thread runs. Admission requires the windows to be
//! strictly contiguous.

use nucleus_abi::{Errno, KernelResult};

use crate::thread::ClassId;

use super::SchedClass;

/// Sentinel partition id meaning "gap": no TP thread is eligible.
pub const GAP_PARTITION: i32 = -1;

pub const MAX_WINDOWS: usize = 16;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Window {
    pub offset: u64,
    pub duration: u64,
    pub partition_id: i32,
}

pub struct TpClass;

impl SchedClass for TpClass {
    fn class_id(&self) -> ClassId {
        ClassId::Tp
    }
}

/// A CPU's TP schedule: a strictly contiguous sequence of windows that sum
/// to `period`, recurring every `period` ticks.
#[derive(Clone, Copy)]
pub struct Schedule {
    windows: [Window; MAX_WINDOWS],
    len: usize,
    period: u64,
}

impl Schedule {
    pub const fn empty() -> Self {
        Self {
            windows: [Window {
                offset: 0,
                duration: 0,
                partition_id: GAP_PARTITION,
            }; MAX_WINDOWS],
            len: 0,
            period: 0,
        }
    }

    /// `sched_setconfig_np`: validates strict contiguity (no overlap, no
    /// gap between declared windows; a gap must be declared explicitly
    /// with `GAP_PARTITION`) and installs the schedule.
    pub fn set_config(&mut self, windows: &[Window]) -> KernelResult<()> {
        if windows.is_empty() || windows.len() > MAX_WINDOWS {
            return Err(Errno::Einval);
        }
        let mut expected_offset = 0u64;
        for w in windows {
            if w.offset != expected_offset || w.duration == 0 {
                return Err(Errno::Einval);
            }
            expected_offset += w.duration;
        }
        self.len = windows.len();
        self.windows[..self.len].copy_from_slice(windows);
        self.period = expected_offset;
        Ok(())
    }

    /// `sched_getconfig`: the installed windows (window ids/durations are
    /// positional, so the returned slice is semantically equal to what was
    /// installed).
    pub fn get_config(&self) -> &[Window] {
        &self.windows[..self.len]
    }

    pub fn period(&self) -> u64 {
        self.period
    }

    /// The partition eligible at absolute tick `now`, by folding into the
    /// current time-frame via `now mod period`. Returns `GAP_PARTITION`
    /// before a schedule is installed.
    pub fn active_partition(&self, now: u64) -> i32 {
        if self.period == 0 {
            return GAP_PARTITION;
        }
        let phase = now % self.period;
        for w in &self.windows[..self.len] {
            if phase >= w.offset && phase < w.offset + w.duration {
                return w.partition_id;
            }
        }
        GAP_PARTITION
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nucleus_lib::testing::TestResult;
    use nucleus_lib::{fail, pass};

    fn s3_windows() -> [Window; 3] {
        [
            Window { offset: 0, duration: 20, partition_id: 0 },
            Window { offset: 20, duration: 30, partition_id: 1 },
            Window { offset: 50, duration: 50, partition_id: GAP_PARTITION },
        ]
    }

    fn test_s3_schedule_admits_and_reports_active_partition() -> TestResult {
        let mut schedule = Schedule::empty();
        if schedule.set_config(&s3_windows()).is_err() {
            return fail!("a strictly contiguous schedule should admit");
        }
        if schedule.period() != 100 {
            return fail!("period should be the sum of window durations");
        }
        if schedule.active_partition(10) != 0 {
            return fail!("partition A should be active during [0,20)");
        }
        if schedule.active_partition(20) != 1 {
            return fail!("partition B should be active during [20,50)");
        }
        if schedule.active_partition(49) != 1 {
            return fail!("partition B should still be active just before 50");
        }
        if schedule.active_partition(75) != GAP_PARTITION {
            return fail!("no TP thread should run during the gap window [50,100)");
        }
        if schedule.active_partition(120) != 0 {
            return fail!("the pattern should recur at the next period boundary");
        }
        pass!()
    }

    fn test_non_contiguous_schedule_is_rejected() -> TestResult {
        let mut schedule = Schedule::empty();
        let gappy = [
            Window { offset: 0, duration: 20, partition_id: 0 },
            Window { offset: 30, duration: 20, partition_id: 1 },
        ];
        match schedule.set_config(&gappy) {
            Err(Errno::Einval) => pass!(),
            _ => fail!("a schedule with an undeclared gap must be rejected"),
        }
    }

    fn test_get_config_round_trips_set_config() -> TestResult {
        let mut schedule = Schedule::empty();
        let windows = s3_windows();
        schedule.set_config(&windows).unwrap();
        if schedule.get_config() != windows.as_slice() {
            return fail!("getconfig after setconfig should be semantically equal");
        }
        pass!()
    }

    nucleus_lib::test_suite!(tp_suite, [
        test_s3_schedule_admits_and_reports_active_partition,
        test_non_contiguous_schedule_is_rejected,
        test_get_config_round_trips_set_config,
    ]);
}
