//! Structured leveled logging facade ("klog") for the nucleus.
//!
//! Every core subsystem logs thread lifecycle transitions, PIP boost/drop
//! events, timer storms, and mode switches through this facade rather than
//! writing to the serial port directly, so the backend (serial today, a
//! ring buffer or host collector tomorrow) can change without touching
//! call sites.

use core::fmt::{self, Write};
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::io;

const COM1_BASE: u16 = 0x3f8;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum KlogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl KlogLevel {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => KlogLevel::Error,
            1 => KlogLevel::Warn,
            2 => KlogLevel::Info,
            3 => KlogLevel::Debug,
            _ => KlogLevel::Trace,
        }
    }
}

static CURRENT_LEVEL: AtomicU8 = AtomicU8::new(KlogLevel::Info as u8);
static SERIAL_READY: AtomicBool = AtomicBool::new(false);

#[inline]
pub fn klog_is_enabled(level: KlogLevel) -> bool {
    level as u8 <= CURRENT_LEVEL.load(Ordering::Relaxed)
}

#[inline]
pub fn klog_set_level(level: KlogLevel) {
    CURRENT_LEVEL.store(level as u8, Ordering::Relaxed);
}

#[inline]
pub fn klog_get_level() -> KlogLevel {
    KlogLevel::from_raw(CURRENT_LEVEL.load(Ordering::Relaxed))
}

/// Marks the serial port as ready for output. Before this is called, log
/// lines are dropped instead of buffered: nothing may log before
/// `klog_init` runs.
pub fn klog_attach_serial() {
    SERIAL_READY.store(true, Ordering::Relaxed);
}

pub fn klog_init() {
    CURRENT_LEVEL.store(KlogLevel::Info as u8, Ordering::Relaxed);
    SERIAL_READY.store(false, Ordering::Relaxed);
}

struct SerialWriter;

impl Write for SerialWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if SERIAL_READY.load(Ordering::Relaxed) {
            for &b in s.as_bytes() {
                unsafe { io::outb(COM1_BASE, b) };
            }
        }
        Ok(())
    }
}

const LEVEL_TAG: [&str; 5] = ["ERROR", "WARN ", "INFO ", "DEBUG", "TRACE"];

/// Writes one leveled log line. Call through `klog_error!`/`klog_info!`/etc;
/// direct use is for the macros only.
#[doc(hidden)]
pub fn klog_line(level: KlogLevel, args: fmt::Arguments<'_>) {
    if !klog_is_enabled(level) {
        return;
    }
    let mut w = SerialWriter;
    let _ = w.write_str("[");
    let _ = w.write_str(LEVEL_TAG[level as usize]);
    let _ = w.write_str("] ");
    let _ = w.write_fmt(args);
    let _ = w.write_str("\n");
}

#[macro_export]
macro_rules! klog_error {
    ($($arg:tt)*) => {
        $crate::klog::klog_line($crate::klog::KlogLevel::Error, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! klog_warn {
    ($($arg:tt)*) => {
        $crate::klog::klog_line($crate::klog::KlogLevel::Warn, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! klog_info {
    ($($arg:tt)*) => {
        $crate::klog::klog_line($crate::klog::KlogLevel::Info, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! klog_debug {
    ($($arg:tt)*) => {
        $crate::klog::klog_line($crate::klog::KlogLevel::Debug, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! klog_trace {
    ($($arg:tt)*) => {
        $crate::klog::klog_line($crate::klog::KlogLevel::Trace, format_args!($($arg)*))
    };
}
