//! Fatal-invariant diagnostics: a corrupted runqueue, a claim-queue cycle,
//! or an impossible state-bit combination is a bug, not a recoverable
//! error. Log at `Error`, then panic.

use nucleus_lib::klog_error;

/// Logs `msg` at `Error` and panics. Call this only for conditions that can
/// never legitimately occur: a corrupted runqueue, a PIP claim-queue
/// cycle deeper than `MAX_THREADS`, or similar.
#[cold]
#[track_caller]
pub fn fatal(msg: &str) -> ! {
    klog_error!("FATAL: {}", msg);
    panic!("nucleus fatal: {}", msg);
}

/// Like `assert!`, but routes through [`fatal`] so the message is logged
/// through `klog` before the panic unwinds (there is no unwinding in this
/// `no_std` target, but the log line survives even when the panic handler
/// halts immediately).
#[macro_export]
macro_rules! kernel_assert {
    ($cond:expr, $msg:expr) => {
        if !($cond) {
            $crate::diag::fatal($msg);
        }
    };
}
