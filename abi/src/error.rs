//! Numeric error codes returned by every core entry point.
//!
//! The nucleus never throws: every fallible operation returns an `Errno` by
//! value, the same convention the rest of the workspace uses for its own
//! kernel-userland ABI errors.

use core::ffi::c_int;
use core::fmt;

macro_rules! impl_kernel_error {
    ($ty:ty, fallback: $fallback:ident, variants: { $($val:literal => $variant:ident),* $(,)? }) => {
        impl $ty {
            /// Convert to C-style integer for syscall returns.
            #[inline]
            pub fn as_c_int(self) -> c_int {
                self as c_int
            }

            /// Convert from C-style integer.
            #[inline]
            pub fn from_c_int(val: c_int) -> Self {
                match val {
                    $($val => Self::$variant,)*
                    _ => Self::$fallback,
                }
            }

            /// Check if this is a success result.
            #[inline]
            pub fn is_success(self) -> bool {
                matches!(self, Self::Success)
            }

            /// Check if this is an error result.
            #[inline]
            pub fn is_error(self) -> bool {
                !self.is_success()
            }
        }
    };
}

/// Numeric error code, modeled on POSIX errno values.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Errno {
    #[default]
    Success = 0,
    /// Bad priority, bad class parameters, ill-formed TP schedule, wrong handle type.
    Einval = -1,
    /// Value out of representable range.
    Erange = -2,
    /// Wrong stage, or CPU-local invariant violated from the wrong CPU.
    Eperm = -3,
    /// Stale handle or destroyed resource.
    Esrch = -4,
    /// Bad file-like descriptor (muxid, fast-lock word).
    Ebadf = -5,
    /// No such entry (class, partition, personality).
    Enoent = -6,
    /// Destroying a still-owned synch, or reconfiguring a running schedule.
    Ebusy = -7,
    /// Blocking wait expired.
    Etimedout = -8,
    /// Blocking wait was interrupted (cancellation arrived concurrently).
    Eintr = -9,
    /// The resource being waited on was destroyed underneath the caller.
    Eidrm = -10,
    /// TCB, class-private block, fast-lock word, or wheel slot exhausted.
    Enomem = -11,
    /// Transient resource exhaustion; retry may succeed.
    Eagain = -12,
    /// No interrupt pipeline backend registered.
    Enodev = -13,
    /// Requested facility not implemented (e.g. virqs exhausted).
    Enosys = -14,
}

impl_kernel_error!(Errno, fallback: Einval, variants: {
    0 => Success,
    -1 => Einval,
    -2 => Erange,
    -3 => Eperm,
    -4 => Esrch,
    -5 => Ebadf,
    -6 => Enoent,
    -7 => Ebusy,
    -8 => Etimedout,
    -9 => Eintr,
    -10 => Eidrm,
    -11 => Enomem,
    -12 => Eagain,
    -13 => Enodev,
    -14 => Enosys,
});

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Errno::Success => "success",
            Errno::Einval => "invalid argument",
            Errno::Erange => "out of range",
            Errno::Eperm => "operation not permitted",
            Errno::Esrch => "no such thread",
            Errno::Ebadf => "bad handle",
            Errno::Enoent => "no such entry",
            Errno::Ebusy => "resource busy",
            Errno::Etimedout => "timed out",
            Errno::Eintr => "interrupted",
            Errno::Eidrm => "identifier removed",
            Errno::Enomem => "out of memory",
            Errno::Eagain => "try again",
            Errno::Enodev => "no such device",
            Errno::Enosys => "not implemented",
        };
        f.write_str(name)
    }
}

/// Result alias used throughout the nucleus: every fallible operation
/// returns `KernelResult<T>` instead of panicking.
pub type KernelResult<T> = Result<T, Errno>;
