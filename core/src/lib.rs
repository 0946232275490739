//! The real-time nucleus: interrupt pipeline contract, tickless timer wheel,
//! sleep-queue core with priority inheritance, multi-class per-CPU scheduler,
//! thread objects, shadow/bi-mode threads, and the fastsync user-space fast
//! path. No personality (POSIX/VxWorks/uITRON/VRTX), driver model, or
//! network stack is implemented here; those are external clients of the
//! contracts this crate exposes.

#![no_std]

pub mod api;
pub mod arch;
pub mod config;
pub mod context;
pub mod diag;
pub mod fastsync;
pub mod pipeline;
pub mod sched;
pub mod shadow;
pub mod sync;
pub mod thread;
pub mod timer;

pub use nucleus_abi as abi;
pub use abi::{Errno, KernelResult};
pub use config::CoreConfig;
pub use context::CoreContext;
