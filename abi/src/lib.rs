//! Cross-crate ABI types for the nucleus core.
//!
//! Having a single, dependency-free source of truth for error codes, thread
//! state bits, and cross-crate handles eliminates ABI mismatches between the
//! core and whatever personality or host-task layer sits above it.
//!
//! All ABI-facing types here are `#[repr(C)]` or `#[repr(transparent)]`
//! where layout stability matters (the user window, state bitmasks).

#![no_std]
#![forbid(unsafe_code)]

pub mod error;
pub mod host_api;
pub mod state;

pub use error::{Errno, KernelResult};
pub use host_api::{CpuId, MuxId, PersonalityCookie, SynchId, ThreadId};
pub use state::{Info, State, SuspendReason, UserWindow};
