//! Interrupt-pipeline contract (component A). The core never talks to
//! hardware directly: every IRQ-domain operation goes through a `Pipeline`
//! implementation the host wires in at boot. A [`SoftwarePipeline`] test
//! backend models stall bits and an offer/propagate queue without any real
//! hardware so the rest of the core can be exercised head-to-tail without
//! booting silicon.

use nucleus_abi::{CpuId, Errno, KernelResult};
use nucleus_lib::MAX_CPUS;

/// Maximum number of virtual IRQ numbers a pipeline backend can allocate,
/// including the core's own escalation virq.
pub const MAX_VIRQS: usize = 16;

/// A two-stage interrupt domain: `Head` is the real-time domain, `Root` is
/// the host.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Domain {
    Head,
    Root,
}

/// Per-CPU stall state for both domains. An incoming hardware IRQ is
/// offered to the head stage first; if its handler calls `propagate`, the
/// IRQ moves to the root stage on the next unstall.
#[derive(Clone, Copy, Default, Debug)]
pub struct StallBits {
    head_stalled: bool,
    root_stalled: bool,
}

impl StallBits {
    pub const fn new() -> Self {
        Self {
            head_stalled: false,
            root_stalled: false,
        }
    }

    #[inline]
    pub fn is_stalled(&self, domain: Domain) -> bool {
        match domain {
            Domain::Head => self.head_stalled,
            Domain::Root => self.root_stalled,
        }
    }
}

/// Reason the core asks a pipeline backend to re-enter it from a non-head
/// context, delivered through `catch_event`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CatchEvent {
    Syscall,
    Setsched,
    Sigwake,
    Schedule,
    Exit,
    Trap,
}

/// The interrupt-pipeline contract the core consumes. Implemented once by
/// the host's architecture backend; the core never assumes a concrete
/// backend beyond this trait.
pub trait Pipeline {
    /// Install a handler + ack function for `irq` in `domain`. Returns
    /// `Ok(())` once installed; the handler itself is represented outside
    /// this trait (the core registers its own dispatch entry point).
    fn virtualize_irq(&mut self, domain: Domain, irq: u32) -> KernelResult<()>;

    /// Trigger a virtual IRQ immediately.
    fn trigger_irq(&mut self, virq: u32) -> KernelResult<()>;

    /// Let a head-stage handler hand the IRQ to the root stage on next
    /// unstall.
    fn propagate_irq(&mut self, irq: u32) -> KernelResult<()>;

    /// Allocate a fresh virtual IRQ number. Fails with `Enosys` once
    /// `MAX_VIRQS` are in use.
    fn alloc_virq(&mut self) -> KernelResult<u32>;

    fn free_virq(&mut self, virq: u32) -> KernelResult<()>;

    fn stall_head(&mut self, cpu: CpuId) -> bool;
    fn unstall_head(&mut self, cpu: CpuId);
    fn stall_root(&mut self, cpu: CpuId) -> bool;
    fn unstall_root(&mut self, cpu: CpuId);

    /// Perform the hardware half of a context switch (load the new stack
    /// pointer / instruction pointer). The core calls this once it has
    /// already saved/restored the architectural register image.
    fn switch_context_hw(&mut self, cpu: CpuId);

    /// Register the core's handler for one of the catch-event classes.
    fn catch_event(&mut self, domain: Domain, event: CatchEvent) -> KernelResult<()>;
}

/// A single slot in the software pipeline's pending-IRQ queue.
#[derive(Clone, Copy, Default, Debug)]
struct PendingIrq {
    irq: u32,
    propagated: bool,
}

const MAX_PENDING: usize = 32;

/// In-crate test backend: no hardware, just stall-bit bookkeeping and a
/// ring of offered/propagated IRQs. Not `#[cfg(test)]`-gated itself so
/// boot-time self-tests linked into a real kernel image can reuse it too.
pub struct SoftwarePipeline {
    stall: [StallBits; MAX_CPUS],
    next_virq: u32,
    freed_virqs: [bool; MAX_VIRQS],
    pending: [PendingIrq; MAX_PENDING],
    pending_len: usize,
    escalation_virq: Option<u32>,
}

impl SoftwarePipeline {
    /// Construct a backend and allocate the escalation virq the core needs
    /// to re-enter the real-time scheduler from a non-head context. Fails
    /// with `Enosys` only if `MAX_VIRQS == 0`, which never happens here.
    pub fn new() -> KernelResult<Self> {
        let mut pipeline = Self {
            stall: [StallBits::new(); MAX_CPUS],
            next_virq: 0,
            freed_virqs: [false; MAX_VIRQS],
            pending: [PendingIrq::default(); MAX_PENDING],
            pending_len: 0,
            escalation_virq: None,
        };
        let virq = pipeline.alloc_virq()?;
        pipeline.escalation_virq = Some(virq);
        Ok(pipeline)
    }

    pub fn escalation_virq(&self) -> u32 {
        self.escalation_virq.expect("escalation virq not allocated")
    }

    pub fn offer(&mut self, irq: u32) {
        if self.pending_len < MAX_PENDING {
            self.pending[self.pending_len] = PendingIrq {
                irq,
                propagated: false,
            };
            self.pending_len += 1;
        }
    }

    /// Drains IRQs that a head-stage handler propagated, in FIFO order.
    pub fn drain_propagated(&mut self) -> usize {
        let mut count = 0;
        let mut write = 0;
        for read in 0..self.pending_len {
            if self.pending[read].propagated {
                count += 1;
            } else {
                self.pending[write] = self.pending[read];
                write += 1;
            }
        }
        self.pending_len = write;
        count
    }
}

impl Pipeline for SoftwarePipeline {
    fn virtualize_irq(&mut self, _domain: Domain, _irq: u32) -> KernelResult<()> {
        Ok(())
    }

    fn trigger_irq(&mut self, virq: u32) -> KernelResult<()> {
        self.offer(virq);
        Ok(())
    }

    fn propagate_irq(&mut self, irq: u32) -> KernelResult<()> {
        for slot in self.pending[..self.pending_len].iter_mut() {
            if slot.irq == irq {
                slot.propagated = true;
                return Ok(());
            }
        }
        Err(Errno::Esrch)
    }

    fn alloc_virq(&mut self) -> KernelResult<u32> {
        for (idx, freed) in self.freed_virqs.iter_mut().enumerate() {
            if *freed {
                *freed = false;
                return Ok(idx as u32);
            }
        }
        if self.next_virq as usize >= MAX_VIRQS {
            return Err(Errno::Enosys);
        }
        let virq = self.next_virq;
        self.next_virq += 1;
        Ok(virq)
    }

    fn free_virq(&mut self, virq: u32) -> KernelResult<()> {
        let idx = virq as usize;
        if idx >= MAX_VIRQS {
            return Err(Errno::Einval);
        }
        self.freed_virqs[idx] = true;
        Ok(())
    }

    fn stall_head(&mut self, cpu: CpuId) -> bool {
        let bits = &mut self.stall[cpu.0 as usize];
        let was = bits.head_stalled;
        bits.head_stalled = true;
        was
    }

    fn unstall_head(&mut self, cpu: CpuId) {
        self.stall[cpu.0 as usize].head_stalled = false;
    }

    fn stall_root(&mut self, cpu: CpuId) -> bool {
        let bits = &mut self.stall[cpu.0 as usize];
        let was = bits.root_stalled;
        bits.root_stalled = true;
        was
    }

    fn unstall_root(&mut self, cpu: CpuId) {
        self.stall[cpu.0 as usize].root_stalled = false;
    }

    fn switch_context_hw(&mut self, _cpu: CpuId) {}

    fn catch_event(&mut self, _domain: Domain, _event: CatchEvent) -> KernelResult<()> {
        Ok(())
    }
}
