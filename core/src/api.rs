//! External interfaces (§6): the host-task API the core publishes, and
//! the personality registry that multiplexes syscalls from attached
//! personalities onto it.

use nucleus_abi::{CpuId, Errno, KernelResult, MuxId, SynchId, ThreadId};

use crate::thread::ClassId;

/// Parameters for creating a real-time thread, the host-facing surface
/// over [`crate::thread::ThreadTable::init`].
#[derive(Clone, Copy, Debug)]
pub struct CreateParams {
    pub class: ClassId,
    pub base_prio: u16,
    pub cpu: CpuId,
}

/// Host-task API (6): syscall entry points the core exposes to whatever
/// personality is attached to the calling host task.
pub trait HostSyscalls {
    fn create(&mut self, params: CreateParams) -> KernelResult<ThreadId>;
    fn start(&mut self, thread: ThreadId, entry_cookie: u64) -> KernelResult<()>;
    fn delete(&mut self, thread: ThreadId) -> KernelResult<()>;
    fn sleep(&mut self, thread: ThreadId, deadline: Option<u64>) -> KernelResult<()>;
    fn setsched(&mut self, thread: ThreadId, base_prio: u16) -> KernelResult<()>;

    fn synch_acquire(&mut self, synch: SynchId, thread: ThreadId, deadline: Option<u64>) -> KernelResult<()>;
    fn synch_release(&mut self, synch: SynchId, thread: ThreadId) -> KernelResult<()>;
    fn synch_broadcast(&mut self, synch: SynchId) -> KernelResult<usize>;
    fn synch_wait(&mut self, synch: SynchId, thread: ThreadId, deadline: Option<u64>) -> KernelResult<()>;

    /// Maps a page of core-owned memory (e.g. a fast-lock word) into the
    /// calling host task's address space. The core has no MM of its own;
    /// this simply records the intent for the host's MM to act on.
    fn map_memory(&mut self, thread: ThreadId, host_addr: u64, len: usize) -> KernelResult<()>;

    /// Maps the thread's [`nucleus_abi::UserWindow`] read-only into the
    /// calling host task, for lock-free status polling.
    fn map_user_window(&mut self, thread: ThreadId, host_addr: u64) -> KernelResult<()>;

    /// Hardens `thread` back into primary mode (see [`crate::shadow`]).
    fn harden(&mut self, thread: ThreadId) -> KernelResult<()>;
}

/// A registered personality's system call table entry.
#[derive(Clone, Copy, Debug)]
pub struct SyscallEntry {
    pub handler: usize,
    pub mode_flags: u32,
}

/// A delete hook invoked when one of a personality's threads dies, by
/// function pointer since the core carries no closures.
pub type DeleteHook = fn(ThreadId);

const MAX_PERSONALITIES: usize = 8;
const MAX_SYSCALLS_PER_PERSONALITY: usize = 64;

struct Personality {
    name: [u8; 16],
    name_len: usize,
    magic: u32,
    systab: [SyscallEntry; MAX_SYSCALLS_PER_PERSONALITY],
    systab_len: usize,
    delete_hook: Option<DeleteHook>,
}

/// Fixed-capacity table of attached personalities (POSIX, VxWorks,
/// uITRON, VRTX, ...), each identified by a [`MuxId`] that forms the
/// upper bits of every syscall number it issues.
pub struct PersonalityRegistry {
    slots: [Option<Personality>; MAX_PERSONALITIES],
}

impl PersonalityRegistry {
    pub const fn new() -> Self {
        const EMPTY: Option<Personality> = None;
        Self {
            slots: [EMPTY; MAX_PERSONALITIES],
        }
    }

    /// `register_interface(name, magic, systab, ops)`: allocates a fresh
    /// `MuxId` and installs the personality's syscall table.
    pub fn register_interface(
        &mut self,
        name: &str,
        magic: u32,
        systab: &[SyscallEntry],
        delete_hook: Option<DeleteHook>,
    ) -> KernelResult<MuxId> {
        if systab.len() > MAX_SYSCALLS_PER_PERSONALITY {
            return Err(Errno::Einval);
        }
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                let mut name_buf = [0u8; 16];
                let name_bytes = name.as_bytes();
                let copy_len = name_bytes.len().min(16);
                name_buf[..copy_len].copy_from_slice(&name_bytes[..copy_len]);
                let mut table = [SyscallEntry { handler: 0, mode_flags: 0 }; MAX_SYSCALLS_PER_PERSONALITY];
                table[..systab.len()].copy_from_slice(systab);
                *slot = Some(Personality {
                    name: name_buf,
                    name_len: copy_len,
                    magic,
                    systab: table,
                    systab_len: systab.len(),
                    delete_hook,
                });
                return Ok(MuxId(idx as u16));
            }
        }
        Err(Errno::Enomem)
    }

    pub fn unregister(&mut self, mux: MuxId) -> KernelResult<()> {
        let slot = self
            .slots
            .get_mut(mux.0 as usize)
            .ok_or(Errno::Einval)?;
        if slot.is_none() {
            return Err(Errno::Esrch);
        }
        *slot = None;
        Ok(())
    }

    pub fn lookup(&self, mux: MuxId, syscall_index: usize) -> KernelResult<SyscallEntry> {
        let personality = self
            .slots
            .get(mux.0 as usize)
            .and_then(|s| s.as_ref())
            .ok_or(Errno::Esrch)?;
        personality
            .systab
            .get(syscall_index)
            .filter(|_| syscall_index < personality.systab_len)
            .copied()
            .ok_or(Errno::Enosys)
    }

    /// Invoked when one of `mux`'s threads dies, so the personality can
    /// run its own teardown (e.g. releasing POSIX-level resources).
    pub fn notify_thread_death(&self, mux: MuxId, thread: ThreadId) -> KernelResult<()> {
        let personality = self
            .slots
            .get(mux.0 as usize)
            .and_then(|s| s.as_ref())
            .ok_or(Errno::Esrch)?;
        if let Some(hook) = personality.delete_hook {
            hook(thread);
        }
        Ok(())
    }

    pub fn magic_of(&self, mux: MuxId) -> KernelResult<u32> {
        self.slots
            .get(mux.0 as usize)
            .and_then(|s| s.as_ref())
            .map(|p| p.magic)
            .ok_or(Errno::Esrch)
    }

    pub fn name_of(&self, mux: MuxId) -> KernelResult<&str> {
        let personality = self
            .slots
            .get(mux.0 as usize)
            .and_then(|s| s.as_ref())
            .ok_or(Errno::Esrch)?;
        core::str::from_utf8(&personality.name[..personality.name_len]).map_err(|_| Errno::Einval)
    }
}

impl Default for PersonalityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nucleus_lib::testing::TestResult;
    use nucleus_lib::{fail, pass};

    fn noop_delete_hook(_thread: ThreadId) {}

    fn test_register_then_lookup_roundtrips() -> TestResult {
        let mut registry = PersonalityRegistry::new();
        let systab = [SyscallEntry { handler: 0x1000, mode_flags: 0 }];
        let mux = match registry.register_interface("posix", 0xdead, &systab, Some(noop_delete_hook)) {
            Ok(m) => m,
            Err(_) => return fail!("registration should succeed"),
        };
        if registry.name_of(mux) != Ok("posix") {
            return fail!("name should round-trip");
        }
        if registry.magic_of(mux) != Ok(0xdead) {
            return fail!("magic should round-trip");
        }
        match registry.lookup(mux, 0) {
            Ok(entry) if entry.handler == 0x1000 => {}
            _ => return fail!("syscall table entry should round-trip"),
        }
        pass!()
    }

    fn test_lookup_out_of_range_returns_enosys() -> TestResult {
        let mut registry = PersonalityRegistry::new();
        let systab = [SyscallEntry { handler: 1, mode_flags: 0 }];
        let mux = registry.register_interface("tiny", 1, &systab, None).unwrap();
        match registry.lookup(mux, 5) {
            Err(Errno::Enosys) => pass!(),
            _ => fail!("an out-of-range syscall index should return ENOSYS"),
        }
    }

    fn test_unregister_then_lookup_fails() -> TestResult {
        let mut registry = PersonalityRegistry::new();
        let mux = registry.register_interface("x", 0, &[], None).unwrap();
        registry.unregister(mux).unwrap();
        match registry.lookup(mux, 0) {
            Err(Errno::Esrch) => pass!(),
            _ => fail!("a torn-down personality should no longer resolve syscalls"),
        }
    }

    nucleus_lib::test_suite!(api_suite, [
        test_register_then_lookup_roundtrips,
        test_lookup_out_of_range_returns_enosys,
        test_unregister_then_lookup_fails,
    ]);
}
