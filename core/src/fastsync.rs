//! User-space fast path (component H): a single-word lock that is
//! acquired/released by an uncontended compare-and-swap in user space, and
//! traps into the sleep-queue core only on contention.

use core::sync::atomic::{AtomicU32, Ordering};

use nucleus_abi::{Errno, KernelResult, ThreadId};

/// Sentinel meaning "free": no thread holds the lock.
pub const NO_HANDLE: u32 = 0;

/// Set on the high bit of the word by whoever fails the uncontended CAS,
/// so the owner knows to call `release` (the slow path) instead of just
/// CAS-ing the word back to `NO_HANDLE`.
const CONTENDED_BIT: u32 = 1 << 31;
const HANDLE_MASK: u32 = !CONTENDED_BIT;

/// Encodes a `ThreadId` as a fast-lock handle. `ThreadId(0)` is a valid
/// thread, so handles are offset by one; `NO_HANDLE` stays reserved for
/// "free".
fn encode(thread: ThreadId) -> u32 {
    (thread.0 + 1) & HANDLE_MASK
}

fn decode(word: u32) -> Option<ThreadId> {
    let handle = word & HANDLE_MASK;
    if handle == NO_HANDLE {
        None
    } else {
        Some(ThreadId(handle - 1))
    }
}

/// A fast-lock word, normally embedded in a page shared with user space.
/// The core never trusts it blindly: `release` always verifies the
/// current owner handle matches the caller.
#[repr(transparent)]
pub struct FastLock(AtomicU32);

impl FastLock {
    pub const fn new() -> Self {
        Self(AtomicU32::new(NO_HANDLE))
    }

    /// Attempts the uncontended path: CAS `NO_HANDLE` to `thread`'s
    /// handle. Returns `true` on success; `false` means the caller must
    /// fall back to `Synch::acquire`.
    pub fn try_acquire(&self, thread: ThreadId) -> bool {
        self.0
            .compare_exchange(NO_HANDLE, encode(thread), Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Marks the word contended, so the eventual releaser knows to wake a
    /// sleeper rather than just clearing the word.
    pub fn mark_contended(&self) {
        self.0.fetch_or(CONTENDED_BIT, Ordering::Relaxed);
    }

    pub fn is_contended(&self) -> bool {
        self.0.load(Ordering::Relaxed) & CONTENDED_BIT != 0
    }

    pub fn owner(&self) -> Option<ThreadId> {
        decode(self.0.load(Ordering::Relaxed))
    }

    /// Uncontended release: CAS the caller's own handle back to
    /// `NO_HANDLE`. Fails with `EPERM` if the word does not currently name
    /// the caller, or if it is contended (the slow-path `release` must run
    /// so the next waiter is picked).
    pub fn try_release(&self, thread: ThreadId) -> KernelResult<()> {
        let current = self.0.load(Ordering::Relaxed);
        if current & CONTENDED_BIT != 0 {
            return Err(Errno::Ebusy);
        }
        if decode(current) != Some(thread) {
            return Err(Errno::Eperm);
        }
        self.0
            .compare_exchange(current, NO_HANDLE, Ordering::Release, Ordering::Relaxed)
            .map(|_| ())
            .map_err(|_| Errno::Eagain)
    }

    /// Slow-path release after contention: unconditionally hands the word
    /// to `next_owner` (or frees it if `None`), clearing the contended
    /// bit. Called by `Synch::release` once it has picked the next waiter.
    pub fn transfer(&self, next_owner: Option<ThreadId>) {
        let word = match next_owner {
            Some(thread) => encode(thread),
            None => NO_HANDLE,
        };
        self.0.store(word, Ordering::Release);
    }
}

impl Default for FastLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nucleus_lib::testing::TestResult;
    use nucleus_lib::{fail, pass};

    fn test_uncontended_acquire_then_release_round_trips() -> TestResult {
        let lock = FastLock::new();
        let t = ThreadId(3);
        if !lock.try_acquire(t) {
            return fail!("acquiring a free lock should succeed");
        }
        if lock.owner() != Some(t) {
            return fail!("owner should be the acquiring thread");
        }
        if lock.try_release(t).is_err() {
            return fail!("owner should be able to release");
        }
        if lock.owner().is_some() {
            return fail!("lock should be free after release");
        }
        pass!()
    }

    fn test_second_acquire_fails_until_released() -> TestResult {
        let lock = FastLock::new();
        let first = ThreadId(1);
        let second = ThreadId(2);
        if !lock.try_acquire(first) {
            return fail!("first acquire should succeed");
        }
        if lock.try_acquire(second) {
            return fail!("second acquire on a held lock should fail");
        }
        pass!()
    }

    fn test_release_by_non_owner_is_rejected() -> TestResult {
        let lock = FastLock::new();
        let owner = ThreadId(5);
        let impostor = ThreadId(6);
        lock.try_acquire(owner);
        match lock.try_release(impostor) {
            Err(Errno::Eperm) => pass!(),
            _ => fail!("releasing a lock you don't own must fail"),
        }
    }

    fn test_contended_release_requires_slow_path() -> TestResult {
        let lock = FastLock::new();
        let owner = ThreadId(1);
        lock.try_acquire(owner);
        lock.mark_contended();
        match lock.try_release(owner) {
            Err(Errno::Ebusy) => {}
            _ => return fail!("contended lock must not be released by fast path"),
        }
        lock.transfer(Some(ThreadId(2)));
        if lock.owner() != Some(ThreadId(2)) {
            return fail!("transfer should hand the lock to the next owner");
        }
        if lock.is_contended() {
            return fail!("transfer should clear the contended bit");
        }
        pass!()
    }

    nucleus_lib::test_suite!(fastsync_suite, [
        test_uncontended_acquire_then_release_round_trips,
        test_second_acquire_fails_until_released,
        test_release_by_non_owner_is_rejected,
        test_contended_release_requires_slow_path,
    ]);
}
