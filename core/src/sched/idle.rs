//! Root/idle scheduling class (4.D): weight 0, the permanent per-CPU
//! thread that `pick` falls back to when nothing else is runnable. It is
//! where `RELAX` transitions park the real-time persona while the host
//! runs.

use nucleus_abi::{CpuId, KernelResult, ThreadId};

use crate::thread::{ClassId, ThreadTable};

use super::SchedClass;

pub struct IdleClass;

impl SchedClass for IdleClass {
    fn class_id(&self) -> ClassId {
        ClassId::Idle
    }
}

/// Creates and starts the permanent idle thread for `cpu`, marking it
/// `ROOT` so the rest of the core can recognize it (e.g. to exclude it
/// from join/cancellation bookkeeping).
pub fn create_idle_thread(threads: &mut ThreadTable, cpu: CpuId) -> KernelResult<ThreadId> {
    let id = threads.init(ClassId::Idle, 0, cpu)?;
    threads.start(id)?;
    threads.get_mut(id)?.state.insert(nucleus_abi::State::ROOT);
    Ok(id)
}
