//! Weak scheduling class: runs only when no RT/sporadic/TP thread is
//! runnable. Releasing a lock always reverts a weak thread to base
//! priority, never a hidden accumulated boost, which `sync::release`
//! already enforces by checking `ClassId::Weak` directly.

use crate::thread::ClassId;

use super::SchedClass;

pub struct WeakClass;

impl SchedClass for WeakClass {
    fn class_id(&self) -> ClassId {
        ClassId::Weak
    }
}
