//! RT (FIFO/RR) scheduling class: priorities 0..N strictly honored, FIFO
//! within a priority, optional round-robin time-slicing via `RRB`.

use crate::thread::ClassId;

use super::SchedClass;

pub struct RtClass;

impl SchedClass for RtClass {
    fn class_id(&self) -> ClassId {
        ClassId::Rt
    }
}
