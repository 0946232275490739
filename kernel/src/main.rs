#![no_std]
#![no_main]
#![forbid(unsafe_op_in_unsafe_fn)]

use core::panic::PanicInfo;

use nucleus_abi::CpuId;
use nucleus_core::pipeline::SoftwarePipeline;
use nucleus_core::thread::ClassId;
use nucleus_core::CoreContext;
use nucleus_lib::cpu;
use nucleus_lib::panic_recovery;

/// Raw Limine base-revision request: asking for revision 1 of the boot
/// protocol, placed in the `.limine_requests` section the bootloader scans
/// before handing off. No other boot-info request is made here; this
/// nucleus has no mm/fs/video of its own, only the host that embeds
/// `nucleus-core` needs the memory map and framebuffer.
#[repr(C)]
struct LimineBaseRevision {
    revision: [u64; 3],
}

const LIMINE_BASE_REVISION_MAGIC: [u64; 3] = [
    0xf9562b2d5c95a6c8,
    0x6a7b384944536bdc,
    1,
];

impl LimineBaseRevision {
    const fn new() -> Self {
        Self {
            revision: LIMINE_BASE_REVISION_MAGIC,
        }
    }

    fn is_supported(&self) -> bool {
        self.revision[2] == 0
    }
}

unsafe impl Sync for LimineBaseRevision {}

#[used]
#[unsafe(link_section = ".limine_requests_start_marker")]
static LIMINE_REQUESTS_START_MARKER: [u64; 1] = [0];

#[used]
#[unsafe(link_section = ".limine_requests")]
static BASE_REVISION: LimineBaseRevision = LimineBaseRevision::new();

#[used]
#[unsafe(link_section = ".limine_requests_end_marker")]
static LIMINE_REQUESTS_END_MARKER: [u64; 1] = [0];

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    if panic_recovery::recovery_is_active() {
        nucleus_lib::klog_error!("recovered panic in test: {info}");
        unsafe {
            panic_recovery::test_longjmp(panic_recovery::get_recovery_buf(), 1);
        }
    }
    nucleus_lib::klog_error!("fatal: {info}");
    cpu::halt_loop();
}

/// Brings the nucleus up against a [`SoftwarePipeline`] backend: no real
/// interrupt controller, driver model, filesystem, or userland is wired in
/// here; those live outside this crate's scope (see the pipeline contract
/// in `nucleus_core::pipeline`). A host that needs them attaches its own
/// `Pipeline` implementation and personality instead.
#[unsafe(no_mangle)]
pub extern "C" fn _start() -> ! {
    assert!(BASE_REVISION.is_supported());

    nucleus_lib::klog_init();
    nucleus_lib::klog_attach_serial();
    nucleus_lib::klog_info!("nucleus core booting");

    let pipeline = SoftwarePipeline::new().expect("escalation virq allocation must not fail at boot");
    let ctx = CoreContext::new(pipeline);
    ctx.boot();

    let root = ctx
        .create_thread(ClassId::Rt, 50, CpuId(0))
        .expect("root real-time thread creation must not fail at boot");
    ctx.start_thread(root)
        .expect("starting the root thread must not fail at boot");

    nucleus_lib::klog_info!("nucleus core booted, entering idle loop");
    cpu::halt_loop()
}
