//! Copy-on-write fault handler.
//!
//! Runs on the env's exception stack, called through the fault upcall. A
//! write to a COW page is resolved by copying the page into a fresh frame
//! staged at `PFTEMP`, then moving that frame over the faulting page. The
//! faulting address never shows a half-copied page.
//!
//! Only this env's mapping changes. Other envs sharing the old frame keep it,
//! still COW, and fault on their own.

use exo_types::VirtAddr;

use crate::env::EnvId;
use crate::kernel::{FaultFrame, UserEnv};
use crate::layout::{round_down, PFTEMP};
use crate::pte::PteFlags;

/// Resolve a write fault on a COW page; abort the env on any other fault.
pub fn pgfault<K: UserEnv>(kernel: &K, frame: &FaultFrame) {
    let addr = frame.fault_va;

    if !frame.err.is_write() {
        fatal!(
            "pgfault: denied read at {}: err {:#x}, env {}",
            addr,
            frame.err.bits(),
            kernel.getenvid()
        );
    }

    if !kernel.pte_at(addr).is_cow() {
        fatal!(
            "pgfault: denied copy-on-write at {}: page is not COW, env {}",
            addr,
            kernel.getenvid()
        );
    }

    let page = round_down(addr);
    let tmp = VirtAddr::new(PFTEMP);

    if let Err(e) = kernel.page_alloc(EnvId::SELF, tmp, PteFlags::USER_RW) {
        fatal!("pgfault: page_alloc at {} for {}: {}", tmp, addr, e);
    }

    kernel.copy_page(tmp, page);

    // Replaces the shared mapping in one step; our reference to the old
    // frame goes with it.
    if let Err(e) = kernel.page_map(EnvId::SELF, tmp, EnvId::SELF, page, PteFlags::USER_RW) {
        fatal!("pgfault: page_map {} -> {}: {}", tmp, page, e);
    }

    log::trace!("pgfault: private copy of {} for env {}", page, kernel.getenvid());
}
