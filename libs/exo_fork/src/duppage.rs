//! Share one page copy-on-write between the caller and a child.

use core::fmt;

use exo_types::PageNum;

use crate::env::EnvId;
use crate::kernel::UserEnv;
use crate::layout::UTOP;
use crate::pte::PteFlags;

/// The page is not mapped; the walk skips it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageNotPresent(pub PageNum);

impl fmt::Display for PageNotPresent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} not present", self.0)
    }
}

/// Map page `pn` into `child` at the same address, copy-on-write, then remap
/// it copy-on-write in the caller too.
///
/// The caller's remap is needed even when the page already was COW: the
/// frame has one more owner now, and a writable mapping left on our side
/// would write straight into the child's copy.
///
/// Panics if `pn` is at or above `UTOP` or not user-accessible.
pub fn duppage<K: UserEnv>(kernel: &K, child: EnvId, pn: PageNum) -> Result<(), PageNotPresent> {
    let va = pn.base();
    let pte = kernel.pte(pn);

    if !pte.is_present() {
        return Err(PageNotPresent(pn));
    }

    if va.as_usize() >= UTOP {
        fatal!("duppage: {} ({}) above UTOP", pn, va);
    }

    if !pte.is_user() {
        fatal!("duppage: {} ({}) is not user accessible", pn, va);
    }

    if let Err(e) = kernel.page_map(EnvId::SELF, va, child, va, PteFlags::COW_SHARED) {
        fatal!("duppage: page_map {} into env {}: {}", va, child, e);
    }

    if let Err(e) = kernel.page_map(EnvId::SELF, va, EnvId::SELF, va, PteFlags::COW_SHARED) {
        fatal!("duppage: page_map {} onto itself: {}", va, e);
    }

    if kernel.pte(pn).is_cow_and_writable() {
        fatal!("duppage: {} ({}) left both WRITABLE and COW", pn, va);
    }

    Ok(())
}
