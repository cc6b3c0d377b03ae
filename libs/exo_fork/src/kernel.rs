//! Host-kernel call contracts.
//!
//! The exokernel exposes page-granularity mapping calls, env creation and a
//! read-only mirror of the caller's page tables. Nothing in this crate
//! touches kernel state any other way.

use exo_types::{PageNum, Result, VirtAddr};

use crate::env::{EnvId, EnvRecord, EnvStatus};
use crate::layout::{pdx, NPTENTRIES};
use crate::pte::{FaultErr, Pte, PteFlags};

/// Outcome of env creation, seen once by each side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exofork {
    /// Running in the creator; carries the new env's id
    Parent(EnvId),
    /// Running in the new env
    Child,
}

/// Fault-upcall entry point recorded in the env table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upcall(usize);

impl Upcall {
    pub const fn new(entry: usize) -> Self {
        Upcall(entry)
    }

    pub const fn entry(&self) -> usize {
        self.0
    }
}

/// Fault context handed to the in-process handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultFrame {
    pub fault_va: VirtAddr,
    pub err: FaultErr,
}

/// In-process page fault handler. Returning means "resolved, retry the
/// faulting access"; an unresolvable fault aborts the env.
pub type PgfaultHandler<K> = fn(&K, &FaultFrame);

/// Syscalls of the host kernel.
///
/// `EnvId::SELF` names the caller. Any other target must be the caller or one
/// of its direct children.
pub trait ExoKernel: Sized {
    /// Caller's own id
    fn getenvid(&self) -> EnvId;

    /// Create a non-runnable env with an empty user address space.
    ///
    /// Returns twice: `Parent(child)` in the caller, `Child` in the new env.
    fn exofork(&self) -> Result<Exofork>;

    /// Map a fresh zeroed page at `va` in `env`, replacing any existing mapping
    fn page_alloc(&self, env: EnvId, va: VirtAddr, perm: PteFlags) -> Result<()>;

    /// Share the frame mapped at `src_va` in `src_env` into `dst_env` at `dst_va`
    fn page_map(
        &self,
        src_env: EnvId,
        src_va: VirtAddr,
        dst_env: EnvId,
        dst_va: VirtAddr,
        perm: PteFlags,
    ) -> Result<()>;

    /// Remove the mapping at `va`; unmapping nothing is not an error
    fn page_unmap(&self, env: EnvId, va: VirtAddr) -> Result<()>;

    /// Entry point invoked on a user page fault in `env`
    fn env_set_pgfault_upcall(&self, env: EnvId, upcall: Upcall) -> Result<()>;

    /// Only `Runnable` and `NotRunnable` are accepted
    fn env_set_status(&self, env: EnvId, status: EnvStatus) -> Result<()>;

    /// Install `handler` as this process's page fault handler.
    ///
    /// The first registration also allocates the exception stack and sets the
    /// fault upcall; later ones only swap the handler.
    fn set_pgfault_handler(&self, handler: PgfaultHandler<Self>) -> Result<()>;

    /// Read-only env table slot
    fn env(&self, index: usize) -> Option<EnvRecord>;
}

/// Read-only mirror of the caller's own page directory and page tables
pub trait PageTableMirror {
    /// Page directory entry `pdx`
    fn vpd(&self, pdx: usize) -> Pte;

    /// Page table entry for page `pn`. Only meaningful when the covering
    /// directory entry is present.
    fn vpt(&self, pn: PageNum) -> Pte;

    /// Entry for `pn`, or `Pte::EMPTY` when its page table is absent
    fn pte(&self, pn: PageNum) -> Pte {
        if self.vpd(pn.as_usize() / NPTENTRIES).is_present() {
            self.vpt(pn)
        } else {
            Pte::EMPTY
        }
    }

    /// Entry mapping `va`
    fn pte_at(&self, va: VirtAddr) -> Pte {
        if self.vpd(pdx(va)).is_present() {
            self.vpt(va.page_number())
        } else {
            Pte::EMPTY
        }
    }
}

/// Access to the caller's own memory
pub trait UserMemory {
    /// Copy the page at `src` over the page at `dst`, with the caller's
    /// access rights: the write may fault and be resolved first.
    fn copy_page(&self, dst: VirtAddr, src: VirtAddr);
}

/// Everything the fork machinery needs from a running env
pub trait UserEnv: ExoKernel + PageTableMirror + UserMemory {}

impl<T: ExoKernel + PageTableMirror + UserMemory> UserEnv for T {}
