//! # Simulated host kernel
//!
//! An in-memory exokernel with the same call contracts and checks as the
//! real one: reference-counted frames, per-env page tables, a read-only page
//! table mirror, an env table, and page fault delivery to the in-process
//! handler on the env's exception stack.
//!
//! [`SimKernel`] is the machine; [`SimEnv`] is one env's view of it and
//! implements [`ExoKernel`], [`PageTableMirror`] and [`UserMemory`]. User
//! accesses go through [`SimEnv::read`] and [`SimEnv::write`], which raise
//! faults exactly where the MMU would.
//!
//! `exofork` cannot return twice on a host thread. An env created by
//! `exofork` instead has a pending return: its own first `exofork` call
//! completes with [`Exofork::Child`], which is where a real child resumes.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use exo_types::{PageNum, Result, VirtAddr};
use spin::{Mutex, MutexGuard};

use crate::env::{EnvId, EnvRecord, EnvStatus};
use crate::kernel::{Exofork, ExoKernel, FaultFrame, PageTableMirror, PgfaultHandler, Upcall, UserMemory};
use crate::layout::PGSIZE;
use crate::pte::{Pte, PteFlags};

pub mod config;
pub mod console;
pub mod frames;
mod state;

pub use config::SimConfig;
pub use console::SimConsole;
pub use frames::FrameStats;
pub use state::{Syscall, FAULT_FRAME_SIZE, SIM_UPCALL_ENTRY};

use state::{AccessFault, SimState};

/// Why a user access did not complete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimError {
    /// The kernel killed the env instead of delivering the fault
    EnvDestroyed(EnvId),
    /// The handler returned but the access faulted again
    Unresolved(VirtAddr),
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimError::EnvDestroyed(id) => write!(f, "env {} destroyed", id),
            SimError::Unresolved(va) => write!(f, "fault at {} not resolved", va),
        }
    }
}

/// The simulated machine. Clones share the same state.
#[derive(Clone)]
pub struct SimKernel {
    state: Arc<Mutex<SimState>>,
}

impl SimKernel {
    pub fn new(config: SimConfig) -> Self {
        SimKernel {
            state: Arc::new(Mutex::new(SimState::new(config))),
        }
    }

    /// A runnable root env with no user pages and no fault handler
    pub fn spawn(&self) -> Result<SimEnv> {
        let id = self.lock().spawn()?;
        log::debug!("sim: spawned env {}", id);
        Ok(self.env(id))
    }

    /// Handle for running as env `id`
    pub fn env(&self, id: EnvId) -> SimEnv {
        SimEnv {
            kernel: self.clone(),
            id,
        }
    }

    /// Permissions of the page mapping `va` in `env`
    pub fn pte(&self, env: EnvId, va: VirtAddr) -> Option<PteFlags> {
        self.lock().mapping(env, va.page_number()).map(|m| m.perm)
    }

    /// Frame backing `va` in `env`
    pub fn frame_of(&self, env: EnvId, va: VirtAddr) -> Option<u32> {
        self.lock().mapping(env, va.page_number()).map(|m| m.frame)
    }

    /// Number of mappings of the frame backing `va` in `env`
    pub fn frame_refs(&self, env: EnvId, va: VirtAddr) -> usize {
        let state = self.lock();
        state
            .mapping(env, va.page_number())
            .map_or(0, |m| state.frames.ref_count(m.frame))
    }

    /// Kernel-side read, ignoring permissions. `None` if a page is unmapped.
    pub fn read(&self, env: EnvId, va: VirtAddr, len: usize) -> Option<Vec<u8>> {
        let state = self.lock();
        let mut out = Vec::with_capacity(len);
        while out.len() < len {
            let addr = va.checked_add(out.len())?;
            let n = (PGSIZE - addr.page_offset()).min(len - out.len());
            let mapping = state.mapping(env, addr.page_number())?;
            let data = state.frames.data(mapping.frame)?;
            out.extend_from_slice(&data[addr.page_offset()..addr.page_offset() + n]);
        }
        Some(out)
    }

    pub fn status(&self, env: EnvId) -> Option<EnvStatus> {
        self.lock().slot(env).map(|slot| slot.status)
    }

    /// Faults delivered to `env` so far
    pub fn faults(&self, env: EnvId) -> Option<usize> {
        self.lock().slot(env).map(|slot| slot.faults)
    }

    /// Present user pages of `env`, in address order
    pub fn mapped_pages(&self, env: EnvId) -> Vec<PageNum> {
        self.lock()
            .slot(env)
            .map(|slot| slot.pages.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn runnable_envs(&self) -> Vec<EnvId> {
        self.lock()
            .slots()
            .filter(|slot| slot.status == EnvStatus::Runnable)
            .map(|slot| slot.id)
            .collect()
    }

    pub fn frame_stats(&self) -> FrameStats {
        self.lock().frames.stats()
    }

    /// Make the next `call` fail with `code`
    pub fn fail_next(&self, call: Syscall, code: exo_types::ErrorCode) {
        self.lock().inject(call, code);
    }

    pub fn destroy(&self, env: EnvId) {
        self.lock().destroy(env);
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock()
    }
}

impl Default for SimKernel {
    fn default() -> Self {
        Self::new(SimConfig::default_config())
    }
}

/// One env's view of the machine
#[derive(Clone)]
pub struct SimEnv {
    kernel: SimKernel,
    id: EnvId,
}

impl fmt::Debug for SimEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimEnv").field("id", &self.id).finish()
    }
}

impl SimEnv {
    pub fn id(&self) -> EnvId {
        self.id
    }

    pub fn kernel(&self) -> &SimKernel {
        &self.kernel
    }

    /// Read user memory, taking faults like the MMU would
    pub fn read(&self, va: VirtAddr, buf: &mut [u8]) -> core::result::Result<(), SimError> {
        let id = self.id;
        self.access(va, buf.len(), |state, addr, range| {
            state.user_read(id, addr, &mut buf[range])
        })
    }

    /// Write user memory, taking faults like the MMU would
    pub fn write(&self, va: VirtAddr, bytes: &[u8]) -> core::result::Result<(), SimError> {
        let id = self.id;
        self.access(va, bytes.len(), |state, addr, range| {
            state.user_write(id, addr, &bytes[range])
        })
    }

    /// Run `op` page by page. A fault is delivered once per page; a second
    /// fault on the same page is reported as unresolved.
    fn access<F>(&self, va: VirtAddr, len: usize, mut op: F) -> core::result::Result<(), SimError>
    where
        F: FnMut(&mut SimState, VirtAddr, core::ops::Range<usize>) -> core::result::Result<(), AccessFault>,
    {
        let mut done = 0;
        while done < len {
            let addr = va.checked_add(done).ok_or(SimError::Unresolved(va))?;
            let n = (PGSIZE - addr.page_offset()).min(len - done);

            let mut faulted = false;
            loop {
                let outcome = {
                    let mut state = self.kernel.lock();
                    op(&mut *state, addr, done..done + n)
                };
                match outcome {
                    Ok(()) => break,
                    Err(AccessFault::NoEnv) => return Err(SimError::EnvDestroyed(self.id)),
                    Err(AccessFault::Fault(err)) => {
                        if faulted {
                            return Err(SimError::Unresolved(addr));
                        }
                        faulted = true;
                        self.deliver_fault(FaultFrame { fault_va: addr, err })?;
                    }
                }
            }

            done += n;
        }
        Ok(())
    }

    /// Push the fault onto the exception stack and run the handler, with
    /// the kernel unlocked.
    fn deliver_fault(&self, frame: FaultFrame) -> core::result::Result<(), SimError> {
        let handler = self.kernel.lock().begin_fault(self.id, &frame);
        match handler {
            Some(handler) => {
                handler(self, &frame);
                Ok(())
            }
            None => Err(SimError::EnvDestroyed(self.id)),
        }
    }
}

impl ExoKernel for SimEnv {
    fn getenvid(&self) -> EnvId {
        self.id
    }

    fn exofork(&self) -> Result<Exofork> {
        self.kernel.lock().exofork(self.id)
    }

    fn page_alloc(&self, env: EnvId, va: VirtAddr, perm: PteFlags) -> Result<()> {
        self.kernel.lock().page_alloc(self.id, env, va, perm)
    }

    fn page_map(
        &self,
        src_env: EnvId,
        src_va: VirtAddr,
        dst_env: EnvId,
        dst_va: VirtAddr,
        perm: PteFlags,
    ) -> Result<()> {
        self.kernel
            .lock()
            .page_map(self.id, src_env, src_va, dst_env, dst_va, perm)
    }

    fn page_unmap(&self, env: EnvId, va: VirtAddr) -> Result<()> {
        self.kernel.lock().page_unmap(self.id, env, va)
    }

    fn env_set_pgfault_upcall(&self, env: EnvId, upcall: Upcall) -> Result<()> {
        self.kernel.lock().env_set_pgfault_upcall(self.id, env, upcall)
    }

    fn env_set_status(&self, env: EnvId, status: EnvStatus) -> Result<()> {
        self.kernel.lock().env_set_status(self.id, env, status)
    }

    fn set_pgfault_handler(&self, handler: PgfaultHandler<Self>) -> Result<()> {
        self.kernel.lock().set_pgfault_handler(self.id, handler)
    }

    fn env(&self, index: usize) -> Option<EnvRecord> {
        self.kernel.lock().record(index)
    }
}

impl PageTableMirror for SimEnv {
    fn vpd(&self, pdx: usize) -> Pte {
        if self.kernel.lock().pde_present(self.id, pdx) {
            Pte::new(0, PteFlags::USER_RW)
        } else {
            Pte::EMPTY
        }
    }

    fn vpt(&self, pn: PageNum) -> Pte {
        self.kernel
            .lock()
            .mapping(self.id, pn)
            .map_or(Pte::EMPTY, |m| Pte::new(m.frame, m.perm))
    }
}

impl UserMemory for SimEnv {
    /// A failing access here means the kernel killed the env.
    fn copy_page(&self, dst: VirtAddr, src: VirtAddr) {
        let mut page = [0u8; PGSIZE];
        if let Err(e) = self.read(src.page_base(), &mut page) {
            fatal!("copy_page: reading {} in env {}: {}", src, self.id, e);
        }
        if let Err(e) = self.write(dst.page_base(), &page) {
            fatal!("copy_page: writing {} in env {}: {}", dst, self.id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exo_types::ErrorCode;

    fn va(addr: usize) -> VirtAddr {
        VirtAddr::new(addr)
    }

    #[test]
    fn test_page_alloc_rejects_bad_perm() {
        let kernel = SimKernel::default();
        let env = kernel.spawn().unwrap();
        let err = env.page_alloc(EnvId::SELF, va(0x1000), PteFlags::PRESENT).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Inval);
        let err = env
            .page_alloc(EnvId::SELF, va(0x1000), PteFlags::USER_RW | PteFlags::ACCESSED)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Inval);
    }

    #[test]
    fn test_page_alloc_rejects_kernel_and_unaligned_addresses() {
        let kernel = SimKernel::default();
        let env = kernel.spawn().unwrap();
        assert!(env.page_alloc(EnvId::SELF, va(crate::layout::UTOP), PteFlags::USER_RW).is_err());
        assert!(env.page_alloc(EnvId::SELF, va(0x1004), PteFlags::USER_RW).is_err());
    }

    #[test]
    fn test_page_map_cannot_add_write_permission() {
        let kernel = SimKernel::default();
        let env = kernel.spawn().unwrap();
        let ro = PteFlags::PRESENT | PteFlags::USER;
        env.page_alloc(EnvId::SELF, va(0x1000), ro).unwrap();
        let err = env
            .page_map(EnvId::SELF, va(0x1000), EnvId::SELF, va(0x2000), PteFlags::USER_RW)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Inval);
    }

    #[test]
    fn test_unrelated_env_is_unreachable() {
        let kernel = SimKernel::default();
        let a = kernel.spawn().unwrap();
        let b = kernel.spawn().unwrap();
        let err = a.page_alloc(b.id(), va(0x1000), PteFlags::USER_RW).unwrap_err();
        assert_eq!(err.code(), ErrorCode::BadEnv);
    }

    #[test]
    fn test_exofork_returns_child_once() {
        let kernel = SimKernel::default();
        let parent = kernel.spawn().unwrap();
        let child = match parent.exofork().unwrap() {
            Exofork::Parent(child) => child,
            Exofork::Child => panic!("parent saw the child side"),
        };
        assert_eq!(kernel.status(child), Some(EnvStatus::NotRunnable));
        assert_eq!(kernel.env(child).exofork().unwrap(), Exofork::Child);
        assert!(matches!(kernel.env(child).exofork().unwrap(), Exofork::Parent(_)));
    }

    #[test]
    fn test_exofork_table_full() {
        let kernel = SimKernel::new(SimConfig::default_config().with_max_envs(1));
        let env = kernel.spawn().unwrap();
        assert_eq!(env.exofork().unwrap_err().code(), ErrorCode::NoFreeEnv);
    }

    #[test]
    fn test_read_fault_without_handler_destroys_env() {
        let kernel = SimKernel::default();
        let env = kernel.spawn().unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(env.read(va(0x1000), &mut buf), Err(SimError::EnvDestroyed(env.id())));
        assert_eq!(kernel.status(env.id()), None);
    }

    #[test]
    fn test_mirror_tracks_mappings() {
        let kernel = SimKernel::default();
        let env = kernel.spawn().unwrap();
        assert!(!env.vpd(2).is_present());
        env.page_alloc(EnvId::SELF, va(0x0080_0000), PteFlags::USER_RW).unwrap();
        assert!(env.vpd(2).is_present());
        let pte = env.vpt(va(0x0080_0000).page_number());
        assert!(pte.is_present() && pte.is_writable() && !pte.is_cow());
        assert_eq!(Some(pte.frame()), kernel.frame_of(env.id(), va(0x0080_0000)));
    }

    #[test]
    fn test_unmap_releases_frame() {
        let kernel = SimKernel::default();
        let env = kernel.spawn().unwrap();
        env.page_alloc(EnvId::SELF, va(0x1000), PteFlags::USER_RW).unwrap();
        env.page_unmap(EnvId::SELF, va(0x1000)).unwrap();
        env.page_unmap(EnvId::SELF, va(0x1000)).unwrap();
        assert_eq!(kernel.frame_stats().in_use, 0);
    }

    #[test]
    fn test_injected_failure_is_one_shot() {
        let kernel = SimKernel::default();
        let env = kernel.spawn().unwrap();
        kernel.fail_next(Syscall::PageAlloc, ErrorCode::NoMem);
        assert_eq!(
            env.page_alloc(EnvId::SELF, va(0x1000), PteFlags::USER_RW).unwrap_err().code(),
            ErrorCode::NoMem
        );
        assert!(env.page_alloc(EnvId::SELF, va(0x1000), PteFlags::USER_RW).is_ok());
    }
}
