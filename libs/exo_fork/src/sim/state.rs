//! Kernel-side state of the simulated host and its syscall rules.
//!
//! Every method takes the calling env and follows the exokernel's checks:
//! targets must be the caller or a direct child, addresses page aligned and
//! below `UTOP`, permissions within `PteFlags::SYSCALL` and including
//! `PRESENT | USER`.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use exo_types::{ErrorCode, ExoError, PageNum, Result, VirtAddr};

use super::config::SimConfig;
use super::frames::FrameTable;
use super::SimEnv;
use crate::env::{envx, EnvId, EnvRecord, EnvStatus};
use crate::kernel::{Exofork, FaultFrame, PgfaultHandler, Upcall};
use crate::layout::{uxstack_base, NPTENTRIES, PGSIZE, UTOP};
use crate::pte::{FaultErr, PteFlags};

/// Host calls that can be made to fail on purpose
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Exofork,
    PageAlloc,
    PageMap,
    PageUnmap,
    EnvSetStatus,
    EnvSetPgfaultUpcall,
}

/// Entry point recorded when a handler is first registered
pub const SIM_UPCALL_ENTRY: usize = 0x0080_0020;

#[derive(Debug, Clone, Copy)]
pub(crate) struct Mapping {
    pub frame: u32,
    pub perm: PteFlags,
}

pub(crate) struct EnvSlot {
    pub id: EnvId,
    pub parent: EnvId,
    pub status: EnvStatus,
    pub upcall: Option<Upcall>,
    /// In-process handler slot; lives in the env's own memory
    pub handler: Option<PgfaultHandler<SimEnv>>,
    pub pages: BTreeMap<PageNum, Mapping>,
    /// Created by exofork, has not returned from it yet
    pub exofork_pending: bool,
    pub faults: usize,
}

impl EnvSlot {
    pub fn record(&self) -> EnvRecord {
        EnvRecord {
            env_id: self.id,
            parent_id: self.parent,
            status: self.status,
            pgfault_upcall: self.upcall,
        }
    }
}

/// Where a user access stopped
pub(crate) enum AccessFault {
    Fault(FaultErr),
    NoEnv,
}

pub(crate) struct SimState {
    envs: Vec<Option<EnvSlot>>,
    generations: Vec<u32>,
    pub frames: FrameTable,
    injected: Vec<(Syscall, ErrorCode)>,
}

fn inval(msg: &'static str) -> ExoError {
    ExoError::with_message(ErrorCode::Inval, msg)
}

impl SimState {
    pub fn new(config: SimConfig) -> Self {
        let mut envs = Vec::with_capacity(config.max_envs);
        envs.resize_with(config.max_envs, || None);
        SimState {
            envs,
            generations: alloc::vec![0; config.max_envs],
            frames: FrameTable::new(config.max_frames),
            injected: Vec::new(),
        }
    }

    // ── Env table ───────────────────────────────────────────────────────────

    pub fn slot(&self, id: EnvId) -> Option<&EnvSlot> {
        self.envs
            .get(envx(id))
            .and_then(Option::as_ref)
            .filter(|slot| slot.id == id)
    }

    pub fn slot_mut(&mut self, id: EnvId) -> Option<&mut EnvSlot> {
        self.envs
            .get_mut(envx(id))
            .and_then(Option::as_mut)
            .filter(|slot| slot.id == id)
    }

    pub fn record(&self, index: usize) -> Option<EnvRecord> {
        self.envs.get(index).and_then(Option::as_ref).map(EnvSlot::record)
    }

    pub fn slots(&self) -> impl Iterator<Item = &EnvSlot> {
        self.envs.iter().filter_map(Option::as_ref)
    }

    /// Resolve `target` on behalf of `caller`; with `check_perm`, only the
    /// caller itself and its direct children are reachable.
    fn resolve(&self, caller: EnvId, target: EnvId, check_perm: bool) -> Result<EnvId> {
        if target.is_self() {
            return self
                .slot(caller)
                .map(|slot| slot.id)
                .ok_or(ExoError::new(ErrorCode::BadEnv));
        }

        let slot = self
            .slot(target)
            .ok_or(ExoError::new(ErrorCode::BadEnv).with_context(target.raw() as u64))?;
        if check_perm && slot.id != caller && slot.parent != caller {
            return Err(ExoError::with_message(ErrorCode::BadEnv, "not caller or its child")
                .with_context(target.raw() as u64));
        }
        Ok(slot.id)
    }

    fn new_env(&mut self, parent: EnvId, status: EnvStatus) -> Result<EnvId> {
        let index = self
            .envs
            .iter()
            .position(Option::is_none)
            .ok_or(ExoError::new(ErrorCode::NoFreeEnv))?;

        // Generation 0 is never handed out, so no id can be `EnvId::SELF`.
        let generation = EnvId::from_parts(self.generations[index].wrapping_add(1), 0).generation();
        self.generations[index] = if generation == 0 { 1 } else { generation };
        let id = EnvId::from_parts(self.generations[index], index);
        self.envs[index] = Some(EnvSlot {
            id,
            parent,
            status,
            upcall: None,
            handler: None,
            pages: BTreeMap::new(),
            exofork_pending: false,
            faults: 0,
        });
        Ok(id)
    }

    /// Root env with an empty address space
    pub fn spawn(&mut self) -> Result<EnvId> {
        self.new_env(EnvId::SELF, EnvStatus::Runnable)
    }

    /// Free the env and every frame reference it holds
    pub fn destroy(&mut self, id: EnvId) {
        let slot = match self.envs.get_mut(envx(id)) {
            Some(slot) if slot.as_ref().map_or(false, |s| s.id == id) => slot.take(),
            _ => None,
        };
        if let Some(slot) = slot {
            for mapping in slot.pages.values() {
                self.frames.unref_frame(mapping.frame);
            }
            log::debug!("sim: env {} destroyed", id);
        }
    }

    // ── Fault injection ─────────────────────────────────────────────────────

    pub fn inject(&mut self, call: Syscall, code: ErrorCode) {
        self.injected.push((call, code));
    }

    fn injected(&mut self, call: Syscall) -> Result<()> {
        match self.injected.iter().position(|(c, _)| *c == call) {
            Some(pos) => {
                let (_, code) = self.injected.remove(pos);
                Err(ExoError::with_message(code, "injected failure"))
            }
            None => Ok(()),
        }
    }

    // ── Syscalls ────────────────────────────────────────────────────────────

    pub fn exofork(&mut self, caller: EnvId) -> Result<Exofork> {
        let parent = self.slot_mut(caller).ok_or(ExoError::new(ErrorCode::BadEnv))?;
        if parent.exofork_pending {
            parent.exofork_pending = false;
            return Ok(Exofork::Child);
        }
        let handler = parent.handler;

        self.injected(Syscall::Exofork)?;
        let child = self.new_env(caller, EnvStatus::NotRunnable)?;
        if let Some(slot) = self.slot_mut(child) {
            slot.handler = handler;
            slot.exofork_pending = true;
        }
        Ok(Exofork::Parent(child))
    }

    pub fn page_alloc(&mut self, caller: EnvId, env: EnvId, va: VirtAddr, perm: PteFlags) -> Result<()> {
        self.injected(Syscall::PageAlloc)?;
        let env = self.resolve(caller, env, true)?;
        check_va(va)?;
        check_perm(perm)?;

        let frame = self.frames.alloc().ok_or(ExoError::new(ErrorCode::NoMem))?;
        self.insert(env, va.page_number(), Mapping { frame, perm });
        Ok(())
    }

    pub fn page_map(
        &mut self,
        caller: EnvId,
        src_env: EnvId,
        src_va: VirtAddr,
        dst_env: EnvId,
        dst_va: VirtAddr,
        perm: PteFlags,
    ) -> Result<()> {
        self.injected(Syscall::PageMap)?;
        let src_env = self.resolve(caller, src_env, true)?;
        let dst_env = self.resolve(caller, dst_env, true)?;
        check_va(src_va)?;
        check_va(dst_va)?;
        check_perm(perm)?;

        let src = self
            .slot(src_env)
            .and_then(|slot| slot.pages.get(&src_va.page_number()).copied())
            .ok_or(inval("source page not mapped"))?;
        if perm.contains(PteFlags::WRITABLE) && !src.perm.contains(PteFlags::WRITABLE) {
            return Err(inval("writable mapping of a read-only page"));
        }

        self.frames.ref_frame(src.frame);
        self.insert(dst_env, dst_va.page_number(), Mapping { frame: src.frame, perm });
        Ok(())
    }

    pub fn page_unmap(&mut self, caller: EnvId, env: EnvId, va: VirtAddr) -> Result<()> {
        self.injected(Syscall::PageUnmap)?;
        let env = self.resolve(caller, env, true)?;
        check_va(va)?;

        let old = self
            .slot_mut(env)
            .and_then(|slot| slot.pages.remove(&va.page_number()));
        if let Some(old) = old {
            self.frames.unref_frame(old.frame);
        }
        Ok(())
    }

    pub fn env_set_pgfault_upcall(&mut self, caller: EnvId, env: EnvId, upcall: Upcall) -> Result<()> {
        self.injected(Syscall::EnvSetPgfaultUpcall)?;
        let env = self.resolve(caller, env, true)?;
        if let Some(slot) = self.slot_mut(env) {
            slot.upcall = Some(upcall);
        }
        Ok(())
    }

    pub fn env_set_status(&mut self, caller: EnvId, env: EnvId, status: EnvStatus) -> Result<()> {
        self.injected(Syscall::EnvSetStatus)?;
        if !matches!(status, EnvStatus::Runnable | EnvStatus::NotRunnable) {
            return Err(inval("status"));
        }
        let env = self.resolve(caller, env, true)?;
        if let Some(slot) = self.slot_mut(env) {
            slot.status = status;
        }
        Ok(())
    }

    /// First registration allocates the exception stack and sets the upcall
    pub fn set_pgfault_handler(&mut self, caller: EnvId, handler: PgfaultHandler<SimEnv>) -> Result<()> {
        let first = self
            .slot(caller)
            .ok_or(ExoError::new(ErrorCode::BadEnv))?
            .handler
            .is_none();

        if first {
            self.page_alloc(caller, EnvId::SELF, uxstack_base(), PteFlags::USER_RW)?;
            self.env_set_pgfault_upcall(caller, EnvId::SELF, Upcall::new(SIM_UPCALL_ENTRY))?;
        }
        if let Some(slot) = self.slot_mut(caller) {
            slot.handler = Some(handler);
        }
        Ok(())
    }

    fn insert(&mut self, env: EnvId, pn: PageNum, mapping: Mapping) {
        let old = self
            .slot_mut(env)
            .and_then(|slot| slot.pages.insert(pn, mapping));
        if let Some(old) = old {
            self.frames.unref_frame(old.frame);
        }
    }

    // ── User accesses ───────────────────────────────────────────────────────

    pub fn mapping(&self, env: EnvId, pn: PageNum) -> Option<Mapping> {
        self.slot(env).and_then(|slot| slot.pages.get(&pn).copied())
    }

    /// True if the env maps anything in directory slot `pdx`
    pub fn pde_present(&self, env: EnvId, pdx: usize) -> bool {
        let first = PageNum::new(pdx * NPTENTRIES);
        let last = PageNum::new((pdx + 1) * NPTENTRIES);
        self.slot(env)
            .map_or(false, |slot| slot.pages.range(first..last).next().is_some())
    }

    fn check_access(&self, env: EnvId, va: VirtAddr, write: bool) -> core::result::Result<u32, AccessFault> {
        let slot = self.slot(env).ok_or(AccessFault::NoEnv)?;
        let mut err = FaultErr::USER;
        if write {
            err |= FaultErr::WRITE;
        }

        match slot.pages.get(&va.page_number()) {
            Some(m) if m.perm.contains(PteFlags::PRESENT | PteFlags::USER) => {
                if write && !m.perm.contains(PteFlags::WRITABLE) {
                    Err(AccessFault::Fault(err | FaultErr::PROTECTION))
                } else {
                    Ok(m.frame)
                }
            }
            Some(_) => Err(AccessFault::Fault(err | FaultErr::PROTECTION)),
            None => Err(AccessFault::Fault(err)),
        }
    }

    /// User read within one page
    pub fn user_read(&self, env: EnvId, va: VirtAddr, buf: &mut [u8]) -> core::result::Result<(), AccessFault> {
        let frame = self.check_access(env, va, false)?;
        let off = va.page_offset();
        if let Some(data) = self.frames.data(frame) {
            buf.copy_from_slice(&data[off..off + buf.len()]);
        }
        Ok(())
    }

    /// User write within one page
    pub fn user_write(&mut self, env: EnvId, va: VirtAddr, bytes: &[u8]) -> core::result::Result<(), AccessFault> {
        let frame = self.check_access(env, va, true)?;
        let off = va.page_offset();
        if let Some(data) = self.frames.data_mut(frame) {
            data[off..off + bytes.len()].copy_from_slice(bytes);
        }
        Ok(())
    }

    /// Prepare delivery of `frame` to the env's handler: push it onto the
    /// exception stack and return the handler. `None` means the env cannot
    /// take the fault and has been destroyed.
    pub fn begin_fault(&mut self, env: EnvId, frame: &FaultFrame) -> Option<PgfaultHandler<SimEnv>> {
        let slot = self.slot(env)?;
        let handler = match (slot.upcall, slot.handler) {
            (Some(_), Some(handler)) => handler,
            _ => {
                log::warn!("sim: env {} faulted at {} without a handler", env, frame.fault_va);
                self.destroy(env);
                return None;
            }
        };

        let stack = slot.pages.get(&uxstack_base().page_number()).copied();
        let usable = stack.map_or(false, |m| {
            m.perm.contains(PteFlags::USER_RW) && !m.perm.contains(PteFlags::COW)
        });
        let pushed = match stack {
            Some(m) if usable => self.frames.data_mut(m.frame).map(|data| {
                let top = PGSIZE - FAULT_FRAME_SIZE;
                data[top..top + 4].copy_from_slice(&(frame.fault_va.as_usize() as u32).to_le_bytes());
                data[top + 4..top + 8].copy_from_slice(&frame.err.bits().to_le_bytes());
            }),
            _ => None,
        };
        if pushed.is_none() {
            log::warn!("sim: env {} has no usable exception stack", env);
            self.destroy(env);
            return None;
        }

        if let Some(slot) = self.slot_mut(env) {
            slot.faults += 1;
        }
        Some(handler)
    }
}

/// Bytes of a fault frame on the exception stack
pub const FAULT_FRAME_SIZE: usize = 8;

fn check_va(va: VirtAddr) -> Result<()> {
    if va.as_usize() >= UTOP || !va.is_page_aligned() {
        return Err(inval("address"));
    }
    Ok(())
}

fn check_perm(perm: PteFlags) -> Result<()> {
    if !perm.contains(PteFlags::PRESENT | PteFlags::USER) || !PteFlags::SYSCALL.contains(perm) {
        return Err(inval("permissions"));
    }
    Ok(())
}
