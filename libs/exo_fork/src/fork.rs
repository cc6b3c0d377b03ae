//! # User-level fork with copy-on-write
//!
//! 1. Install [`pgfault`] as this env's fault handler.
//! 2. Create the child with `exofork`. The child resumes here too, fixes its
//!    context and returns [`ForkResult::Child`].
//! 3. Share every present user page below the exception stack
//!    copy-on-write ([`duppage`]).
//! 4. Give the child a fresh exception stack holding a copy of ours. That
//!    page is never COW: the fault handler runs on it.
//! 5. Hand the child our fault upcall and mark it runnable.
//!
//! The child is only made runnable once its whole address space is in place.

use core::fmt;

use exo_types::{ErrorCode, ExoError, PageNum, VirtAddr};

use crate::duppage::duppage;
use crate::env::{EnvContext, EnvId, EnvStatus};
use crate::kernel::{Exofork, UserEnv};
use crate::layout::{user_pdx_count, uxstack_base, uxstack_page, FORK_TEMP, NPTENTRIES};
use crate::pgfault::pgfault;
use crate::pte::PteFlags;

/// What each side sees when `fork` returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkResult {
    /// In the original env, with the child's id
    Parent(EnvId),
    /// In the new env
    Child,
}

impl ForkResult {
    /// Classic discriminator: the child's id in the parent, 0 in the child.
    /// Env ids keep their generation below the sign bit, so the parent side
    /// is always positive.
    pub fn as_raw(&self) -> i32 {
        match self {
            ForkResult::Parent(child) => child.raw() as i32,
            ForkResult::Child => 0,
        }
    }
}

/// Non-fatal fork failure. The child, if created, is never made runnable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForkError {
    /// A host call failed while setting up the child
    ChildSetup {
        op: &'static str,
        child: EnvId,
        source: ExoError,
    },
    /// Sharing writable pages without COW is not supported
    NotImplemented,
}

impl ForkError {
    /// Negative discriminator
    pub fn as_raw(&self) -> i32 {
        match self {
            ForkError::ChildSetup { source, .. } => source.code().as_raw(),
            ForkError::NotImplemented => ErrorCode::NotSupported.as_raw(),
        }
    }
}

impl fmt::Display for ForkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForkError::ChildSetup { op, child, source } => {
                write!(f, "{} failed for child {}: {}", op, child, source)
            }
            ForkError::NotImplemented => write!(f, "sfork not implemented"),
        }
    }
}

fn setup_error(op: &'static str, child: EnvId, source: ExoError) -> ForkError {
    log::warn!("fork: {} for child {}: {}", op, child, source);
    ForkError::ChildSetup { op, child, source }
}

/// Duplicate the calling env.
///
/// In the child, `ctx` is re-derived from the child's own id before
/// returning. Protocol violations and host failures before the child exists
/// abort the env; failures while finishing the child are returned.
///
/// `FORK_TEMP` must be unmapped in the caller, otherwise the child is left
/// not runnable and a `ChildSetup` error is returned.
pub fn fork<K: UserEnv>(kernel: &K, ctx: &mut EnvContext) -> Result<ForkResult, ForkError> {
    log::debug!("fork: env {}", ctx.env_id());

    if let Err(e) = kernel.set_pgfault_handler(pgfault::<K>) {
        fatal!("fork: set_pgfault_handler: {}", e);
    }

    let child = match kernel.exofork() {
        Ok(Exofork::Parent(child)) => child,
        Ok(Exofork::Child) => {
            *ctx = EnvContext::resolve(kernel);
            log::debug!("fork: running as child {}", ctx.env_id());
            return Ok(ForkResult::Child);
        }
        Err(e) => fatal!("fork: exofork: {}", e),
    };
    log::debug!("fork: created child {}", child);

    let shared = share_address_space(kernel, child);
    log::trace!("fork: {} pages shared copy-on-write with {}", shared, child);

    clone_exception_stack(kernel, child)?;

    let upcall = match ctx.record(kernel).and_then(|rec| rec.pgfault_upcall) {
        Some(upcall) => upcall,
        None => fatal!("fork: env {} has no fault upcall", ctx.env_id()),
    };
    if let Err(e) = kernel.env_set_pgfault_upcall(child, upcall) {
        fatal!("fork: env_set_pgfault_upcall for {}: {}", child, e);
    }

    kernel
        .env_set_status(child, EnvStatus::Runnable)
        .map_err(|e| setup_error("env_set_status", child, e))?;

    log::info!("fork: {} -> {}", ctx.env_id(), child);
    Ok(ForkResult::Parent(child))
}

/// Shared-memory fork: every page but the stack shared writable. Unsupported.
pub fn sfork<K: UserEnv>(_kernel: &K, ctx: &mut EnvContext) -> Result<ForkResult, ForkError> {
    log::error!("sfork: not implemented (env {})", ctx.env_id());
    Err(ForkError::NotImplemented)
}

/// Share every present page in `[0, uxstack_page())` with `child`.
/// Returns the number of pages shared.
fn share_address_space<K: UserEnv>(kernel: &K, child: EnvId) -> usize {
    let limit = uxstack_page().as_usize();
    let mut shared = 0;

    for pdx in 0..user_pdx_count() {
        if !kernel.vpd(pdx).is_present() {
            continue;
        }

        let first = pdx * NPTENTRIES;
        let end = (first + NPTENTRIES).min(limit);
        for pn in (first..end).map(PageNum::new) {
            if duppage(kernel, child, pn).is_ok() {
                shared += 1;
            }
        }
    }

    shared
}

/// Allocate the child's exception stack and fill it with a copy of ours,
/// through a temporary mapping at `FORK_TEMP`.
///
/// A page of ours at `FORK_TEMP` would be replaced and then unmapped, so
/// fork fails instead and leaves it in place.
fn clone_exception_stack<K: UserEnv>(kernel: &K, child: EnvId) -> Result<(), ForkError> {
    let stack = uxstack_base();
    let temp = VirtAddr::new(FORK_TEMP);

    if kernel.pte_at(temp).is_present() {
        let busy = ExoError::with_message(ErrorCode::Inval, "temporary address in use");
        return Err(setup_error("page_map", child, busy));
    }

    kernel
        .page_alloc(child, stack, PteFlags::USER_RW)
        .map_err(|e| setup_error("page_alloc", child, e))?;

    kernel
        .page_map(child, stack, EnvId::SELF, temp, PteFlags::USER_RW)
        .map_err(|e| setup_error("page_map", child, e))?;

    kernel.copy_page(temp, stack);

    kernel
        .page_unmap(EnvId::SELF, temp)
        .map_err(|e| setup_error("page_unmap", child, e))?;

    Ok(())
}
