//! # exo_fork
//!
//! User-space `fork` for Exo-OS environments.
//!
//! The host kernel only hands out page-granularity primitives (allocate, map,
//! unmap a page; create an empty env; set its status and fault upcall) plus a
//! read-only mirror of the caller's own page tables. Everything else lives
//! here, in the forking process:
//!
//! - [`pgfault::pgfault`] resolves write faults on copy-on-write pages by
//!   giving the faulting env a private copy of the page.
//! - [`duppage::duppage`] turns one page into a COW page shared by the caller
//!   and a child.
//! - [`fork::fork`] creates the child, shares every user page below the
//!   exception stack, gives the child its own exception stack and marks it
//!   runnable.
//!
//! The host kernel is reached only through the traits in [`kernel`]. The
//! `sim` feature provides an in-memory host kernel implementing them.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[macro_use]
mod macros;

pub mod duppage;
pub mod env;
pub mod fork;
pub mod kernel;
pub mod layout;
pub mod logger;
pub mod pgfault;
pub mod pte;

#[cfg(feature = "sim")]
pub mod sim;

// Re-exports
pub use duppage::{duppage, PageNotPresent};
pub use env::{envx, EnvContext, EnvId, EnvRecord, EnvStatus};
pub use exo_types::{ErrorCode, ExoError, PageNum, VirtAddr};
pub use fork::{fork, sfork, ForkError, ForkResult};
pub use kernel::{Exofork, ExoKernel, FaultFrame, PageTableMirror, PgfaultHandler, Upcall, UserEnv, UserMemory};
pub use pgfault::pgfault;
pub use pte::{FaultErr, Pte, PteFlags};
