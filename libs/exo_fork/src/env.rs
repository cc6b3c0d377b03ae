//! Env identifiers and the per-process context.
//!
//! A process used to find itself through a global pointer into the env table,
//! copied verbatim into a forked child and patched there afterwards. Here the
//! caller holds an [`EnvContext`] value instead, and a new process derives its
//! own from its own id the first time it runs.

use core::fmt;

use crate::kernel::{ExoKernel, Upcall};

/// log2 of the env table size
pub const LOG2NENV: usize = 10;

/// Env table size
pub const NENV: usize = 1 << LOG2NENV;

/// Where the generation starts inside an env id
pub const ENVGENSHIFT: usize = 12;

/// Generations wrap at this many bits, keeping every id a positive `i32`
pub const ENVGENBITS: usize = 31 - ENVGENSHIFT;

/// Env identifier: `generation << ENVGENSHIFT | index`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct EnvId(u32);

impl EnvId {
    /// Designates the caller in every host call
    pub const SELF: EnvId = EnvId(0);

    pub const fn from_raw(raw: u32) -> Self {
        EnvId(raw)
    }

    /// Generation bits above `ENVGENBITS` are dropped
    pub const fn from_parts(generation: u32, index: usize) -> Self {
        let generation = generation & ((1 << ENVGENBITS) - 1);
        EnvId((generation << ENVGENSHIFT) | (index as u32 & (NENV as u32 - 1)))
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }

    pub const fn is_self(&self) -> bool {
        self.0 == 0
    }

    pub const fn generation(&self) -> u32 {
        self.0 >> ENVGENSHIFT
    }
}

impl fmt::Display for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Env table index of `id`
pub const fn envx(id: EnvId) -> usize {
    id.0 as usize & (NENV - 1)
}

/// Scheduling state of an env
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvStatus {
    Free,
    Dying,
    Runnable,
    Running,
    NotRunnable,
}

/// Read-only view of one env table slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvRecord {
    pub env_id: EnvId,
    pub parent_id: EnvId,
    pub status: EnvStatus,
    /// Entry point the kernel calls on a page fault, if any
    pub pgfault_upcall: Option<Upcall>,
}

/// The calling process's identity, threaded through every operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvContext {
    env_id: EnvId,
    index: usize,
}

impl EnvContext {
    /// Derive the context from the caller's own id.
    ///
    /// Called on process entry, and by a forked child before it returns from
    /// `fork`: the child starts with a copy of its parent's context, which
    /// names the wrong env.
    pub fn resolve<K: ExoKernel>(kernel: &K) -> Self {
        let env_id = kernel.getenvid();
        EnvContext {
            env_id,
            index: envx(env_id),
        }
    }

    pub fn env_id(&self) -> EnvId {
        self.env_id
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Current state of our own env table slot
    pub fn record<K: ExoKernel>(&self, kernel: &K) -> Option<EnvRecord> {
        kernel.env(self.index).filter(|rec| rec.env_id == self.env_id)
    }
}
