//! Simulated host configuration

use crate::env::NENV;

/// Sizing of the simulated host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimConfig {
    /// Env table slots in use (at most `NENV`)
    pub max_envs: usize,
    /// Physical frames available to all envs
    pub max_frames: usize,
}

impl SimConfig {
    /// Full env table, 4 MiB of physical memory
    pub const fn default_config() -> Self {
        SimConfig {
            max_envs: NENV,
            max_frames: 1024,
        }
    }

    pub const fn with_max_frames(mut self, max_frames: usize) -> Self {
        self.max_frames = max_frames;
        self
    }

    pub const fn with_max_envs(mut self, max_envs: usize) -> Self {
        self.max_envs = if max_envs > NENV { NENV } else { max_envs };
        self
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self::default_config()
    }
}
