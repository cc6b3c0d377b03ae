//! Shared setup for the integration tests
#![allow(dead_code)]

use exo_fork::logger::{self, ConsoleLogger};
use exo_fork::sim::{SimConfig, SimConsole, SimEnv, SimKernel};
use exo_fork::{EnvContext, EnvId, ExoKernel, PteFlags, VirtAddr};
use log::LevelFilter;

pub const PAGE: usize = exo_fork::layout::PGSIZE;

static LOGGER: ConsoleLogger<SimConsole> = ConsoleLogger::new(SimConsole::new(), LevelFilter::Debug);

/// Console shared by every test of the binary
pub fn console() -> &'static SimConsole {
    LOGGER.console()
}

pub fn init_logging() {
    let _ = logger::init(&LOGGER);
}

pub fn va(addr: usize) -> VirtAddr {
    VirtAddr::new(addr)
}

/// A fresh machine with one runnable root env and its context
pub fn boot(config: SimConfig) -> (SimKernel, SimEnv, EnvContext) {
    init_logging();
    let kernel = SimKernel::new(config);
    let env = kernel.spawn().expect("spawn root env");
    let ctx = EnvContext::resolve(&env);
    (kernel, env, ctx)
}

/// Map a writable page at `addr` in `env` and fill its start with `bytes`
pub fn map_rw(env: &SimEnv, addr: usize, bytes: &[u8]) {
    env.page_alloc(EnvId::SELF, va(addr), PteFlags::USER_RW)
        .expect("page_alloc");
    env.write(va(addr), bytes).expect("initial write");
}

/// Map a read-only page at `addr` holding `bytes`
pub fn map_ro(env: &SimEnv, addr: usize, bytes: &[u8]) {
    map_rw(env, addr, bytes);
    env.page_map(EnvId::SELF, va(addr), EnvId::SELF, va(addr), PteFlags::PRESENT | PteFlags::USER)
        .expect("page_map read-only");
}

pub fn read_bytes(env: &SimEnv, addr: usize, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    env.read(va(addr), &mut buf).expect("read");
    buf
}
