//! Copy-on-write fault handling against the simulated host

mod common;

use std::panic::{catch_unwind, AssertUnwindSafe};

use common::*;
use exo_fork::layout::{uxstack_base, PFTEMP, UTEXT};
use exo_fork::sim::{SimConfig, SimEnv, SimError, Syscall, FAULT_FRAME_SIZE};
use exo_fork::{
    fork, pgfault, EnvId, ErrorCode, ExoKernel, Exofork, FaultErr, FaultFrame, ForkResult, PageTableMirror,
    PteFlags,
};

const X: usize = UTEXT;

/// Parent and child sharing page `X` (holding "shared") copy-on-write
fn shared_pair() -> (exo_fork::sim::SimKernel, SimEnv, SimEnv) {
    let (kernel, parent, mut ctx) = boot(SimConfig::default_config());
    map_rw(&parent, X, b"shared");
    let child = match fork(&parent, &mut ctx).unwrap() {
        ForkResult::Parent(child) => kernel.env(child),
        ForkResult::Child => unreachable!(),
    };
    (kernel, parent, child)
}

#[test]
fn test_handler_gives_private_writable_copy() {
    let (kernel, parent, child) = shared_pair();
    let shared_frame = kernel.frame_of(parent.id(), va(X));

    let frame = FaultFrame {
        fault_va: va(X + 0x10),
        err: FaultErr::PROTECTION | FaultErr::WRITE | FaultErr::USER,
    };
    pgfault(&parent, &frame);

    let pte = parent.pte_at(va(X));
    assert!(pte.is_writable());
    assert!(!pte.is_cow());
    assert_ne!(Some(pte.frame()), shared_frame);
    assert_eq!(read_bytes(&parent, X, 6), b"shared");

    // The staged frame stays mapped at PFTEMP.
    assert_eq!(kernel.frame_of(parent.id(), va(PFTEMP)), Some(pte.frame()));

    // The child's mapping is untouched and still shares the old frame.
    let child_perm = kernel.pte(child.id(), va(X)).unwrap();
    assert!(child_perm.contains(PteFlags::COW) && !child_perm.contains(PteFlags::WRITABLE));
    assert_eq!(kernel.frame_of(child.id(), va(X)), shared_frame);
    assert_eq!(kernel.frame_refs(child.id(), va(X)), 1);
}

#[test]
fn test_fault_frame_pushed_on_exception_stack() {
    let (kernel, parent, _child) = shared_pair();
    parent.write(va(X + 4), b"!").unwrap();

    let top = kernel
        .read(parent.id(), va(uxstack_base().as_usize() + PAGE - FAULT_FRAME_SIZE), FAULT_FRAME_SIZE)
        .unwrap();
    assert_eq!(&top[..4], &((X + 4) as u32).to_le_bytes());
    assert_eq!(&top[4..], &0x7u32.to_le_bytes());
    assert_eq!(kernel.faults(parent.id()), Some(1));
}

#[test]
fn test_second_write_does_not_fault() {
    let (kernel, parent, _child) = shared_pair();
    parent.write(va(X), b"one").unwrap();
    parent.write(va(X), b"two").unwrap();
    assert_eq!(kernel.faults(parent.id()), Some(1));
    assert_eq!(read_bytes(&parent, X, 6), b"twored");
}

#[test]
fn test_write_spanning_two_cow_pages() {
    let (kernel, parent, mut ctx) = boot(SimConfig::default_config());
    map_rw(&parent, X, &[1u8; 8]);
    map_rw(&parent, X + PAGE, &[2u8; 8]);
    let child = match fork(&parent, &mut ctx).unwrap() {
        ForkResult::Parent(child) => kernel.env(child),
        ForkResult::Child => unreachable!(),
    };

    parent.write(va(X + PAGE - 2), &[9u8; 4]).unwrap();

    assert_eq!(kernel.faults(parent.id()), Some(2));
    assert_eq!(read_bytes(&parent, X + PAGE - 2, 4), [9u8; 4]);
    assert_eq!(read_bytes(&child, X + PAGE - 2, 4), [0, 0, 2, 2]);
}

#[test]
#[should_panic(expected = "pgfault: denied read")]
fn test_read_fault_is_fatal() {
    let (_kernel, parent, _ctx) = boot(SimConfig::default_config());
    parent.set_pgfault_handler(pgfault::<SimEnv>).unwrap();
    let mut buf = [0u8; 1];
    let _ = parent.read(va(0x0100_0000), &mut buf);
}

#[test]
#[should_panic(expected = "page is not COW")]
fn test_write_to_read_only_page_is_fatal() {
    let (_kernel, parent, _ctx) = boot(SimConfig::default_config());
    parent.set_pgfault_handler(pgfault::<SimEnv>).unwrap();
    map_ro(&parent, X, b"ro");
    let _ = parent.write(va(X), b"RW");
}

#[test]
#[should_panic(expected = "page is not COW")]
fn test_write_to_unmapped_page_is_fatal() {
    let (_kernel, parent, _ctx) = boot(SimConfig::default_config());
    parent.set_pgfault_handler(pgfault::<SimEnv>).unwrap();
    let _ = parent.write(va(0x0100_0000), b"x");
}

#[test]
fn test_fatal_fault_is_logged() {
    let (_kernel, parent, _ctx) = boot(SimConfig::default_config());
    parent.set_pgfault_handler(pgfault::<SimEnv>).unwrap();
    map_ro(&parent, X, b"ro");

    let outcome = catch_unwind(AssertUnwindSafe(|| parent.write(va(X), b"RW")));
    assert!(outcome.is_err());
    assert!(console().contains("denied copy-on-write at 0x00800000"));
    assert_eq!(read_bytes(&parent, X, 2), b"ro");
}

#[test]
#[should_panic(expected = "pgfault: page_alloc")]
fn test_alloc_failure_during_fault_is_fatal() {
    let (kernel, parent, _child) = shared_pair();
    kernel.fail_next(Syscall::PageAlloc, ErrorCode::NoMem);
    let _ = parent.write(va(X), b"x");
}

#[test]
#[should_panic(expected = "pgfault: page_map")]
fn test_map_failure_during_fault_is_fatal() {
    let (kernel, parent, _child) = shared_pair();
    kernel.fail_next(Syscall::PageMap, ErrorCode::NoMem);
    let _ = parent.write(va(X), b"x");
}

#[test]
fn test_failed_resolution_never_exposes_partial_page() {
    let (kernel, parent, _child) = shared_pair();
    kernel.fail_next(Syscall::PageMap, ErrorCode::NoMem);
    let outcome = catch_unwind(AssertUnwindSafe(|| parent.write(va(X), b"XXXXXX")));
    assert!(outcome.is_err());

    let perm = kernel.pte(parent.id(), va(X)).unwrap();
    assert!(perm.contains(PteFlags::COW) && !perm.contains(PteFlags::WRITABLE));
    assert_eq!(kernel.read(parent.id(), va(X), 6).unwrap(), b"shared");
}

#[test]
fn test_registration_is_idempotent() {
    let (kernel, parent, _ctx) = boot(SimConfig::default_config());
    parent.set_pgfault_handler(pgfault::<SimEnv>).unwrap();
    let stack = kernel.frame_of(parent.id(), uxstack_base());
    let allocated = kernel.frame_stats().allocated;

    parent.set_pgfault_handler(pgfault::<SimEnv>).unwrap();

    assert_eq!(kernel.frame_of(parent.id(), uxstack_base()), stack);
    assert_eq!(kernel.frame_stats().allocated, allocated);
}

#[test]
fn test_cow_exception_stack_kills_env() {
    let (kernel, parent, _child) = shared_pair();
    parent
        .page_map(EnvId::SELF, uxstack_base(), EnvId::SELF, uxstack_base(), PteFlags::COW_SHARED)
        .unwrap();

    assert_eq!(parent.write(va(X), b"x"), Err(SimError::EnvDestroyed(parent.id())));
    assert_eq!(kernel.status(parent.id()), None);
}

#[test]
fn test_fault_without_upcall_kills_env() {
    let (kernel, parent, mut ctx) = boot(SimConfig::default_config());
    map_rw(&parent, X, b"x");
    let child = match fork(&parent, &mut ctx).unwrap() {
        ForkResult::Parent(child) => kernel.env(child),
        ForkResult::Child => unreachable!(),
    };
    // A child whose parent never handed over the upcall cannot take faults.
    assert_eq!(child.exofork().unwrap(), Exofork::Child);
    let orphan = match child.exofork().unwrap() {
        Exofork::Parent(id) => kernel.env(id),
        Exofork::Child => unreachable!(),
    };
    child
        .page_map(EnvId::SELF, va(X), orphan.id(), va(X), PteFlags::COW_SHARED)
        .unwrap();

    assert_eq!(orphan.write(va(X), b"y"), Err(SimError::EnvDestroyed(orphan.id())));
    assert_eq!(read_bytes(&child, X, 1), b"x");
}
