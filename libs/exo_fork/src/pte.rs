//! Mirrored page-table entries and page-fault error bits.
//!
//! The host kernel maps the caller's own page directory and page tables
//! read-only into its address space. This module only decodes those entries;
//! changing a mapping always goes through a host call.

use bitflags::bitflags;

bitflags! {
    /// Flags of a page directory or page table entry
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PteFlags: u32 {
        const PRESENT       = 0x001;
        const WRITABLE      = 0x002;
        const USER          = 0x004;
        const WRITE_THROUGH = 0x008;
        const CACHE_DISABLE = 0x010;
        const ACCESSED      = 0x020;
        const DIRTY         = 0x040;
        const PAGE_SIZE     = 0x080;
        const GLOBAL        = 0x100;

        /// Bits left to software by the MMU
        const AVAIL         = 0xe00;

        /// Copy-on-write: shared read-only, copied on the first write.
        /// One of the AVAIL bits.
        const COW           = 0x800;

        /// The only bits a caller may pass to the page mapping calls
        const SYSCALL = Self::AVAIL.bits() | Self::PRESENT.bits() | Self::WRITABLE.bits() | Self::USER.bits();
    }
}

impl PteFlags {
    /// Permissions of a COW mapping (never writable)
    pub const COW_SHARED: Self = Self::PRESENT.union(Self::USER).union(Self::COW);

    /// Permissions of a private writable user page
    pub const USER_RW: Self = Self::PRESENT.union(Self::USER).union(Self::WRITABLE);
}

/// Raw mirrored entry: frame number above bit 12, flags below
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct Pte(u32);

impl Pte {
    const FLAGS_MASK: u32 = 0xfff;

    /// Entry that maps nothing
    pub const EMPTY: Pte = Pte(0);

    pub const fn from_raw(raw: u32) -> Self {
        Pte(raw)
    }

    pub fn new(frame: u32, flags: PteFlags) -> Self {
        Pte((frame << 12) | (flags.bits() & Self::FLAGS_MASK))
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }

    pub fn flags(&self) -> PteFlags {
        PteFlags::from_bits_truncate(self.0 & Self::FLAGS_MASK)
    }

    /// Physical frame number
    pub const fn frame(&self) -> u32 {
        self.0 >> 12
    }

    pub fn is_present(&self) -> bool {
        self.flags().contains(PteFlags::PRESENT)
    }

    pub fn is_writable(&self) -> bool {
        self.flags().contains(PteFlags::WRITABLE)
    }

    pub fn is_user(&self) -> bool {
        self.flags().contains(PteFlags::USER)
    }

    pub fn is_cow(&self) -> bool {
        self.flags().contains(PteFlags::COW)
    }

    /// Never true in a consistent state
    pub fn is_cow_and_writable(&self) -> bool {
        self.flags().contains(PteFlags::COW | PteFlags::WRITABLE)
    }
}

bitflags! {
    /// Error code pushed by the MMU with a page fault
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FaultErr: u32 {
        /// Protection violation on a present page (clear: page not present)
        const PROTECTION = 0x1;
        /// Caused by a write (clear: by a read)
        const WRITE      = 0x2;
        /// Raised in user mode
        const USER       = 0x4;
    }
}

impl FaultErr {
    pub fn is_write(&self) -> bool {
        self.contains(FaultErr::WRITE)
    }
}
