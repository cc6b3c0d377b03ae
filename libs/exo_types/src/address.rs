// libs/exo_types/src/address.rs
use core::fmt;

/// Taille d'une page en octets
pub const PGSIZE: usize = 4096;

/// log2(PGSIZE)
pub const PGSHIFT: usize = 12;

/// Adresse virtuelle dans l'espace d'un env
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct VirtAddr(usize);

impl VirtAddr {
    pub const fn new(addr: usize) -> Self {
        VirtAddr(addr)
    }

    pub const fn as_usize(&self) -> usize {
        self.0
    }

    /// Arrondit à la page inférieure
    pub const fn page_base(&self) -> Self {
        VirtAddr(self.0 & !(PGSIZE - 1))
    }

    /// Décalage dans la page
    pub const fn page_offset(&self) -> usize {
        self.0 & (PGSIZE - 1)
    }

    pub const fn is_page_aligned(&self) -> bool {
        self.page_offset() == 0
    }

    /// Numéro de la page contenant cette adresse
    pub const fn page_number(&self) -> PageNum {
        PageNum(self.0 >> PGSHIFT)
    }

    pub const fn checked_add(&self, bytes: usize) -> Option<Self> {
        match self.0.checked_add(bytes) {
            Some(addr) => Some(VirtAddr(addr)),
            None => None,
        }
    }
}

impl From<usize> for VirtAddr {
    fn from(addr: usize) -> Self {
        VirtAddr(addr)
    }
}

impl From<VirtAddr> for usize {
    fn from(addr: VirtAddr) -> Self {
        addr.0
    }
}

impl fmt::LowerHex for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Numéro de page virtuelle (`va >> PGSHIFT`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct PageNum(usize);

impl PageNum {
    pub const fn new(pn: usize) -> Self {
        PageNum(pn)
    }

    pub const fn as_usize(&self) -> usize {
        self.0
    }

    /// Première adresse de la page
    pub const fn base(&self) -> VirtAddr {
        VirtAddr(self.0 << PGSHIFT)
    }
}

impl From<usize> for PageNum {
    fn from(pn: usize) -> Self {
        PageNum(pn)
    }
}

impl From<PageNum> for usize {
    fn from(pn: PageNum) -> Self {
        pn.0
    }
}

impl fmt::Display for PageNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pn {:#x}", self.0)
    }
}
