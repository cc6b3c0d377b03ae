//! # Layout de l'espace d'adressage utilisateur
//!
//! Pagination 32 bits à deux niveaux. Tout ce qui est sous `UTOP` appartient à
//! l'env; au-dessus, le noyau (dont le miroir en lecture seule des tables de
//! pages).
//!
//! ```text
//!  UTOP, UXSTACKTOP -> +--------------------------+ 0xeec00000
//!                      | pile d'exception (1 page)|
//!                      +--------------------------+ UXSTACKTOP - PGSIZE
//!                      | page de garde            |
//!         USTACKTOP -> +--------------------------+ UTOP - 2*PGSIZE
//!                      | pile normale, tas, code  |
//!             UTEXT -> +--------------------------+ 0x00800000
//!            PFTEMP -> | temporaire du handler    | 0x007ff000
//!                      |                          |
//!  UTEMP, FORK_TEMP -> +--------------------------+ 0x00400000
//! ```

use exo_types::{PageNum, VirtAddr};
use static_assertions::const_assert;

pub use exo_types::{PGSHIFT, PGSIZE};

/// Entrées par répertoire de pages
pub const NPDENTRIES: usize = 1024;

/// Entrées par table de pages
pub const NPTENTRIES: usize = 1024;

/// Octets couverts par une entrée de répertoire
pub const PTSIZE: usize = PGSIZE * NPTENTRIES;

/// Décalage de l'index de répertoire dans une adresse
pub const PDXSHIFT: usize = 22;

/// Sommet de l'espace utilisateur
pub const UTOP: usize = 0xeec0_0000;

/// Sommet de la pile d'exception (une seule page)
pub const UXSTACKTOP: usize = UTOP;

/// Sommet de la pile normale (une page de garde sous la pile d'exception)
pub const USTACKTOP: usize = UTOP - 2 * PGSIZE;

/// Début du code utilisateur
pub const UTEXT: usize = 2 * PTSIZE;

/// Zone de mapping temporaire
pub const UTEMP: usize = PTSIZE;

/// Adresse temporaire réservée au handler de faute de page
pub const PFTEMP: usize = UTEMP + PTSIZE - PGSIZE;

/// Adresse temporaire réservée à fork, distincte de `PFTEMP` : une faute COW
/// pendant la copie de la pile d'exception ne doit pas écraser ce mapping.
/// Réservée : fork échoue si l'appelant y a une page.
pub const FORK_TEMP: usize = UTEMP;

const_assert!(PGSIZE == 1 << PGSHIFT);
const_assert!(PTSIZE == 1 << PDXSHIFT);
const_assert!(UTOP % PTSIZE == 0);
const_assert!(UXSTACKTOP % PGSIZE == 0);
const_assert!(PFTEMP % PGSIZE == 0);
const_assert!(FORK_TEMP != PFTEMP);
const_assert!(PFTEMP < UTEXT);
const_assert!(USTACKTOP < UXSTACKTOP - PGSIZE);

/// Bas de la page de pile d'exception
pub const fn uxstack_base() -> VirtAddr {
    VirtAddr::new(UXSTACKTOP - PGSIZE)
}

/// Numéro de la page de pile d'exception; fork ne partage que les pages
/// strictement en dessous.
pub const fn uxstack_page() -> PageNum {
    uxstack_base().page_number()
}

/// Index dans le répertoire de pages
pub const fn pdx(va: VirtAddr) -> usize {
    (va.as_usize() >> PDXSHIFT) & (NPDENTRIES - 1)
}

/// Index dans la table de pages
pub const fn ptx(va: VirtAddr) -> usize {
    (va.as_usize() >> PGSHIFT) & (NPTENTRIES - 1)
}

/// Numéro de page à partir des deux index
pub const fn page_number_from_indices(pdx: usize, ptx: usize) -> PageNum {
    PageNum::new(pdx * NPTENTRIES + ptx)
}

/// Arrondi à la page inférieure
pub const fn round_down(va: VirtAddr) -> VirtAddr {
    va.page_base()
}

/// Nombre d'entrées de répertoire sous `UTOP`
pub const fn user_pdx_count() -> usize {
    pdx(VirtAddr::new(UTOP))
}

/// `va` est-elle une adresse utilisateur?
pub const fn is_user(va: VirtAddr) -> bool {
    va.as_usize() < UTOP
}
