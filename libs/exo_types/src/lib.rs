#![no_std]

pub mod address;
pub mod error;

// Réexportations
pub use address::{PageNum, VirtAddr, PGSHIFT, PGSIZE};
pub use error::{ErrorCode, ExoError, Result};
