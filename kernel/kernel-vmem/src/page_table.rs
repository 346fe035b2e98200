//! # PAE Page Tables
//!
//! The three levels of the PAE hierarchy as distinct typed nodes sharing a
//! common 64-bit entry primitive. Kinds are never pointer-punned into each
//! other; the walk level determines the type.

pub mod pd;
pub mod pdpt;
pub mod pt;

use crate::page_table::pd::L2Index;
use crate::page_table::pdpt::L3Index;
use crate::page_table::pt::L1Index;
use kernel_memory_addresses::VirtualAddress;

/// Present bit, identical at every level.
pub(crate) const PRESENT_BIT: u64 = 1 << 0;

/// Page-size bit of a PDE (1 = 2 MiB leaf).
pub(crate) const PS_BIT: u64 = 1 << 7;

/// Split a virtual address into its three table indices.
#[inline]
#[must_use]
pub const fn split_indices(va: VirtualAddress) -> (L3Index, L2Index, L1Index) {
    (L3Index::from(va), L2Index::from(va), L1Index::from(va))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_ok() {
        let va = VirtualAddress::new(0x8123_4567);
        let (i3, i2, i1) = split_indices(va);
        assert_eq!(i3.as_usize(), 0x8123_4567 >> 30);
        assert_eq!(i2.as_usize(), (0x8123_4567 >> 21) & 0x1FF);
        assert_eq!(i1.as_usize(), (0x8123_4567 >> 12) & 0x1FF);
        assert!(i3.as_usize() < 4);
        assert!(i2.as_usize() < 512);
        assert!(i1.as_usize() < 512);
    }

    #[test]
    fn adjacent_pages_share_upper_indices() {
        let a = split_indices(VirtualAddress::new(0x0020_0000));
        let b = split_indices(VirtualAddress::new(0x0020_1000));
        assert_eq!(a.0, b.0);
        assert_eq!(a.1, b.1);
        assert_ne!(a.2, b.2);
    }
}
