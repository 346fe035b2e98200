//! # Page Directory Pointer Table (PDPT / L3)
//!
//! The top level of the PAE hierarchy:
//!
//! - [`L3Index`]: index type for virtual-address bits `[31:30]`.
//! - [`Pdpte`]: an entry pointing at a Page Directory.
//! - [`PageDirectoryPointerTable`]: a 32-byte aligned array of 4 entries
//!   covering the whole 32-bit address space (4 × 1 GiB).
//!
//! ## Semantics
//!
//! Hardware consults only `PRESENT` here; the remaining permission bits are
//! ignored at this level but still written by the region installer, so they
//! are modeled rather than hidden.

use crate::page_table::PRESENT_BIT;
use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalPage, Size4K, VirtualAddress};

/// L3 **PDPTE** — pointer to a **Page Directory**.
///
/// The referenced PD base is 4 KiB-aligned. There are no 1 GiB leaves in
/// this subsystem; PAE-for-ia32 has no `PS` bit at this level.
#[bitfield(u64)]
pub struct Pdpte {
    /// Present (bit 0): the only bit hardware honors at this level.
    pub present: bool,
    /// Writable (bit 1): ignored by hardware at this level.
    pub writable: bool,
    /// User (bit 2): ignored by hardware at this level.
    pub user: bool,
    /// Write-Through (bit 3).
    pub write_through: bool,
    /// Cache Disable (bit 4).
    pub cache_disable: bool,
    /// Reserved / ignored (bits 5..8).
    #[bits(4)]
    __ignored5_8: u8,
    /// OS-available (bits 9..11).
    #[bits(3)]
    pub os_available_low: u8,
    /// Next-level PD physical frame (bits 12..51; 4 KiB-aligned base).
    #[bits(40)]
    frame: u64,
    /// Reserved / ignored (bits 52..62).
    #[bits(11)]
    __ignored52_62: u16,
    /// Execute-disable (bit 63): ignored by hardware at this level.
    pub no_execute: bool,
}

impl Pdpte {
    /// Set the referenced PD frame.
    #[inline]
    pub const fn set_physical_page(&mut self, page: PhysicalPage<Size4K>) {
        self.set_frame(page.frame_number() as u64);
    }

    /// Set the referenced PD frame.
    #[inline]
    #[must_use]
    pub const fn with_physical_page(mut self, page: PhysicalPage<Size4K>) -> Self {
        self.set_physical_page(page);
        self
    }

    /// The referenced PD frame. Physical addresses are clamped to 32 bits.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn physical_page(self) -> PhysicalPage<Size4K> {
        PhysicalPage::from_frame_number(self.frame() as u32)
    }

    /// The referenced PD frame, or `None` when not present.
    #[inline]
    #[must_use]
    pub const fn next_table(self) -> Option<PhysicalPage<Size4K>> {
        if self.present() {
            Some(self.physical_page())
        } else {
            None
        }
    }

    /// Create a zero (non-present) entry.
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self::new()
    }
}

/// Index into the PDPT (derived from VA bits `[31:30]`).
///
/// Strongly typed to avoid mixing with other levels. Range is `0..4`
/// (checked in debug builds).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct L3Index(u8);

impl L3Index {
    /// Build an index from a virtual address (extracts bits `[31:30]`).
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from(va: VirtualAddress) -> Self {
        Self::new((va.as_u32() >> 30) as u8)
    }

    /// Construct from a raw `u8`.
    ///
    /// ### Debug assertions
    /// - Asserts `v < 4` in debug builds.
    #[inline]
    #[must_use]
    pub const fn new(v: u8) -> Self {
        debug_assert!(v < 4);
        Self(v)
    }

    /// Return the index as `usize` for table access.
    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// The PDPT (L3): 4 entries, 32-byte aligned (hardware requirement for the
/// CR3-referenced table).
#[doc(alias = "PDPT")]
#[derive(Copy, Clone)]
#[repr(C, align(32))]
pub struct PageDirectoryPointerTable {
    entries: [Pdpte; 4],
}

impl PageDirectoryPointerTable {
    /// Number of entries.
    pub const LEN: usize = 4;

    /// Create a fully zeroed PDPT (all entries non-present).
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [Pdpte::zero(); 4],
        }
    }

    /// Read the entry at `i`.
    #[inline]
    #[must_use]
    pub const fn get(&self, i: L3Index) -> Pdpte {
        self.entries[i.as_usize()]
    }

    /// Write the entry at `i`.
    #[inline]
    pub const fn set(&mut self, i: L3Index, e: Pdpte) {
        self.entries[i.as_usize()] = e;
    }

    /// Bit-copy another PDPT into this one.
    #[inline]
    pub const fn copy_from(&mut self, other: &Self) {
        self.entries = other.entries;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_memory_addresses::PhysicalAddress;

    #[test]
    fn pdpte_frame_round_trip() {
        let pd = PhysicalPage::<Size4K>::from_addr(PhysicalAddress::new(0x0030_0000));
        let e = Pdpte::new().with_present(true).with_physical_page(pd);
        assert!(e.present());
        assert_eq!(e.physical_page().base().as_u32(), 0x0030_0000);
        assert_eq!(e.into_bits() & PRESENT_BIT, 1);
    }

    #[test]
    fn non_present_has_no_next_table() {
        let pd = PhysicalPage::<Size4K>::from_addr(PhysicalAddress::new(0x0030_0000));
        let e = Pdpte::new().with_physical_page(pd);
        assert!(e.next_table().is_none());
    }

    #[test]
    fn pdpt_is_32_byte_aligned() {
        assert_eq!(align_of::<PageDirectoryPointerTable>(), 32);
        assert_eq!(size_of::<PageDirectoryPointerTable>(), 32);
    }
}
