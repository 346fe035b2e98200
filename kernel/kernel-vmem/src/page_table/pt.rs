//! # Page Table (PT / L1)
//!
//! The lowest paging level:
//!
//! - [`L1Index`]: index type for virtual-address bits `[20:12]`.
//! - [`PtEntry4k`]: a PT entry (PTE); always a 4 KiB leaf.
//! - [`PageTable`]: a 4 KiB-aligned array of 512 PTEs.
//!
//! ## Invariants
//!
//! - A non-present PTE has a zero frame field (L1TF mitigation); the flag
//!   mutator maintains this when toggling `PRESENT`.
//! - The base address stored in a PTE is 4 KiB-aligned.

use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalPage, Size4K, VirtualAddress};

/// L1 **PTE (4 KiB leaf)** — maps a single 4 KiB page.
#[bitfield(u64)]
pub struct PtEntry4k {
    /// Present (bit 0).
    pub present: bool,
    /// Writable (bit 1).
    pub writable: bool,
    /// User (bit 2).
    pub user: bool,
    /// Write-Through (bit 3).
    pub write_through: bool,
    /// Cache Disable (bit 4).
    pub cache_disable: bool,
    /// Accessed (bit 5).
    pub accessed: bool,
    /// Dirty (bit 6): set by CPU on first write.
    pub dirty: bool,
    /// PAT (bit 7) for 4 KiB mappings.
    pub pat_small: bool,
    /// Global (bit 8): TLB entry survives CR3 reload.
    pub global: bool,
    /// OS-available (bits 9..11).
    #[bits(3)]
    pub os_available_low: u8,
    /// Physical frame (bits 12..51; 4 KiB-aligned base). Zero whenever the
    /// entry is non-present.
    #[bits(40)]
    frame: u64,
    /// Reserved / ignored (bits 52..62).
    #[bits(11)]
    __ignored52_62: u16,
    /// Execute-disable (bit 63).
    pub no_execute: bool,
}

impl PtEntry4k {
    /// Set the mapped 4 KiB frame.
    #[inline]
    pub const fn set_physical_page(&mut self, page: PhysicalPage<Size4K>) {
        self.set_frame(page.frame_number() as u64);
    }

    /// Set the mapped 4 KiB frame.
    #[inline]
    #[must_use]
    pub const fn with_physical_page(mut self, page: PhysicalPage<Size4K>) -> Self {
        self.set_physical_page(page);
        self
    }

    /// The mapped 4 KiB frame. Physical addresses are clamped to 32 bits.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn physical_page(self) -> PhysicalPage<Size4K> {
        PhysicalPage::from_frame_number(self.frame() as u32)
    }

    /// Create a zero (non-present) entry.
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self::new()
    }

    /// If present, the mapped 4 KiB page and the full entry.
    #[inline]
    #[must_use]
    pub const fn page_4k(self) -> Option<(PhysicalPage<Size4K>, Self)> {
        if !self.present() {
            return None;
        }
        Some((self.physical_page(), self))
    }
}

/// Index into the Page Table (derived from VA bits `[20:12]`).
///
/// Strongly typed to avoid mixing with other levels. Range is `0..512`
/// (checked in debug builds).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct L1Index(u16);

impl L1Index {
    /// Build an index from a virtual address (extracts bits `[20:12]`).
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from(va: VirtualAddress) -> Self {
        Self::new(((va.as_u32() >> 12) & 0x1FF) as u16)
    }

    /// Construct from a raw `u16`.
    ///
    /// ### Debug assertions
    /// - Asserts `v < 512` in debug builds.
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Self {
        debug_assert!(v < 512);
        Self(v)
    }

    /// Return the index as `usize` for table access.
    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// The Page Table (L1): 512 entries, 4 KiB-aligned, covering 2 MiB.
#[doc(alias = "PT")]
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PtEntry4k; 512],
}

impl PageTable {
    /// Number of entries.
    pub const LEN: usize = 512;

    /// Create a fully zeroed Page Table (all entries non-present).
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PtEntry4k::zero(); 512],
        }
    }

    /// Read the entry at `i`.
    #[inline]
    #[must_use]
    pub const fn get(&self, i: L1Index) -> PtEntry4k {
        self.entries[i.as_usize()]
    }

    /// Write the entry at `i`.
    ///
    /// Caller handles any required TLB invalidation when changing active
    /// mappings.
    #[inline]
    pub const fn set(&mut self, i: L1Index, e: PtEntry4k) {
        self.entries[i.as_usize()] = e;
    }

    /// Bit-copy another table into this one.
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
    fn pte_4k_leaf() {
        let k4 = PhysicalPage::<Size4K>::from_addr(PhysicalAddress::new(0x0055_0000));
        let e = PtEntry4k::new()
            .with_present(true)
            .with_user(true)
            .with_no_execute(true)
            .with_physical_page(k4);

        let (p, fl) = e.page_4k().unwrap();
        assert_eq!(p.base().as_u32(), 0x0055_0000);
        assert!(fl.no_execute());
        assert!(fl.user());
        assert!(!fl.writable());
    }

    #[test]
    fn non_present_yields_no_page() {
        let k4 = PhysicalPage::<Size4K>::from_addr(PhysicalAddress::new(0x0055_0000));
        let e = PtEntry4k::new().with_physical_page(k4);
        assert!(e.page_4k().is_none());
    }

    #[test]
    fn table_node_is_one_frame() {
        assert_eq!(size_of::<PageTable>(), 4096);
        assert_eq!(align_of::<PageTable>(), 4096);
    }
}
