//! # Page Directory (PD / L2)
//!
//! The middle paging level:
//!
//! - [`L2Index`]: index type for virtual-address bits `[29:21]`.
//! - [`PdEntry`]: a PD entry that is either a pointer to a PT (`PS=0`) or a
//!   2 MiB leaf (`PS=1`).
//! - [`PdEntryKind`]: decoded view of an entry.
//! - [`PageDirectory`]: a 4 KiB-aligned array of 512 entries.
//!
//! ## Semantics
//!
//! The installer only ever creates `PS=0` entries (4 KiB mappings); 2 MiB
//! leaves can still appear in master tables built by external boot code and
//! are tolerated during validation.
//!
//! A non-leaf PDE aggregates `WRITE`/`USER` over its children and carries
//! the folded execute-disable state: hardware ANDs XD down the hierarchy,
//! so the PDE may only be XD when every page beneath it is. The first
//! OS-available bit (bit 9, [`Pde::any_exec`]) records that some child is
//! executable; the CPU never looks at it.

use crate::page_table::{PRESENT_BIT, PS_BIT};
use bitfield_struct::bitfield;
use kernel_memory_addresses::{PageSize, PhysicalAddress, PhysicalPage, Size2M, Size4K, VirtualAddress};

/// **Borrowed view** into an L2 PDE, chosen by the `PS` bit.
pub enum L2View {
    /// Non-leaf PDE view (PS=0).
    Entry(Pde),
    /// 2 MiB leaf PDE view (PS=1).
    Leaf2M(Pde2M),
}

/// **L2 PDE union** — overlays non-leaf [`Pde`] and leaf [`Pde2M`] on the
/// same 64-bit storage.
///
/// Prefer [`PdEntry::view`] or [`PdEntry::kind`] for typed access; they
/// check the **PS** bit and hand out the correct variant.
#[derive(Copy, Clone)]
#[repr(C)]
pub union PdEntry {
    /// Raw 64-bit storage of the entry.
    bits: u64,
    /// Non-leaf form: next-level Page Table (PS=0).
    entry: Pde,
    /// Leaf form: 2 MiB mapping (PS=1).
    leaf_2m: Pde2M,
}

/// L2 **PDE** — pointer to a **Page Table** (non-leaf; PS **= 0**).
///
/// The referenced PT base is 4 KiB-aligned.
#[bitfield(u64)]
pub struct Pde {
    /// Present (bit 0).
    pub present: bool,
    /// Writable (bit 1): aggregated over the pages beneath.
    pub writable: bool,
    /// User (bit 2): aggregated over the pages beneath.
    pub user: bool,
    /// Write-Through (bit 3).
    pub write_through: bool,
    /// Cache Disable (bit 4).
    pub cache_disable: bool,
    /// Accessed (bit 5).
    pub accessed: bool,
    /// Dirty (bit 6): **ignored** in non-leaf.
    #[bits(1)]
    __d_ignored: u8,
    /// PS (bit 7): **must be 0** in non-leaf.
    #[bits(1)]
    __ps_must_be_0: u8,
    /// Global (bit 8): **ignored** in non-leaf.
    #[bits(1)]
    __g_ignored: u8,
    /// Software (bit 9, first OS-available bit): some page beneath this
    /// entry is executable. Never exposed to hardware masks.
    pub any_exec: bool,
    /// Remaining OS-available bits (10..11).
    #[bits(2)]
    pub os_available_low: u8,
    /// Next-level PT physical frame (bits 12..51; 4 KiB-aligned base).
    #[bits(40)]
    frame: u64,
    /// Reserved / ignored (bits 52..62).
    #[bits(11)]
    __ignored52_62: u16,
    /// Execute-disable (bit 63): set iff no page beneath is executable.
    pub no_execute: bool,
}

impl Pde {
    /// Set the referenced PT frame.
    #[inline]
    pub const fn set_physical_page(&mut self, page: PhysicalPage<Size4K>) {
        self.set_frame(page.frame_number() as u64);
    }

    /// Set the referenced PT frame.
    #[inline]
    #[must_use]
    pub const fn with_physical_page(mut self, page: PhysicalPage<Size4K>) -> Self {
        self.set_physical_page(page);
        self
    }

    /// The referenced PT frame. Physical addresses are clamped to 32 bits.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn physical_page(self) -> PhysicalPage<Size4K> {
        PhysicalPage::from_frame_number(self.frame() as u32)
    }
}

/// L2 **PDE (2 MiB leaf)** — maps a single 2 MiB page (`PS = 1`).
///
/// Tolerated from externally built tables only; the installer never writes
/// this form.
#[bitfield(u64)]
pub struct Pde2M {
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
    /// Page Size (bit 7): **must be 1** for a 2 MiB leaf.
    #[bits(default = true)]
    pub(crate) page_size: bool,
    /// Global (bit 8).
    pub global: bool,
    /// OS-available (bits 9..11).
    #[bits(3)]
    pub os_available_low: u8,
    /// PAT selector for 2 MiB mappings (bit 12).
    pub pat_large: bool,
    /// Reserved (bits 13..20): must be 0.
    #[bits(8)]
    __res13_20: u8,
    /// Physical base bits 21..51 (2 MiB-aligned).
    #[bits(31)]
    frame_2m: u32,
    /// Reserved / ignored (bits 52..62).
    #[bits(11)]
    __ignored52_62: u16,
    /// Execute-disable (bit 63).
    pub no_execute: bool,
}

impl Pde2M {
    /// Set the 2 MiB page base (must be 2 MiB-aligned).
    #[inline]
    pub const fn set_physical_page(&mut self, page: PhysicalPage<Size2M>) {
        self.set_frame_2m(page.base().as_u32() >> Size2M::SHIFT);
        self.set_page_size(true);
    }

    /// Set the 2 MiB page base (must be 2 MiB-aligned).
    #[inline]
    #[must_use]
    pub const fn with_physical_page(mut self, page: PhysicalPage<Size2M>) -> Self {
        self.set_physical_page(page);
        self
    }

    /// The mapped 2 MiB page base. Clamped to 32-bit physical addresses.
    #[inline]
    #[must_use]
    pub const fn physical_page(self) -> PhysicalPage<Size2M> {
        PhysicalPage::from_addr(PhysicalAddress::new(self.frame_2m() << Size2M::SHIFT))
    }
}

/// Index into the Page Directory (derived from VA bits `[29:21]`).
///
/// Strongly typed to avoid mixing with other levels. Range is `0..512`
/// (checked in debug builds).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct L2Index(u16);

impl L2Index {
    /// Build an index from a virtual address (extracts bits `[29:21]`).
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from(va: VirtualAddress) -> Self {
        Self::new(((va.as_u32() >> 21) & 0x1FF) as u16)
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

/// Decoded PDE kind.
pub enum PdEntryKind {
    /// Non-leaf (`PS=0`): the 4 KiB-aligned PT base and the entry itself.
    NextPageTable(PhysicalPage<Size4K>, Pde),
    /// 2 MiB leaf (`PS=1`): the mapped page base and the entry itself.
    Leaf2MiB(PhysicalPage<Size2M>, Pde2M),
}

impl Default for PdEntry {
    #[inline]
    fn default() -> Self {
        Self::zero()
    }
}

impl PdEntry {
    /// Create a zero (non-present) entry.
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self { bits: 0 }
    }

    /// Wrap a non-leaf entry.
    #[inline]
    #[must_use]
    pub const fn new_entry(entry: Pde) -> Self {
        Self { entry }
    }

    /// Wrap a 2 MiB leaf entry.
    #[inline]
    #[must_use]
    pub const fn new_leaf(leaf: Pde2M) -> Self {
        Self { leaf_2m: leaf }
    }

    /// Construct from raw `bits` (no validation).
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self { bits }
    }

    /// Extract the raw `bits`.
    #[inline]
    #[must_use]
    pub const fn into_bits(self) -> u64 {
        // Safety: all variants are plain 64-bit data.
        unsafe { self.bits }
    }

    /// Whether the entry is present, independent of its form.
    #[inline]
    #[must_use]
    pub const fn present(self) -> bool {
        self.into_bits() & PRESENT_BIT != 0
    }

    /// **Typed read-only view** chosen by the **PS** bit.
    #[inline]
    #[must_use]
    pub const fn view(self) -> L2View {
        // Safety: both forms are valid interpretations of the same bits;
        // PS discriminates which one hardware would honor.
        unsafe {
            if (self.bits & PS_BIT) != 0 {
                L2View::Leaf2M(self.leaf_2m)
            } else {
                L2View::Entry(self.entry)
            }
        }
    }

    /// Decode the entry into its semantic kind, or `None` if not present.
    #[inline]
    #[must_use]
    pub const fn kind(self) -> Option<PdEntryKind> {
        if !self.present() {
            return None;
        }

        Some(match self.view() {
            L2View::Entry(entry) => PdEntryKind::NextPageTable(entry.physical_page(), entry),
            L2View::Leaf2M(entry) => PdEntryKind::Leaf2MiB(entry.physical_page(), entry),
        })
    }

    /// The non-leaf interpretation, regardless of `PS`.
    ///
    /// The installer and mutator use this; both only ever operate on 4 KiB
    /// mapping chains.
    #[inline]
    #[must_use]
    pub const fn table_entry(self) -> Pde {
        // Safety: plain 64-bit reinterpretation.
        unsafe { self.entry }
    }
}

impl From<Pde> for PdEntry {
    #[inline]
    fn from(e: Pde) -> Self {
        Self::new_entry(e)
    }
}

impl From<Pde2M> for PdEntry {
    #[inline]
    fn from(e: Pde2M) -> Self {
        Self::new_leaf(e)
    }
}

/// The Page Directory (L2): 512 entries, 4 KiB-aligned, covering 1 GiB.
#[doc(alias = "PD")]
#[repr(C, align(4096))]
pub struct PageDirectory {
    entries: [PdEntry; 512],
}

impl PageDirectory {
    /// Number of entries.
    pub const LEN: usize = 512;

    /// Create a fully zeroed Page Directory (all entries non-present).
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PdEntry::zero(); 512],
        }
    }

    /// Read the entry at `i`.
    #[inline]
    #[must_use]
    pub const fn get(&self, i: L2Index) -> PdEntry {
        self.entries[i.as_usize()]
    }

    /// Write the entry at `i`.
    ///
    /// Caller handles any required TLB invalidation when changing active
    /// mappings.
    #[inline]
    pub const fn set(&mut self, i: L2Index, e: PdEntry) {
        self.entries[i.as_usize()] = e;
    }

    /// Bit-copy another directory into this one.
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
    fn pd_table_vs_2m() {
        let pt = PhysicalPage::<Size4K>::from_addr(PhysicalAddress::new(0x0030_0000));
        let e_tbl = PdEntry::new_entry(Pde::new().with_present(true).with_physical_page(pt));
        match e_tbl.kind().unwrap() {
            PdEntryKind::NextPageTable(p, f) => {
                assert_eq!(p.base().as_u32(), 0x0030_0000);
                assert_eq!(f.into_bits() & PS_BIT, 0, "must be PS=0");
            }
            PdEntryKind::Leaf2MiB(..) => panic!("expected next PT"),
        }

        let m2 = PhysicalPage::<Size2M>::from_addr(PhysicalAddress::new(0x0040_0000));
        let e_2m = PdEntry::new_leaf(Pde2M::new().with_present(true).with_physical_page(m2));
        match e_2m.kind().unwrap() {
            PdEntryKind::Leaf2MiB(p, f) => {
                assert_eq!(p.base().as_u32(), 0x0040_0000);
                assert_ne!(f.into_bits() & PS_BIT, 0, "must be PS=1");
            }
            PdEntryKind::NextPageTable(..) => panic!("expected 2MiB leaf"),
        }
    }

    #[test]
    fn any_exec_is_bit_nine() {
        let e = Pde::new().with_any_exec(true);
        assert_eq!(e.into_bits(), 1 << 9);
    }

    #[test]
    fn non_present_entry_has_no_kind() {
        assert!(PdEntry::zero().kind().is_none());
        assert!(!PdEntry::zero().present());
    }
}
