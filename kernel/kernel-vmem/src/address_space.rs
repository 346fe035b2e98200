//! # Address Space (PDPT-rooted table tree)
//!
//! Strongly-typed operations on one PAE table tree: the boot-time region
//! installer, the flag mutator, the user-buffer validator, and read-only
//! queries. The tree is identified by the physical location of its PDPT;
//! all table storage is reached through a [`PhysMapper`].
//!
//! ## Design
//!
//! - The installer is **monotone in permissions**: region flags are OR-ed
//!   into entries, never cleared, so overlapping region declarations are
//!   additive.
//! - Only 4 KiB mappings are ever created. 2 MiB directory leaves from
//!   externally built tables are tolerated by the validator and the
//!   queries, nothing else.
//! - Mutating an **active** tree requires TLB maintenance; the mutator
//!   issues per-page invalidations through [`MmuOps`] when asked.

use crate::flags::PTE_FRAME_MASK;
use crate::page_table::pd::{L2Index, PdEntry, PdEntryKind, Pde, Pde2M};
use crate::page_table::pdpt::{L3Index, PageDirectoryPointerTable, Pdpte};
use crate::page_table::pt::{L1Index, PageTable, PtEntry4k};
use crate::page_table::split_indices;
use crate::{EntryFlags, MmuOps, PagePool, PhysMapper, PhysMapperExt};
use kernel_info::memory::{PD_COVERAGE, PT_COVERAGE, SHARED_TRAMPOLINE_PAGE};
use kernel_info::{BOUNDS_CHECK_BYPASS_MITIGATION, KPTI};
use kernel_memory_addresses::{
    PageSize, PhysicalAddress, PhysicalPage, Size2M, Size4K, VirtualAddress,
};
use log::trace;

/// Handle to a single, concrete table tree.
pub struct AddressSpace<'m, M: PhysMapper> {
    /// Physical location of the PDPT (32-byte aligned).
    root: PhysicalAddress,
    mapper: &'m M,
}

/// Rejection verdict of the user-buffer validator.
///
/// Deliberately carries no detail: the caller decides whether to deliver a
/// fault to the user thread or fail the system call.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[error("user buffer range is not fully accessible")]
pub struct UserBufferError;

/// The point at which a read-only walk terminated.
pub enum WalkResult<'a> {
    /// Hit a 2 MiB leaf at the PDE.
    Leaf2M {
        /// Mapped 2 MiB page base.
        base: PhysicalPage<Size2M>,
        /// The leaf entry.
        entry: Pde2M,
    },
    /// Reached the PT with its index and current entry.
    L1 {
        /// The page table holding the entry.
        pt: &'a mut PageTable,
        /// Index of the entry within `pt`.
        i1: L1Index,
        /// The entry itself (may be non-present).
        pte: PtEntry4k,
    },
    /// The chain is missing at the PDPTE or PDE.
    Missing,
}

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    /// Wrap the tree whose PDPT lives at `root`.
    #[inline]
    #[must_use]
    pub const fn from_root(mapper: &'m M, root: PhysicalAddress) -> Self {
        Self { root, mapper }
    }

    /// Physical location of the PDPT.
    #[inline]
    #[must_use]
    pub const fn root(&self) -> PhysicalAddress {
        self.root
    }

    /// Zero the PDPT, making every top-level entry non-present.
    pub fn clear_root(&self) {
        *self.pdpt_mut() = PageDirectoryPointerTable::zeroed();
    }

    #[inline]
    pub(crate) fn mapper(&self) -> &'m M {
        self.mapper
    }

    /// Borrow this tree's PDPT.
    #[inline]
    pub(crate) fn pdpt_mut(&self) -> &mut PageDirectoryPointerTable {
        self.mapper.pdpt_mut(self.root)
    }

    /// Resolve `va` to the point where its translation terminates.
    pub(crate) fn walk(&self, va: VirtualAddress) -> WalkResult<'_> {
        let (i3, i2, i1) = split_indices(va);

        let Some(pd_page) = self.pdpt_mut().get(i3).next_table() else {
            return WalkResult::Missing;
        };

        match self.mapper.pd_mut(pd_page).get(i2).kind() {
            Some(PdEntryKind::Leaf2MiB(base, entry)) => WalkResult::Leaf2M { base, entry },
            Some(PdEntryKind::NextPageTable(pt_page, _)) => {
                let pt = self.mapper.pt_mut(pt_page);
                let pte = pt.get(i1);
                WalkResult::L1 { pt, i1, pte }
            }
            None => WalkResult::Missing,
        }
    }

    /// Translate `va` to a physical address if mapped.
    ///
    /// Handles 2 MiB leaves by adding the in-page offset of that size.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        match self.walk(va) {
            WalkResult::Leaf2M { base, .. } => Some(base.join(va.offset::<Size2M>())),
            WalkResult::L1 { pte, .. } => {
                let (base, _) = pte.page_4k()?;
                Some(base.join(va.offset::<Size4K>()))
            }
            WalkResult::Missing => None,
        }
    }

    /// Flag bits of the PDE and PTE covering `va`, frame fields stripped.
    ///
    /// The PTE part is empty when the walk ends early (missing chain or a
    /// 2 MiB leaf).
    #[must_use]
    pub fn get_flags(&self, va: VirtualAddress) -> (EntryFlags, EntryFlags) {
        let (i3, i2, i1) = split_indices(va);

        let Some(pd_page) = self.pdpt_mut().get(i3).next_table() else {
            return (EntryFlags::empty(), EntryFlags::empty());
        };

        let pd = self.mapper.pd_mut(pd_page);
        let raw = pd.get(i2);
        let pde_flags = EntryFlags::from_bits_retain(raw.into_bits() & !PTE_FRAME_MASK);

        match raw.kind() {
            Some(PdEntryKind::NextPageTable(pt_page, _)) => {
                let pte = self.mapper.pt_mut(pt_page).get(i1);
                let pte_flags = EntryFlags::from_bits_retain(pte.into_bits() & !PTE_FRAME_MASK);
                (pde_flags, pte_flags)
            }
            _ => (pde_flags, EntryFlags::empty()),
        }
    }

    /// Install the region `[base, base + size)` page by page, materializing
    /// PDs and PTs from `pool` as needed.
    ///
    /// `PRESENT` is added to `flags` and the software `RUNTIME_USER` bit is
    /// filtered out. Flags are OR-ed into existing entries; overlapping
    /// regions are additive in permissions. Pages are identity-mapped.
    ///
    /// With `user_table` set, the KPTI filter applies: for kernel pages the
    /// PD/PT chain still materializes, keeping the tree's shape aligned
    /// with the kernel master, but the leaf PTE stays non-present — except
    /// for the shared trampoline page.
    ///
    /// # Panics
    /// If `base` or `size` is not 4 KiB-aligned, if `size` is zero, or on
    /// pool exhaustion.
    pub fn install_region(
        &self,
        pool: &mut PagePool,
        base: VirtualAddress,
        size: u32,
        flags: EntryFlags,
        user_table: bool,
    ) {
        assert!(
            base.is_aligned::<Size4K>(),
            "unaligned region address {base}"
        );
        assert!(
            size.is_multiple_of(Size4K::SIZE),
            "unaligned region size {size:#x}"
        );
        assert!(size > 0, "empty region at {base}");

        let flags = (flags | EntryFlags::PRESENT) - EntryFlags::RUNTIME_USER;

        trace!("installing region {base}+{size:#x} flags={flags:?} user_table={user_table}");

        for page in 0..(size >> Size4K::SHIFT) {
            let va = base + (page << Size4K::SHIFT);
            self.install_page(pool, va, flags, user_table);
        }
    }

    /// Install a single page. See [`Self::install_region`].
    fn install_page(
        &self,
        pool: &mut PagePool,
        va: VirtualAddress,
        flags: EntryFlags,
        user_table: bool,
    ) {
        let (i3, i2, i1) = split_indices(va);

        // PDPTE, creating the page directory if necessary.
        let pdpt = self.pdpt_mut();
        let mut pdpte = pdpt.get(i3);
        let pd_page = if let Some(page) = pdpte.next_table() {
            page
        } else {
            let page = pool.acquire();
            self.mapper.zero_pd(page);
            pdpte.set_physical_page(page);
            page
        };
        pdpte = Pdpte::from_bits(pdpte.into_bits() | (flags & EntryFlags::pdpte_mask()).bits());
        pdpt.set(i3, pdpte);

        // PDE, creating the page table if necessary.
        let pd = self.mapper.pd_mut(pd_page);
        let mut pde = pd.get(i2).table_entry();
        let pt_page = if pde.present() {
            pde.physical_page()
        } else {
            let page = pool.acquire();
            self.mapper.zero_pt(page);
            pde.set_physical_page(page);
            page
        };
        pde = Pde::from_bits(pde.into_bits() | (flags & EntryFlags::pde_mask()).bits());

        // Execute-disable needs special handling: hardware ANDs XD down the
        // hierarchy, so the PDE may only carry it while *every* page under
        // it asks for it. The any_exec marker makes that sticky across
        // incremental region installs.
        if flags.contains(EntryFlags::EXECUTE_DISABLE) {
            if !pde.any_exec() {
                pde.set_no_execute(true);
            }
        } else {
            pde.set_any_exec(true);
            pde.set_no_execute(false);
        }
        pd.set(i2, PdEntry::new_entry(pde));

        // Under KPTI, kernel pages keep the tree shape aligned with the
        // kernel master but stay non-present in the user tree; only the
        // shared trampoline page is emitted.
        if KPTI
            && user_table
            && !flags.contains(EntryFlags::USER)
            && va.as_u32() != SHARED_TRAMPOLINE_PAGE
        {
            return;
        }

        // Finally the PTE itself; the frame is the identity-mapped page.
        let pt = self.mapper.pt_mut(pt_page);
        let mut pte = pt.get(i1);
        pte.set_physical_page(PhysicalPage::from_addr(PhysicalAddress::new(va.as_u32())));
        pte = PtEntry4k::from_bits(pte.into_bits() | (flags & EntryFlags::pte_mask()).bits());
        pt.set(i1, pte);
    }

    /// Change permission bits across `[base, base + size)` in an existing
    /// tree. The mutator never creates tables; every page in range must
    /// already have its PDPTE and PDE present.
    ///
    /// Per page:
    /// - the PDPTE and PDE pick up the level-appropriate subset of `flags`;
    /// - the PDE drops `EXECUTE_DISABLE` when `flags` does not request it;
    /// - the PTE becomes `(old & !mask) | flags`, where a `mask` touching
    ///   `PRESENT` is widened to the frame field: clearing `PRESENT` zeroes
    ///   the frame (L1TF), setting it restores the identity-mapped frame;
    /// - the TLB entry is invalidated when `flush` is set.
    ///
    /// # Panics
    /// On unaligned `base`/`size` or a non-present PDPTE/PDE in range.
    pub fn set_flags(
        &self,
        mmu: &impl MmuOps,
        base: VirtualAddress,
        size: u32,
        flags: EntryFlags,
        mask: EntryFlags,
        flush: bool,
    ) {
        assert!(base.is_aligned::<Size4K>(), "unaligned address {base}");
        assert!(size.is_multiple_of(Size4K::SIZE), "unaligned size {size:#x}");
        debug_assert!(mask.contains(flags), "flags outside mask");

        // L1TF mitigation: non-present PTEs must carry a zero frame field.
        // Widen the mask to the frame bits whenever PRESENT changes.
        let mut mask_bits = mask.bits();
        if mask.contains(EntryFlags::PRESENT) {
            mask_bits |= PTE_FRAME_MASK;
        }

        trace!("set_flags {base}+{size:#x} flags={flags:?} mask={mask:?} flush={flush}");

        for page in 0..(size >> Size4K::SHIFT) {
            let va = base + (page << Size4K::SHIFT);
            let (i3, i2, i1) = split_indices(va);

            let pdpt = self.pdpt_mut();
            let mut pdpte = pdpt.get(i3);
            assert!(pdpte.present(), "set_flags on non-present PDPTE at {va}");
            pdpte =
                Pdpte::from_bits(pdpte.into_bits() | (flags & EntryFlags::pdpte_mask()).bits());
            pdpt.set(i3, pdpte);

            let pd = self.mapper.pd_mut(pdpte.physical_page());
            let raw = pd.get(i2);
            assert!(raw.present(), "set_flags on non-present PDE at {va}");
            debug_assert!(
                !matches!(raw.kind(), Some(PdEntryKind::Leaf2MiB(..))),
                "set_flags across a 2 MiB mapping at {va}"
            );
            let mut pde = raw.table_entry();
            pde = Pde::from_bits(pde.into_bits() | (flags & EntryFlags::pde_mask()).bits());
            // Any flags that allow execution clear XD at the directory
            // level. Folding is not re-derived here; runtime permission
            // changes coarsen the PDE to "execution possible".
            if !flags.contains(EntryFlags::EXECUTE_DISABLE) {
                pde.set_no_execute(false);
            }
            pd.set(i2, PdEntry::new_entry(pde));

            let pt = self.mapper.pt_mut(pde.physical_page());
            let mut effective = flags.bits();
            // Restoring PRESENT re-establishes the identity-mapped frame;
            // clearing it leaves the widened mask to zero the frame field.
            if mask.contains(EntryFlags::PRESENT) && flags.contains(EntryFlags::PRESENT) {
                effective |= u64::from(va.as_u32());
            }
            let pte = PtEntry4k::from_bits((pt.get(i1).into_bits() & !mask_bits) | effective);
            pt.set(i1, pte);

            if flush {
                mmu.flush_page(va);
            }
        }
    }

    /// Decide whether `[addr, addr + size)` is entirely present,
    /// user-accessible and, with `want_write`, writable.
    ///
    /// Walks one PTE per 4 KiB, re-resolving through the PD and PDPT at
    /// each table boundary so ranges spanning multiple tables resolve
    /// correctly. A PDE-level 2 MiB leaf satisfies the check directly.
    ///
    /// # Errors
    /// [`UserBufferError`] on the first page that fails any check. No
    /// detail is carried; see the type docs.
    pub fn validate(
        &self,
        mmu: &impl MmuOps,
        addr: VirtualAddress,
        size: u32,
        want_write: bool,
    ) -> Result<(), UserBufferError> {
        let result = self.validate_range(addr, size, want_write);

        // A mispredicted branch on our verdict must not become a
        // bounds-check-bypass gadget: serialize before the caller can
        // dereference anything.
        if BOUNDS_CHECK_BYPASS_MITIGATION {
            mmu.speculation_barrier();
        }

        result
    }

    #[allow(clippy::cast_possible_truncation)]
    fn validate_range(
        &self,
        addr: VirtualAddress,
        size: u32,
        want_write: bool,
    ) -> Result<(), UserBufferError> {
        let mut pos = u64::from(addr.as_u32());
        let mut remaining = u64::from(size);

        while remaining > 0 {
            let va = VirtualAddress::new(pos as u32);
            let Some(pd_page) = self.pdpt_mut().get(L3Index::from(va)).next_table() else {
                return Err(UserBufferError);
            };

            let to_examine = table_max(pos, remaining, u64::from(PD_COVERAGE));
            self.validate_pd(pd_page, pos, to_examine, want_write)?;

            remaining -= to_examine;
            pos += to_examine;
        }

        Ok(())
    }

    /// Range `[pos, pos + size)` must fall within the bounds of the PD.
    #[allow(clippy::cast_possible_truncation)]
    fn validate_pd(
        &self,
        pd_page: PhysicalPage<Size4K>,
        mut pos: u64,
        size: u64,
        want_write: bool,
    ) -> Result<(), UserBufferError> {
        let pd = self.mapper.pd_mut(pd_page);
        let mut remaining = size;

        while remaining > 0 {
            let va = VirtualAddress::new(pos as u32);
            let to_examine = table_max(pos, remaining, u64::from(PT_COVERAGE));

            match pd.get(L2Index::from(va)).kind() {
                None => return Err(UserBufferError),
                Some(PdEntryKind::Leaf2MiB(_, leaf)) => {
                    // The leaf's own flags decide for the whole 2 MiB span.
                    if !leaf.user() || (want_write && !leaf.writable()) {
                        return Err(UserBufferError);
                    }
                }
                Some(PdEntryKind::NextPageTable(pt_page, pde)) => {
                    if !pde.user() || (want_write && !pde.writable()) {
                        return Err(UserBufferError);
                    }
                    self.validate_pt(pt_page, pos, to_examine, want_write)?;
                }
            }

            remaining -= to_examine;
            pos += to_examine;
        }

        Ok(())
    }

    /// Range `[pos, pos + size)` must fall within the bounds of the PT.
    #[allow(clippy::cast_possible_truncation)]
    fn validate_pt(
        &self,
        pt_page: PhysicalPage<Size4K>,
        mut pos: u64,
        size: u64,
        want_write: bool,
    ) -> Result<(), UserBufferError> {
        let pt = self.mapper.pt_mut(pt_page);
        let mut remaining = size;

        while remaining > 0 {
            let va = VirtualAddress::new(pos as u32);
            let pte = pt.get(L1Index::from(va));

            if !pte.present() || !pte.user() || (want_write && !pte.writable()) {
                return Err(UserBufferError);
            }

            // One PTE per 4 KiB page the range touches; an unaligned start
            // advances to the next page boundary first.
            let step = table_max(pos, remaining, u64::from(Size4K::SIZE));
            remaining -= step;
            pos += step;
        }

        Ok(())
    }
}

/// Bytes to examine so a step ends exactly at the enclosing table's
/// boundary: the remainder of the span containing `pos`, or `size` if that
/// is smaller.
const fn table_max(pos: u64, size: u64, span: u64) -> u64 {
    let span_remaining = span - (pos & (span - 1));
    if size < span_remaining {
        size
    } else {
        span_remaining
    }
}
