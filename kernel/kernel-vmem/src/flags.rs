//! Entry flag bits and the per-level masks that gate what each table level
//! may carry.

use bitflags::bitflags;

bitflags! {
    /// Flag bits of a 64-bit PAE paging entry, plus the two software bits
    /// the engine layers on top of the hardware format.
    ///
    /// Region declarations, partition attributes and mutator arguments all
    /// use this type; the engine masks it down per level before anything is
    /// stored in a table (see [`EntryFlags::pdpte_mask`] and friends), so
    /// the software bits can never reach an entry by accident.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct EntryFlags: u64 {
        /// Entry is valid; the walk continues (or the page is mapped).
        const PRESENT = 1 << 0;
        /// Writes allowed.
        const WRITE = 1 << 1;
        /// User-mode (CPL 3) access allowed.
        const USER = 1 << 2;
        /// Write-through caching.
        const WRITE_THROUGH = 1 << 3;
        /// Caching disabled.
        const CACHE_DISABLE = 1 << 4;
        /// Directory-level leaf (2 MiB page). Never set by the installer;
        /// tolerated during validation.
        const PAGE_SIZE = 1 << 7;
        /// Software marker in a PDE's first ignored bit: some page beneath
        /// this directory entry is executable. Drives the execute-disable
        /// folding across incremental region installs.
        const ANY_EXEC = 1 << 9;
        /// Software bit consumed by the access-policy layers above; the
        /// installer filters it before touching hardware entries.
        const RUNTIME_USER = 1 << 58;
        /// Instruction fetch disallowed.
        const EXECUTE_DISABLE = 1 << 63;
    }
}

/// Frame-number field of a PTE (bits 12..51). Zeroed together with
/// `PRESENT` so non-present entries carry no stale frame (L1TF).
pub(crate) const PTE_FRAME_MASK: u64 = 0x000F_FFFF_FFFF_F000;

impl EntryFlags {
    /// Bits a PDPTE may inherit from an installed region. Hardware ignores
    /// everything but `PRESENT` at this level.
    #[must_use]
    pub const fn pdpte_mask() -> Self {
        Self::PRESENT
    }

    /// Bits a (non-leaf) PDE may inherit from an installed region.
    #[must_use]
    pub const fn pde_mask() -> Self {
        Self::PRESENT.union(Self::WRITE).union(Self::USER)
    }

    /// Bits a PTE may carry.
    #[must_use]
    pub const fn pte_mask() -> Self {
        Self::pde_mask()
            .union(Self::EXECUTE_DISABLE)
            .union(Self::WRITE_THROUGH)
            .union(Self::CACHE_DISABLE)
    }

    /// The permission bits a memory-domain partition may set.
    #[must_use]
    pub const fn perm_mask() -> Self {
        Self::WRITE.union(Self::USER).union(Self::EXECUTE_DISABLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn software_bits_stay_out_of_hardware_masks() {
        for mask in [
            EntryFlags::pdpte_mask(),
            EntryFlags::pde_mask(),
            EntryFlags::pte_mask(),
            EntryFlags::perm_mask(),
        ] {
            assert!(!mask.intersects(EntryFlags::ANY_EXEC | EntryFlags::RUNTIME_USER));
        }
    }

    #[test]
    fn pte_mask_covers_pde_mask() {
        assert!(EntryFlags::pte_mask().contains(EntryFlags::pde_mask()));
    }

    #[test]
    fn frame_mask_excludes_flag_bits() {
        let flags = EntryFlags::all().bits();
        assert_eq!(flags & PTE_FRAME_MASK, 0);
    }
}
