//! # Virtual Memory Protection (ia32, PAE)
//!
//! The page-table engine of the kernel: boot-time installation of the
//! virtual-memory map, per-thread page-table clones that encode a user
//! thread's memory domain, and validation of user-supplied buffer ranges.
//!
//! ## ia32 PAE Virtual Address → Physical Address Walk
//!
//! PAE tables are used solely for their per-page execute-disable bit;
//! physical addresses stay within 32 bits and only 4 KiB pages are ever
//! installed. Each 32-bit virtual address is divided into four fields:
//!
//! ```text
//! | 31‒30 | 29‒21 | 20‒12 | 11‒0   |
//! | PDPT  |   PD  |   PT  | Offset |
//! ```
//!
//! ```text
//!  PDPT  →  PD  →  PT  →  Physical Page
//!   │        │       │
//!   │        │       └───► PTE   (Page Table Entry) → maps 4 KiB page
//!   │        └───────────► PDE   (Page Directory Entry) → PS=1 → 2 MiB page
//!   └────────────────────► PDPTE (Page Directory Pointer Table Entry)
//! ```
//!
//! | Level | Table name | Entries | Description |
//! |:------|:-----------|:--------|:------------|
//! | 3 | **PDPT** (Page Directory Pointer Table) | 4 | Top level, 32-byte aligned, referenced by CR3. Each entry covers 1 GiB. |
//! | 2 | **PD** (Page Directory) | 512 | Each entry points to a PT, or (`PS=1`) maps a 2 MiB page. |
//! | 1 | **PT** (Page Table) | 512 | Each entry maps a 4 KiB physical page. |
//!
//! ## Tree identities
//!
//! - The **kernel master** tree is built once at boot from the declared
//!   memory regions and never torn down.
//! - The **user master** tree exists only under KPTI; it mirrors the kernel
//!   master's shape but hides kernel pages (all non-present except the
//!   shared trampoline page). Without KPTI it is the kernel master.
//! - Each user thread owns a **thread-private** tree, cloned from the user
//!   master into storage reserved in the thread's stack object, then
//!   overlaid with the thread's memory-domain partitions.
//!
//! ## Hardware seams
//!
//! The engine never dereferences physical addresses itself and never issues
//! privileged instructions itself. Both go through traits:
//!
//! - [`PhysMapper`] turns a physical table location into a typed reference
//!   (identity map in the kernel, simulated memory in tests).
//! - [`MmuOps`] covers the CPU side effects: the active root (CR3), per-page
//!   TLB invalidation, and the post-validation speculation barrier.

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_code, clippy::similar_names)] // pde/pte/pdpt are the domain vocabulary

mod address_space;
pub mod boot;
pub mod domain;
mod dump;
mod flags;
pub mod page_table;
mod pool;
pub mod thread;

#[cfg(target_arch = "x86")]
mod hardware;

#[cfg(test)]
mod testing;

pub use crate::address_space::{AddressSpace, UserBufferError, WalkResult};
pub use crate::dump::dump_page_tables;
pub use crate::flags::EntryFlags;
pub use crate::pool::PagePool;

#[cfg(target_arch = "x86")]
pub use crate::hardware::{DirectMapper, DirectMmu};

use crate::page_table::pd::PageDirectory;
use crate::page_table::pdpt::PageDirectoryPointerTable;
use crate::page_table::pt::PageTable;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};

/// Converts physical table locations to usable references in the current
/// address space.
///
/// The kernel maps all table storage identity (tables live in the page pool
/// and in thread stack objects, both in kernel RAM); tests substitute a
/// simulated physical memory.
pub trait PhysMapper {
    /// Convert a physical address to a mutable reference in the current
    /// address space.
    ///
    /// # Safety
    /// - `pa` must refer to mapped, writable memory holding a valid `T`
    ///   for the lifetime `'a`.
    /// - The caller must not create aliasing borrows of the same storage.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;
}

/// Typed table borrows on top of [`PhysMapper`].
pub trait PhysMapperExt: PhysMapper {
    /// Borrow the PDPT at `pa` (32-byte aligned; not necessarily a page).
    fn pdpt_mut(&self, pa: PhysicalAddress) -> &mut PageDirectoryPointerTable {
        debug_assert_eq!(pa.as_u32() & 0x1F, 0, "unaligned PDPT at {pa}");
        // Safety: table storage is owned by the paging engine; the walk
        // hands out one borrow at a time.
        unsafe { self.phys_to_mut(pa) }
    }

    /// Borrow the page directory in the frame `page`.
    fn pd_mut(&self, page: PhysicalPage<Size4K>) -> &mut PageDirectory {
        // Safety: as for `pdpt_mut`; PDs occupy exactly one 4 KiB frame.
        unsafe { self.phys_to_mut(page.base()) }
    }

    /// Borrow the page table in the frame `page`.
    fn pt_mut(&self, page: PhysicalPage<Size4K>) -> &mut PageTable {
        // Safety: as for `pdpt_mut`; PTs occupy exactly one 4 KiB frame.
        unsafe { self.phys_to_mut(page.base()) }
    }

    /// Zero the page directory in the frame `page`.
    fn zero_pd(&self, page: PhysicalPage<Size4K>) {
        *self.pd_mut(page) = PageDirectory::zeroed();
    }

    /// Zero the page table in the frame `page`.
    fn zero_pt(&self, page: PhysicalPage<Size4K>) {
        *self.pt_mut(page) = PageTable::zeroed();
    }
}

impl<M: PhysMapper> PhysMapperExt for M {}

/// CPU side effects of page-table maintenance.
///
/// Kept separate from [`PhysMapper`] so tests can observe TLB traffic and
/// the speculation barrier instead of executing privileged instructions.
pub trait MmuOps {
    /// Root (PDPT base) of the currently active tree, or `None` while paging
    /// is still disabled.
    fn active_root(&self) -> Option<PhysicalAddress>;

    /// Invalidate the TLB entry for the page containing `va`.
    fn flush_page(&self, va: VirtualAddress);

    /// Serializing fence; defeats bounds-check-bypass speculation on the
    /// validator's success path.
    fn speculation_barrier(&self);
}
