//! # Memory Layout

#![allow(clippy::cast_possible_truncation)] // usize counts cast into u32 spans

/// Base granularity of the paging hierarchy.
pub const PAGE_SIZE: u32 = 4096;

/// Virtual span covered by one page directory (512 × 2 MiB).
pub const PD_COVERAGE: u32 = 0x4000_0000;

/// Virtual span covered by one page table (512 × 4 KiB).
pub const PT_COVERAGE: u32 = 0x0020_0000;

/// First byte of system RAM.
pub const PHYS_RAM_BASE: u32 = 0x0010_0000; // 1 MiB

/// Bytes of system RAM. The end of RAM must land on a page-table boundary
/// so the per-thread clone window tiles it exactly.
pub const PHYS_RAM_SIZE: u32 = 63 * 1024 * 1024;

/// One past the last byte of system RAM.
pub const PHYS_RAM_END: u32 = PHYS_RAM_BASE + PHYS_RAM_SIZE;

/// Whether `addr` falls inside system RAM. Memory-domain partitions are
/// restricted to this window, and KPTI filtering keys off it.
#[inline]
#[must_use]
pub const fn is_within_system_ram(addr: u32) -> bool {
    addr >= PHYS_RAM_BASE && addr < PHYS_RAM_END
}

/// The single kernel page left present in the user master tree under KPTI:
/// the entry/exit trampoline shared between both modes.
pub const SHARED_TRAMPOLINE_PAGE: u32 = PHYS_RAM_BASE;

/// Capacity of the boot-time page pool that backs intermediate page-table
/// nodes. Boot logs the pages actually consumed so this can be tuned.
pub const POOL_PAGES: usize = 64;

/// Maximum number of partitions a memory domain can carry.
pub const MAX_DOMAIN_PARTITIONS: usize = 16;

/// Start of the virtual window whose tables are cloned per user thread.
/// Aligned down from system RAM to a directory boundary.
pub const USER_PD_START: u32 = 0;

/// Page directories cloned per thread (1 GiB steps from [`USER_PD_START`]).
pub const USER_NUM_PD: usize = 1;

/// Start of the per-thread page-table clone window (2 MiB steps).
pub const USER_PT_START: u32 = 0;

/// Page tables cloned per thread, covering all of system RAM.
pub const USER_NUM_PT: usize = 32;

/// 4 KiB pages reserved at the front of every user thread's stack object:
/// the thread-private PDs, then PTs, in window order.
pub const THREAD_TABLE_PAGES: usize = USER_NUM_PD + USER_NUM_PT;

/// Offset of the thread-private PDPT inside the stack object. It occupies
/// the first 32 bytes of the page that follows the PD/PT area.
pub const THREAD_PDPT_OFFSET: u32 = THREAD_TABLE_PAGES as u32 * PAGE_SIZE;

/// Total bytes of a stack object consumed by per-thread page tables.
pub const THREAD_TABLES_SIZE: u32 = THREAD_PDPT_OFFSET + PAGE_SIZE;

const _: () = {
    assert!(PHYS_RAM_END.is_multiple_of(PT_COVERAGE));
    assert!(is_within_system_ram(SHARED_TRAMPOLINE_PAGE));
    assert!(SHARED_TRAMPOLINE_PAGE.is_multiple_of(PAGE_SIZE));
    // The clone window must tile all of system RAM.
    assert!(USER_PT_START <= PHYS_RAM_BASE);
    assert!(USER_PT_START + USER_NUM_PT as u32 * PT_COVERAGE >= PHYS_RAM_END);
    // Every cloned PT lies under a cloned PD.
    assert!(USER_PD_START <= USER_PT_START);
    assert!(
        USER_PD_START as u64 + USER_NUM_PD as u64 * PD_COVERAGE as u64
            >= USER_PT_START as u64 + USER_NUM_PT as u64 * PT_COVERAGE as u64
    );
    assert!(POOL_PAGES > 0);
    assert!(MAX_DOMAIN_PARTITIONS > 0);
};
