//! Static storage for the master trees and the page pool, plus the
//! entry point the boot path calls. Only meaningful on the real target,
//! where physical memory is identity-mapped.

use super::{MemoryRegion, paging_init};
use crate::address_space::AddressSpace;
use crate::hardware::DirectMapper;
use crate::page_table::pdpt::PageDirectoryPointerTable;
use crate::pool::PagePool;
use core::cell::UnsafeCell;
use kernel_info::memory::POOL_PAGES;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};
use kernel_sync::SpinLock;

/// Interior-mutable static whose contents are only ever reached through
/// the identity [`DirectMapper`], single-threaded at boot.
#[repr(transparent)]
struct TableStatic<T>(UnsafeCell<T>);

// Safety: access is confined to single-threaded boot (writes) and the
// MMU's own walks thereafter.
unsafe impl<T> Sync for TableStatic<T> {}

impl<T> TableStatic<T> {
    const fn new(inner: T) -> Self {
        Self(UnsafeCell::new(inner))
    }

    #[allow(clippy::cast_possible_truncation)] // usize == u32 on ia32
    fn phys(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.0.get() as usize as u32)
    }
}

/// Backing frames for boot-time table materialization.
#[repr(C, align(4096))]
struct PoolStorage([u8; POOL_PAGES * 4096]);

static POOL_STORAGE: TableStatic<PoolStorage> = TableStatic::new(PoolStorage([0; POOL_PAGES * 4096]));

/// The kernel master tree's PDPT.
static KERNEL_PDPT: TableStatic<PageDirectoryPointerTable> =
    TableStatic::new(PageDirectoryPointerTable::zeroed());

/// The user master tree's PDPT (consulted only under KPTI).
static USER_PDPT: TableStatic<PageDirectoryPointerTable> =
    TableStatic::new(PageDirectoryPointerTable::zeroed());

/// The boot-time page pool. Consumed monotonically; read-only once paging
/// is up.
static PAGE_POOL: SpinLock<Option<PagePool>> = SpinLock::new(None);

/// Build the master trees from the linker-collected `regions` and call
/// `enable_paging` with the kernel root.
///
/// # Panics
/// If called twice (the pool is already initialized), or on any installer
/// invariant violation.
pub fn paging_init_static(regions: &[MemoryRegion], enable_paging: impl FnOnce(PhysicalAddress)) {
    let mapper = DirectMapper;
    let kernel = AddressSpace::from_root(&mapper, KERNEL_PDPT.phys());
    let user = if kernel_info::KPTI {
        Some(AddressSpace::from_root(&mapper, USER_PDPT.phys()))
    } else {
        None
    };

    PAGE_POOL.with_lock(|slot| {
        assert!(slot.is_none(), "paging already initialized");
        let start = PhysicalPage::<Size4K>::new_aligned(POOL_STORAGE.phys());
        let pool = slot.insert(PagePool::new(start, POOL_PAGES));

        paging_init(&kernel, user.as_ref(), pool, regions, enable_paging);
    });
}
