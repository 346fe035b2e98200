//! # Boot-Time Paging Bring-Up
//!
//! One-shot driver: feed the declared memory regions into the kernel
//! master tree (and, under KPTI, the user master tree), then hand the
//! kernel root to the routine that loads it and switches paging on.
//! Installation runs before paging is enabled, so no TLB maintenance is
//! needed here.

use crate::address_space::AddressSpace;
use crate::{EntryFlags, PagePool, PhysMapper};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use log::info;

#[cfg(target_arch = "x86")]
mod statics;

#[cfg(target_arch = "x86")]
pub use statics::paging_init_static;

/// One declared memory region: `[address, address + size)` mapped with
/// `flags`. The region list itself is collected by the linker from the
/// kernel image and SoC declarations.
#[derive(Copy, Clone, Debug)]
pub struct MemoryRegion {
    /// 4 KiB-aligned base (identity-mapped).
    pub address: VirtualAddress,
    /// 4 KiB-aligned size in bytes.
    pub size: u32,
    /// Permission bits; `PRESENT` is implied.
    pub flags: EntryFlags,
}

impl MemoryRegion {
    /// Describe a region.
    #[must_use]
    pub const fn new(address: VirtualAddress, size: u32, flags: EntryFlags) -> Self {
        Self {
            address,
            size,
            flags,
        }
    }
}

/// Install every region into the kernel master and, when given, the user
/// master (with KPTI filtering applied there).
pub fn install_regions<M: PhysMapper>(
    kernel_master: &AddressSpace<'_, M>,
    user_master: Option<&AddressSpace<'_, M>>,
    pool: &mut PagePool,
    regions: &[MemoryRegion],
) {
    for region in regions {
        kernel_master.install_region(pool, region.address, region.size, region.flags, false);
        if let Some(user) = user_master {
            user.install_region(pool, region.address, region.size, region.flags, true);
        }
    }
}

/// Build the master trees from `regions` and request the MMU switch-on.
///
/// `enable_paging` receives the kernel master root; it is expected to load
/// the PDPT base and set the paging enable bit.
pub fn paging_init<M: PhysMapper>(
    kernel_master: &AddressSpace<'_, M>,
    user_master: Option<&AddressSpace<'_, M>>,
    pool: &mut PagePool,
    regions: &[MemoryRegion],
    enable_paging: impl FnOnce(PhysicalAddress),
) {
    kernel_master.clear_root();
    if let Some(user) = user_master {
        user.clear_root();
    }

    install_regions(kernel_master, user_master, pool, regions);

    let free = pool.capacity() - pool.pages_used();
    if free != 0 {
        info!(
            "page pool oversized: {} of {} pages used",
            pool.pages_used(),
            pool.capacity()
        );
    }

    enable_paging(kernel_master.root());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Env;

    fn va(addr: u32) -> VirtualAddress {
        VirtualAddress::new(addr)
    }

    #[test]
    fn paging_init_builds_both_masters_and_requests_enable() {
        let env = Env::new();
        let kernel = env.kernel_master();
        let user = env.user_master();
        let mut pool = env.pool();

        let regions = [
            MemoryRegion::new(va(0x1000), 0x2000, EntryFlags::USER),
            MemoryRegion::new(
                va(0x0010_0000),
                0x3000,
                EntryFlags::WRITE | EntryFlags::EXECUTE_DISABLE,
            ),
        ];

        let mut enabled_with = None;
        paging_init(&kernel, Some(&user), &mut pool, &regions, |root| {
            enabled_with = Some(root);
        });

        assert_eq!(enabled_with, Some(kernel.root()));
        assert!(pool.pages_used() > 0);

        let present = EntryFlags::PRESENT.bits();
        // The kernel master maps everything declared.
        assert_ne!(Env::pte_bits(&kernel, 0x1000) & present, 0);
        assert_ne!(Env::pte_bits(&kernel, 0x0010_1000) & present, 0);
        // The user master shows user pages and the trampoline, hides the
        // rest of kernel RAM.
        assert_ne!(Env::pte_bits(&user, 0x1000) & present, 0);
        assert_ne!(Env::pte_bits(&user, 0x0010_0000) & present, 0);
        assert_eq!(Env::pte_bits(&user, 0x0010_1000) & present, 0);
    }

    #[test]
    fn install_regions_without_a_user_master_touches_one_tree() {
        let env = Env::new();
        let kernel = env.kernel_master();
        let mut pool = env.pool();

        let regions = [MemoryRegion::new(va(0x1000), 0x1000, EntryFlags::USER)];
        install_regions(&kernel, None, &mut pool, &regions);

        // One PD and one PT materialized.
        assert_eq!(pool.pages_used(), 2);
    }
}
