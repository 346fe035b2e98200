//! # Hardware Bindings (ia32)
//!
//! The real-machine implementations of the engine's seams: physical table
//! storage is identity-mapped, and the CPU side effects go through the
//! register crate.

use crate::{MmuOps, PhysMapper};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_registers::LoadRegisterUnsafe;
use kernel_registers::cr3::Cr3;
use kernel_registers::{speculation, tlb};

/// Identity mapping of physical table storage.
///
/// All tables live in kernel RAM (the page pool, the master PDPT statics,
/// thread stack objects), which the kernel maps identity, so a physical
/// address *is* the pointer.
pub struct DirectMapper;

impl PhysMapper for DirectMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        // Safety: caller guarantees `pa` is exclusive, mapped table storage;
        // identity mapping makes the address directly dereferencable.
        unsafe { &mut *(pa.as_u32() as usize as *mut T) }
    }
}

/// CPU side effects on the real MMU.
pub struct DirectMmu;

impl MmuOps for DirectMmu {
    fn active_root(&self) -> Option<PhysicalAddress> {
        // Safety: Ring 0; CR3 reads have no side effects.
        let cr3 = unsafe { Cr3::load_unsafe() };
        let root = cr3.pdpt_phys();
        if root.as_u32() == 0 {
            // Paging not set up yet.
            None
        } else {
            Some(root)
        }
    }

    fn flush_page(&self, va: VirtualAddress) {
        // Safety: Ring 0.
        unsafe { tlb::flush_page(va) }
    }

    fn speculation_barrier(&self) {
        speculation::barrier();
    }
}
