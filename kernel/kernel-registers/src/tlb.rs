//! # TLB Maintenance
//!
//! Per-page invalidation via `invlpg`. Installation at boot runs before
//! paging is enabled and needs no invalidation; the flag mutator uses this
//! when it narrows permissions on an active tree.

#[cfg(all(feature = "asm", target_arch = "x86"))]
use kernel_memory_addresses::VirtualAddress;

/// Invalidate the TLB entry for the page containing `va`.
///
/// # Safety
/// Privileged instruction; requires Ring 0.
#[cfg(all(feature = "asm", target_arch = "x86"))]
pub unsafe fn flush_page(va: VirtualAddress) {
    unsafe {
        core::arch::asm!(
            "invlpg [{}]",
            in(reg) va.as_u32(),
            options(nostack, preserves_flags)
        );
    }
}

/// Flush the entire TLB by reloading CR3.
///
/// # Safety
/// Privileged; requires Ring 0 with paging enabled.
#[cfg(all(feature = "asm", feature = "cr3", target_arch = "x86"))]
pub unsafe fn flush_all() {
    use crate::{LoadRegisterUnsafe, StoreRegisterUnsafe};

    unsafe {
        let cr3 = crate::cr3::Cr3::load_unsafe();
        cr3.store_unsafe();
    }
}
