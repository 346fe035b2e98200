//! # Speculation Barriers
//!
//! The user-buffer validator executes a serializing fence after its verdict
//! so a mispredicted success path cannot be used as a Spectre v1
//! bounds-check-bypass gadget.

/// Serializing load fence (`lfence`).
///
/// Safe to execute at any privilege level; the `asm` gate only keeps host
/// test builds free of inline assembly.
#[cfg(all(feature = "asm", any(target_arch = "x86", target_arch = "x86_64")))]
pub fn barrier() {
    unsafe {
        core::arch::asm!("lfence", options(nomem, nostack, preserves_flags));
    }
}
