//! # Kernel Configuration
//!
//! Compile-time knobs and memory-layout facts shared across the kernel
//! crates. Everything here is a constant; the build either fits together or
//! fails the assertions at the bottom of [`memory`].

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod memory;

/// Kernel page-table isolation (Meltdown mitigation).
///
/// When enabled, boot builds a second, user-visible master tree in which all
/// kernel pages except [`memory::SHARED_TRAMPOLINE_PAGE`] are non-present,
/// and partition application also toggles the present bit.
pub const KPTI: bool = cfg!(feature = "kpti");

/// Serializing fence after user-buffer validation (Spectre v1 bounds-check
/// bypass mitigation).
pub const BOUNDS_CHECK_BYPASS_MITIGATION: bool = cfg!(feature = "bcb-mitigation");
