use crate::{PageSize, VirtualAddress};
use core::fmt;
use core::marker::PhantomData;

/// Virtual page base for size `S` (low `S::SHIFT` bits are zero).
///
/// A `VirtualPage<S>` represents the page-aligned base of a virtual page of
/// `S::SIZE` bytes. The counterpart of [`crate::PhysicalPage`] on the
/// translated side of the page tables.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualPage<S: PageSize> {
    base: u32,
    _phantom: PhantomData<S>,
}

impl<S: PageSize> VirtualPage<S> {
    /// Page containing `addr` (aligns down).
    #[inline]
    #[must_use]
    pub const fn from_addr(addr: VirtualAddress) -> Self {
        Self {
            base: addr.as_u32() & !(S::SIZE - 1),
            _phantom: PhantomData,
        }
    }

    /// Create from an address that must already be aligned.
    /// Panics in debug if unaligned (no runtime cost in release).
    #[inline]
    #[must_use]
    pub fn new_aligned(addr: VirtualAddress) -> Self {
        debug_assert_eq!(addr.as_u32() & (S::SIZE - 1), 0, "unaligned page address");
        Self {
            base: addr.as_u32(),
            _phantom: PhantomData,
        }
    }

    /// Return the base as a [`VirtualAddress`].
    #[inline]
    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        VirtualAddress::new(self.base)
    }

    /// Combine with an in-page offset to form a full address.
    ///
    /// The offset is masked to the page size.
    #[inline]
    #[must_use]
    pub const fn join(self, offset: u32) -> VirtualAddress {
        VirtualAddress::new(self.base + (offset & (S::SIZE - 1)))
    }

    /// The `n`-th page after this one.
    #[inline]
    #[must_use]
    pub const fn add_pages(self, n: u32) -> Self {
        Self {
            base: self.base + n * S::SIZE,
            _phantom: PhantomData,
        }
    }
}

impl<S: PageSize> fmt::Display for VirtualPage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}/{}", self.base, S::as_str())
    }
}

impl<S: PageSize> fmt::Debug for VirtualPage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualPage<{}>(0x{:08X})", S::as_str(), self.base)
    }
}

impl<S: PageSize> From<VirtualAddress> for VirtualPage<S> {
    #[inline]
    fn from(addr: VirtualAddress) -> Self {
        Self::from_addr(addr)
    }
}
