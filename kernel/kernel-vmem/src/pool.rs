//! # Page Pool
//!
//! Storage for the table nodes materialized during boot-time region
//! installation. A fixed run of 4 KiB frames is consumed monotonically;
//! nothing is ever returned. The worst-case demand is computable from the
//! boot region list, so a linear, fail-fatal allocator keeps the paging
//! bring-up deterministic.

use kernel_memory_addresses::{PhysicalPage, Size4K};

/// Fixed-capacity, monotonically consumed pool of 4 KiB page-aligned
/// frames.
pub struct PagePool {
    /// Next frame handed out.
    next: PhysicalPage<Size4K>,
    /// Frames already consumed.
    used: usize,
    /// Total frames.
    capacity: usize,
}

impl PagePool {
    /// Pool over `capacity` frames starting at `start`.
    ///
    /// The backing storage must be owned by the caller and stay reserved
    /// for page tables for the lifetime of the trees built from it.
    #[must_use]
    pub const fn new(start: PhysicalPage<Size4K>, capacity: usize) -> Self {
        Self {
            next: start,
            used: 0,
            capacity,
        }
    }

    /// Hand out one 4 KiB frame.
    ///
    /// The frame is *not* zeroed; the walker zeroes the node it creates in
    /// it before linking it into a tree.
    ///
    /// # Panics
    /// On exhaustion. Pool capacity is a boot-configuration invariant; see
    /// the module docs.
    pub fn acquire(&mut self) -> PhysicalPage<Size4K> {
        assert!(
            self.used < self.capacity,
            "out of page-table pages (capacity {})",
            self.capacity
        );
        let page = self.next;
        self.next = self.next.add_pages(1);
        self.used += 1;
        page
    }

    /// Frames consumed so far.
    #[inline]
    #[must_use]
    pub const fn pages_used(&self) -> usize {
        self.used
    }

    /// Total frames the pool was created with.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_memory_addresses::PhysicalAddress;

    fn pool(frames: usize) -> PagePool {
        let start = PhysicalPage::from_addr(PhysicalAddress::new(0x0010_0000));
        PagePool::new(start, frames)
    }

    #[test]
    fn hands_out_consecutive_frames() {
        let mut p = pool(3);
        assert_eq!(p.acquire().base().as_u32(), 0x0010_0000);
        assert_eq!(p.acquire().base().as_u32(), 0x0010_1000);
        assert_eq!(p.acquire().base().as_u32(), 0x0010_2000);
        assert_eq!(p.pages_used(), 3);
    }

    #[test]
    #[should_panic(expected = "out of page-table pages")]
    fn exhaustion_is_fatal() {
        let mut p = pool(1);
        let _ = p.acquire();
        let _ = p.acquire();
    }
}
