//! Shared test fixtures: a simulated physical memory in place of the
//! identity map, and a recording [`MmuOps`] so TLB traffic and the
//! speculation barrier become observable.

#![allow(clippy::cast_possible_truncation)]

use crate::address_space::{AddressSpace, WalkResult};
use crate::page_table::pd::{L2Index, Pde};
use crate::page_table::pdpt::L3Index;
use crate::pool::PagePool;
use crate::{MmuOps, PhysMapper, PhysMapperExt};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};
use std::cell::{Cell, RefCell, UnsafeCell};

/// A 4 KiB-aligned raw frame backing the simulated physical memory.
#[repr(align(4096))]
struct Aligned4K(UnsafeCell<[u8; 4096]>);

impl Aligned4K {
    fn new_zeroed() -> Self {
        Self(UnsafeCell::new([0u8; 4096]))
    }
}

/// Simulated physical memory: `frames.len()` frames starting at physical
/// address 0. The mapper resolves a physical address to a pointer into the
/// owning frame on every call, so nothing is cached across mutations.
pub struct TestPhys {
    frames: Vec<Aligned4K>,
}

impl TestPhys {
    pub fn with_frames(n: usize) -> Self {
        let mut frames = Vec::with_capacity(n);
        for _ in 0..n {
            frames.push(Aligned4K::new_zeroed());
        }
        Self { frames }
    }
}

impl PhysMapper for TestPhys {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let idx = (pa.as_u32() >> 12) as usize;
        let off = (pa.as_u32() & 0xFFF) as usize;
        assert!(idx < self.frames.len(), "phys {pa} outside simulated RAM");

        // Safety: the frame is interior-mutable storage owned by `self`;
        // the test promises `T` matches the bytes and borrows don't alias.
        unsafe { &mut *self.frames[idx].0.get().cast::<u8>().add(off).cast::<T>() }
    }
}

/// Recording MMU: remembers flushed pages, barrier executions and lets a
/// test pretend some root is active.
#[derive(Default)]
pub struct TestMmu {
    pub active: Cell<Option<u32>>,
    pub flushes: RefCell<Vec<u32>>,
    pub barriers: Cell<usize>,
}

impl MmuOps for TestMmu {
    fn active_root(&self) -> Option<PhysicalAddress> {
        self.active.get().map(PhysicalAddress::new)
    }

    fn flush_page(&self, va: VirtualAddress) {
        self.flushes.borrow_mut().push(va.as_u32());
    }

    fn speculation_barrier(&self) {
        self.barriers.set(self.barriers.get() + 1);
    }
}

/// Fixed carve-up of the simulated physical memory.
pub const KERNEL_ROOT_FRAME: u32 = 0;
pub const USER_ROOT_FRAME: u32 = 1;
pub const POOL_FIRST_FRAME: u32 = 2;
pub const POOL_FRAMES: usize = 64;
/// First frame available for thread stack objects.
pub const THREAD_AREA_FIRST_FRAME: u32 = POOL_FIRST_FRAME + POOL_FRAMES as u32;
/// Frames consumed per thread stack object (tables + PDPT page).
pub const THREAD_OBJ_FRAMES: u32 =
    kernel_info::memory::THREAD_TABLES_SIZE / kernel_info::memory::PAGE_SIZE;

/// Simulated memory plus recording MMU, large enough for two master trees,
/// the page pool and a few thread stack objects.
pub struct Env {
    pub phys: TestPhys,
    pub mmu: TestMmu,
}

impl Env {
    pub fn new() -> Self {
        Self {
            phys: TestPhys::with_frames(256),
            mmu: TestMmu::default(),
        }
    }

    pub fn pool(&self) -> PagePool {
        PagePool::new(
            PhysicalPage::from_frame_number(POOL_FIRST_FRAME),
            POOL_FRAMES,
        )
    }

    /// A cleared tree rooted in the given frame.
    pub fn master(&self, frame: u32) -> AddressSpace<'_, TestPhys> {
        let space = AddressSpace::from_root(
            &self.phys,
            PhysicalPage::<Size4K>::from_frame_number(frame).base(),
        );
        space.clear_root();
        space
    }

    pub fn kernel_master(&self) -> AddressSpace<'_, TestPhys> {
        self.master(KERNEL_ROOT_FRAME)
    }

    pub fn user_master(&self) -> AddressSpace<'_, TestPhys> {
        self.master(USER_ROOT_FRAME)
    }

    /// Raw PTE bits for `addr`, panicking when the chain is missing.
    pub fn pte_bits(space: &AddressSpace<'_, TestPhys>, addr: u32) -> u64 {
        match space.walk(VirtualAddress::new(addr)) {
            WalkResult::L1 { pte, .. } => pte.into_bits(),
            _ => panic!("no PTE chain at {addr:#x}"),
        }
    }

    /// The non-leaf PDE covering `addr`, panicking when absent.
    pub fn pde_for(space: &AddressSpace<'_, TestPhys>, addr: u32) -> Pde {
        let va = VirtualAddress::new(addr);
        let pd_page = space
            .pdpt_mut()
            .get(L3Index::from(va))
            .next_table()
            .expect("no PD");
        space.mapper().pd_mut(pd_page).get(L2Index::from(va)).table_entry()
    }

    /// Stack-object base frame for the `n`-th test thread, with the
    /// reserved table area zero-initialized (fresh stack object).
    pub fn thread_stack_obj(&self, n: u32) -> PhysicalPage<Size4K> {
        let first = THREAD_AREA_FIRST_FRAME + n * THREAD_OBJ_FRAMES;
        for frame in first..first + THREAD_OBJ_FRAMES {
            let page = PhysicalPage::<Size4K>::from_frame_number(frame);
            // Safety: the frame is inside the simulated memory and no other
            // borrow of it is alive here.
            unsafe {
                *self.phys.phys_to_mut::<[u8; 4096]>(page.base()) = [0; 4096];
            }
        }
        PhysicalPage::from_frame_number(first)
    }
}
