//! # Per-Thread Page Tables
//!
//! A user thread runs on a private table tree derived from the user master.
//! The tree's storage is reserved at the front of the thread's stack
//! object: first the thread-private PDs, then the PTs, then the PDPT —
//! sized for the window of the address space a user thread can ever reach
//! (all of system RAM). The layout of the stack object:
//!
//! ```text
//! +---------------------------+  <- stack object base
//! | PD(0) .. PD(N-1)          |
//! +---------------------------+
//! | PT(0) .. PT(M-1)          |
//! +---------------------------+
//! | PDPT                      |  <- base + THREAD_PDPT_OFFSET
//! +---------------------------+
//! | stack guard, stack, ...   |
//! +---------------------------+
//! ```
//!
//! Cloning bit-copies the master tables and then redirects the PDPTE/PDE
//! links into the private storage, so the thread shares nothing writable
//! with the master inside the window. The tree storage dies with the stack
//! object; nothing is ever freed explicitly.

use crate::address_space::{AddressSpace, UserBufferError};
use crate::domain::{MemDomain, apply_mem_domain};
use crate::page_table::pd::PdEntry;
use crate::page_table::pdpt::L3Index;
use crate::page_table::split_indices;
use crate::{EntryFlags, MmuOps, PhysMapper, PhysMapperExt};
use bitflags::bitflags;
use kernel_info::memory::{
    PD_COVERAGE, PT_COVERAGE, THREAD_PDPT_OFFSET, USER_NUM_PD, USER_NUM_PT, USER_PD_START,
    USER_PT_START,
};
use kernel_memory_addresses::{PageSize, PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};

bitflags! {
    /// Thread option bits consumed by this subsystem.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct ThreadOptions: u32 {
        /// The thread executes in user mode and owns per-thread tables.
        const USER = 1 << 0;
    }
}

/// The slice of a thread the paging engine consumes: its options, the
/// stack object carrying the reserved table area, and the stack range the
/// thread gets write access to.
///
/// Scheduling state, domain membership lists and the domain back-pointer
/// stay with the scheduler's thread structures; the membership operations
/// in [`crate::domain`] take the member set explicitly.
pub struct Thread {
    options: ThreadOptions,
    /// Page-aligned stack object; tables live at its front.
    stack_obj: PhysicalPage<Size4K>,
    stack_start: VirtualAddress,
    stack_size: u32,
}

impl Thread {
    /// Describe a thread whose stack object lives at `stack_obj`.
    #[must_use]
    pub const fn new(
        options: ThreadOptions,
        stack_obj: PhysicalPage<Size4K>,
        stack_start: VirtualAddress,
        stack_size: u32,
    ) -> Self {
        Self {
            options,
            stack_obj,
            stack_start,
            stack_size,
        }
    }

    /// Whether this thread runs in user mode.
    #[inline]
    #[must_use]
    pub const fn is_user(&self) -> bool {
        self.options.contains(ThreadOptions::USER)
    }

    /// Location of the thread-private PDPT.
    #[inline]
    #[must_use]
    pub fn tables_root(&self) -> PhysicalAddress {
        self.stack_obj.base() + THREAD_PDPT_OFFSET
    }

    /// First frame of the reserved PD/PT area.
    #[inline]
    #[must_use]
    pub const fn table_area(&self) -> PhysicalPage<Size4K> {
        self.stack_obj
    }

    /// The thread's private tree.
    #[inline]
    #[must_use]
    pub fn page_tables<'m, M: PhysMapper>(&self, mapper: &'m M) -> AddressSpace<'m, M> {
        AddressSpace::from_root(mapper, self.tables_root())
    }

    /// Start of the thread's stack range.
    #[inline]
    #[must_use]
    pub const fn stack_start(&self) -> VirtualAddress {
        self.stack_start
    }

    /// Size of the thread's stack range in bytes.
    #[inline]
    #[must_use]
    pub const fn stack_size(&self) -> u32 {
        self.stack_size
    }
}

/// Derive `thread`'s private tree from `master`.
///
/// The master PDPT is bit-copied, then every PD and PT covering the user
/// window is bit-copied into the thread's reserved storage and the parent
/// link redirected there. Window slots the master leaves non-present stay
/// non-present (their storage page is zeroed). There are no preconditions
/// on the prior contents of the thread's table area.
///
/// # Panics
/// If the thread's tree is the currently active one (live tables are never
/// rewritten while being walked), or if the reserved PDPT slot is not
/// 32-byte aligned.
#[allow(clippy::cast_possible_truncation)]
pub fn copy_page_tables<M: PhysMapper>(
    mapper: &M,
    mmu: &impl MmuOps,
    thread: &Thread,
    master: &AddressSpace<'_, M>,
) {
    let root = thread.tables_root();
    assert!(
        mmu.active_root() != Some(root),
        "thread tables at {root} are active"
    );
    assert!(
        root.as_u32() & 0x1F == 0,
        "unaligned thread page tables at {root}"
    );

    let thread_pdpt = mapper.pdpt_mut(root);
    thread_pdpt.copy_from(master.pdpt_mut());

    // Cursor over the reserved pages at the front of the stack object. The
    // slot order is fixed (PDs, then PTs), so the area size is a layout
    // constant.
    let mut pos = thread.table_area();

    // Private page directories, wired up in the thread's PDPT.
    for n in 0..USER_NUM_PD {
        let va = VirtualAddress::new(USER_PD_START + n as u32 * PD_COVERAGE);
        let i3 = L3Index::from(va);
        let pdpte = thread_pdpt.get(i3);

        if let Some(master_pd) = pdpte.next_table() {
            mapper.pd_mut(pos).copy_from(mapper.pd_mut(master_pd));
            thread_pdpt.set(i3, pdpte.with_physical_page(pos));
        } else {
            mapper.zero_pd(pos);
        }
        pos = pos.add_pages(1);
    }

    // Private page tables, wired up in the now-private directories.
    for n in 0..USER_NUM_PT {
        let va = VirtualAddress::new(USER_PT_START + n as u32 * PT_COVERAGE);
        let (i3, i2, _) = split_indices(va);

        let occupied = if let Some(pd_page) = thread_pdpt.get(i3).next_table() {
            let pd = mapper.pd_mut(pd_page);
            let pde = pd.get(i2).table_entry();
            if pde.present() {
                mapper
                    .pt_mut(pos)
                    .copy_from(mapper.pt_mut(pde.physical_page()));
                pd.set(i2, PdEntry::new_entry(pde.with_physical_page(pos)));
                true
            } else {
                false
            }
        } else {
            false
        };

        if !occupied {
            mapper.zero_pt(pos);
        }
        pos = pos.add_pages(1);
    }
}

/// Set up the per-thread page tables of a thread entering user mode: clone
/// the user master, grant the thread RW access to its own stack buffer,
/// and overlay its memory domain (when it has one), so that activating the
/// tree on context switch needs nothing further.
pub fn thread_pt_init<M: PhysMapper>(
    mapper: &M,
    mmu: &impl MmuOps,
    thread: &Thread,
    user_master: &AddressSpace<'_, M>,
    domain: Option<&MemDomain>,
) {
    copy_page_tables(mapper, mmu, thread, user_master);

    let space = thread.page_tables(mapper);
    space.set_flags(
        mmu,
        thread.stack_start(),
        thread.stack_size().next_multiple_of(Size4K::SIZE),
        EntryFlags::PRESENT | EntryFlags::WRITE | EntryFlags::USER,
        EntryFlags::PRESENT.union(EntryFlags::perm_mask()),
        false,
    );

    if let Some(domain) = domain {
        apply_mem_domain(mmu, &space, domain);
    }
}

/// Validate a user-supplied buffer against `thread`'s tree.
///
/// Called on every kernel entry that is about to dereference a
/// user-provided pointer, with the currently scheduled thread.
///
/// # Errors
/// [`UserBufferError`] when any page of the range is non-present, not
/// user-accessible, or (with `write`) not writable.
pub fn validate_user_buffer<M: PhysMapper>(
    mapper: &M,
    mmu: &impl MmuOps,
    thread: &Thread,
    addr: VirtualAddress,
    size: u32,
    write: bool,
) -> Result<(), UserBufferError> {
    thread
        .page_tables(mapper)
        .validate(mmu, addr, size, write)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Env, TestPhys};
    use kernel_info::memory::PHYS_RAM_BASE;

    const STACK_START: u32 = 0x0030_0000;
    const STACK_SIZE: u32 = 0x4000;
    const USER_TEXT: u32 = 0x1000;

    fn va(addr: u32) -> VirtualAddress {
        VirtualAddress::new(addr)
    }

    /// Build a user-master template: user-visible text plus (hidden)
    /// kernel RAM covering the stack and partition ranges.
    fn build_user_master(env: &Env) -> AddressSpace<'_, TestPhys> {
        let master = env.user_master();
        let mut pool = env.pool();

        master.install_region(&mut pool, va(USER_TEXT), 0x2000, EntryFlags::USER, true);
        master.install_region(
            &mut pool,
            va(PHYS_RAM_BASE),
            0x0070_0000,
            EntryFlags::WRITE | EntryFlags::EXECUTE_DISABLE,
            true,
        );
        master
    }

    fn user_thread(env: &Env, n: u32) -> Thread {
        Thread::new(
            ThreadOptions::USER,
            env.thread_stack_obj(n),
            va(STACK_START),
            STACK_SIZE,
        )
    }

    #[test]
    fn table_root_is_past_the_table_area() {
        let obj = PhysicalPage::from_addr(PhysicalAddress::new(0x0020_0000));
        let t = Thread::new(ThreadOptions::USER, obj, va(STACK_START), STACK_SIZE);
        assert_eq!(t.tables_root().as_u32(), 0x0020_0000 + THREAD_PDPT_OFFSET);
        assert_eq!(t.tables_root().as_u32() & 0x1F, 0);
        assert!(t.is_user());
    }

    #[test]
    fn clone_reproduces_the_master_bit_for_bit() {
        let env = Env::new();
        let master = build_user_master(&env);
        let thread = user_thread(&env, 0);

        copy_page_tables(&env.phys, &env.mmu, &thread, &master);
        let space = thread.page_tables(&env.phys);

        // Same mapping contents...
        assert_eq!(
            Env::pte_bits(&space, USER_TEXT),
            Env::pte_bits(&master, USER_TEXT)
        );
        // ...through private table storage.
        let thread_pt = Env::pde_for(&space, USER_TEXT).physical_page();
        let master_pt = Env::pde_for(&master, USER_TEXT).physical_page();
        assert_ne!(thread_pt, master_pt);
        let area_start = thread.table_area().frame_number();
        let area_end = area_start + THREAD_PDPT_OFFSET / 4096;
        assert!((area_start..area_end).contains(&thread_pt.frame_number()));
    }

    #[test]
    fn clone_isolates_thread_and_master() {
        let env = Env::new();
        let master = build_user_master(&env);
        let thread = user_thread(&env, 0);

        copy_page_tables(&env.phys, &env.mmu, &thread, &master);
        let space = thread.page_tables(&env.phys);

        // Mutating the thread tree leaves the master untouched.
        let master_before = Env::pte_bits(&master, STACK_START);
        space.set_flags(
            &env.mmu,
            va(STACK_START),
            0x1000,
            EntryFlags::PRESENT | EntryFlags::WRITE | EntryFlags::USER,
            EntryFlags::PRESENT.union(EntryFlags::perm_mask()),
            false,
        );
        assert_eq!(Env::pte_bits(&master, STACK_START), master_before);
        assert_ne!(Env::pte_bits(&space, STACK_START), master_before);

        // And vice versa.
        let thread_before = Env::pte_bits(&space, USER_TEXT);
        master.set_flags(
            &env.mmu,
            va(USER_TEXT),
            0x1000,
            EntryFlags::PRESENT | EntryFlags::WRITE | EntryFlags::USER,
            EntryFlags::PRESENT.union(EntryFlags::perm_mask()),
            false,
        );
        assert_eq!(Env::pte_bits(&space, USER_TEXT), thread_before);
    }

    #[test]
    #[should_panic(expected = "are active")]
    fn cloning_into_the_active_tree_is_fatal() {
        let env = Env::new();
        let master = build_user_master(&env);
        let thread = user_thread(&env, 0);

        env.mmu.active.set(Some(thread.tables_root().as_u32()));
        copy_page_tables(&env.phys, &env.mmu, &thread, &master);
    }

    #[test]
    fn thread_pt_init_grants_stack_access() {
        let env = Env::new();
        let master = build_user_master(&env);
        let thread = user_thread(&env, 0);

        thread_pt_init(&env.phys, &env.mmu, &thread, &master, None);
        let space = thread.page_tables(&env.phys);

        for page in 0..STACK_SIZE / 4096 {
            let addr = STACK_START + page * 4096;
            let flags = EntryFlags::from_bits_retain(Env::pte_bits(&space, addr));
            assert!(
                flags.contains(EntryFlags::PRESENT | EntryFlags::WRITE | EntryFlags::USER),
                "stack page {addr:#x} not RW-user"
            );
        }

        // The user master still hides those kernel RAM pages.
        let master_stack = EntryFlags::from_bits_retain(Env::pte_bits(&master, STACK_START));
        assert!(!master_stack.contains(EntryFlags::PRESENT));

        assert_eq!(
            validate_user_buffer(&env.phys, &env.mmu, &thread, va(STACK_START), STACK_SIZE, true),
            Ok(())
        );
        // Beyond the stack the default policy still rejects.
        assert_eq!(
            validate_user_buffer(
                &env.phys,
                &env.mmu,
                &thread,
                va(STACK_START),
                STACK_SIZE + 0x1000,
                true
            ),
            Err(UserBufferError)
        );
    }
}
