//! # Memory Domains
//!
//! A memory domain describes the address ranges a set of user threads may
//! access, as a list of `(start, size, attr)` partitions confined to system
//! RAM. This module translates domains into page-level permission bits in
//! the member threads' private trees.
//!
//! The partition array is sparse: a slot with `size == 0` is a tombstone
//! left by a removed partition, while `num_partitions` counts live entries.
//! Ids are slot indices and stay stable across removals of other slots.
//! [`MemDomain::live_partitions`] is the one place that walks the array, so
//! the tombstone-scan subtlety exists exactly once.
//!
//! Membership is owned by the scheduler; the operations that iterate
//! "every thread in the domain" take the member set as a slice. All of
//! them only touch the threads' tables through the mapper, never the
//! [`Thread`] values themselves.

use crate::address_space::{AddressSpace, WalkResult};
use crate::thread::Thread;
use crate::{EntryFlags, MmuOps, PhysMapper};
use kernel_info::KPTI;
use kernel_info::memory::{MAX_DOMAIN_PARTITIONS, PHYS_RAM_BASE, PHYS_RAM_END};
use kernel_memory_addresses::{PageSize, Size4K, VirtualAddress};

/// One contiguous range of user-accessible memory with its permission
/// bits, in the same encoding as PTE flags.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MemPartition {
    /// 4 KiB-aligned start address.
    pub start: VirtualAddress,
    /// 4 KiB-aligned size in bytes; zero marks a tombstone slot.
    pub size: u32,
    /// Permission bits within [`EntryFlags::perm_mask`].
    pub attr: EntryFlags,
}

impl MemPartition {
    /// A live partition.
    #[must_use]
    pub const fn new(start: VirtualAddress, size: u32, attr: EntryFlags) -> Self {
        Self { start, size, attr }
    }

    /// The tombstone value.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            start: VirtualAddress::new(0),
            size: 0,
            attr: EntryFlags::empty(),
        }
    }

    /// Whether this slot is a tombstone.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }
}

impl Default for MemPartition {
    fn default() -> Self {
        Self::empty()
    }
}

/// A memory domain: a sparse array of partitions and its live count.
pub struct MemDomain {
    partitions: [MemPartition; MAX_DOMAIN_PARTITIONS],
    num_partitions: usize,
}

impl MemDomain {
    /// A domain with no partitions.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            partitions: [MemPartition::empty(); MAX_DOMAIN_PARTITIONS],
            num_partitions: 0,
        }
    }

    /// Number of live partitions.
    #[inline]
    #[must_use]
    pub const fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    /// The partition in slot `id`.
    ///
    /// # Panics
    /// If `id` is out of range.
    #[inline]
    #[must_use]
    pub fn partition(&self, id: usize) -> &MemPartition {
        &self.partitions[id]
    }

    /// Place `partition` in the first free slot, returning its id, or
    /// `None` when the domain already holds [`max_partitions`] entries.
    ///
    /// # Panics
    /// If the partition is empty or not 4 KiB-aligned.
    pub fn insert(&mut self, partition: MemPartition) -> Option<usize> {
        assert!(!partition.is_empty(), "empty partition");
        assert!(
            partition.start.is_aligned::<Size4K>(),
            "unaligned partition start {}",
            partition.start
        );
        assert!(
            partition.size.is_multiple_of(Size4K::SIZE),
            "unaligned partition size {:#x}",
            partition.size
        );

        let id = self.partitions.iter().position(MemPartition::is_empty)?;
        self.partitions[id] = partition;
        self.num_partitions += 1;
        Some(id)
    }

    /// Turn slot `id` into a tombstone, returning the removed partition.
    ///
    /// # Panics
    /// If slot `id` is not live.
    pub fn remove(&mut self, id: usize) -> MemPartition {
        let partition = self.partitions[id];
        assert!(!partition.is_empty(), "removing empty partition slot {id}");
        self.partitions[id] = MemPartition::empty();
        self.num_partitions -= 1;
        partition
    }

    /// Iterate `(id, partition)` over the live slots, scanning past
    /// tombstones until the live count is exhausted.
    pub fn live_partitions(&self) -> impl Iterator<Item = (usize, &MemPartition)> {
        self.partitions
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.is_empty())
            .take(self.num_partitions)
    }
}

impl Default for MemDomain {
    fn default() -> Self {
        Self::new()
    }
}

/// The configured partition cap per domain.
#[inline]
#[must_use]
pub const fn max_partitions() -> usize {
    MAX_DOMAIN_PARTITIONS
}

/// Overlay one partition onto a tree.
///
/// Under KPTI the present bit travels with the permissions: the user
/// master holds RAM pages non-present, and granting a partition is what
/// makes them visible to the thread.
fn apply_mem_partition<M: PhysMapper>(
    mmu: &impl MmuOps,
    space: &AddressSpace<'_, M>,
    partition: &MemPartition,
) {
    let (attr, mask) = if KPTI {
        (
            partition.attr | EntryFlags::PRESENT,
            EntryFlags::perm_mask() | EntryFlags::PRESENT,
        )
    } else {
        (partition.attr, EntryFlags::perm_mask())
    };

    assert!(
        partition.start.as_u32() >= PHYS_RAM_BASE,
        "partition at {}[{:#x}] extends below system RAM start {PHYS_RAM_BASE:#010x}",
        partition.start,
        partition.size
    );
    assert!(
        u64::from(partition.start.as_u32()) + u64::from(partition.size) <= u64::from(PHYS_RAM_END),
        "partition at {}[{:#x}] extends beyond system RAM end {PHYS_RAM_END:#010x}",
        partition.start,
        partition.size
    );

    space.set_flags(mmu, partition.start, partition.size, attr, mask, false);
}

/// Return every page of `partition` to the default policy by bit-copying
/// the PTEs from the user master back into the thread tree.
fn reset_mem_partition<M: PhysMapper>(
    thread_space: &AddressSpace<'_, M>,
    user_master: &AddressSpace<'_, M>,
    partition: &MemPartition,
) {
    let addr = partition.start;
    assert!(addr.is_aligned::<Size4K>(), "unaligned address {addr}");
    assert!(
        partition.size.is_multiple_of(Size4K::SIZE),
        "unaligned size {:#x}",
        partition.size
    );

    for page in 0..(partition.size >> Size4K::SHIFT) {
        let va = addr + (page << Size4K::SHIFT);

        let WalkResult::L1 { pte: master_pte, .. } = user_master.walk(va) else {
            panic!("partition reset: no master mapping chain at {va}");
        };
        let WalkResult::L1 { pt, i1, .. } = thread_space.walk(va) else {
            panic!("partition reset: no thread mapping chain at {va}");
        };

        pt.set(i1, master_pte);
    }
}

/// Overlay every live partition of `domain` onto a tree.
pub fn apply_mem_domain<M: PhysMapper>(
    mmu: &impl MmuOps,
    space: &AddressSpace<'_, M>,
    domain: &MemDomain,
) {
    for (_, partition) in domain.live_partitions() {
        apply_mem_partition(mmu, space, partition);
    }
}

/// A partition was added to `domain`: overlay it onto every user thread in
/// `members`.
pub fn partition_add<M: PhysMapper>(
    mapper: &M,
    mmu: &impl MmuOps,
    domain: &MemDomain,
    id: usize,
    members: &[Thread],
) {
    let partition = domain.partition(id);
    for thread in members.iter().filter(|t| t.is_user()) {
        apply_mem_partition(mmu, &thread.page_tables(mapper), partition);
    }
}

/// A partition is being removed from `domain`: reset its range to the user
/// master defaults in every user thread in `members`.
pub fn partition_remove<M: PhysMapper>(
    mapper: &M,
    domain: &MemDomain,
    id: usize,
    user_master: &AddressSpace<'_, M>,
    members: &[Thread],
) {
    let partition = domain.partition(id);
    for thread in members.iter().filter(|t| t.is_user()) {
        reset_mem_partition(&thread.page_tables(mapper), user_master, partition);
    }
}

/// `thread` joined `domain`: overlay the domain onto its tree.
///
/// Supervisor threads have no per-thread tables; the overlay happens if
/// the thread later drops to user mode.
pub fn thread_add<M: PhysMapper>(
    mapper: &M,
    mmu: &impl MmuOps,
    thread: &Thread,
    domain: &MemDomain,
) {
    if !thread.is_user() {
        return;
    }
    apply_mem_domain(mmu, &thread.page_tables(mapper), domain);
}

/// `thread` left `domain`: reset every live partition range in its tree to
/// the user master defaults.
pub fn thread_remove<M: PhysMapper>(
    mapper: &M,
    thread: &Thread,
    domain: &MemDomain,
    user_master: &AddressSpace<'_, M>,
) {
    if !thread.is_user() {
        return;
    }
    let space = thread.page_tables(mapper);
    for (_, partition) in domain.live_partitions() {
        reset_mem_partition(&space, user_master, partition);
    }
}

/// `domain` is going away: reset every live partition in every user member
/// thread.
pub fn domain_destroy<M: PhysMapper>(
    mapper: &M,
    domain: &MemDomain,
    user_master: &AddressSpace<'_, M>,
    members: &[Thread],
) {
    for (id, _) in domain.live_partitions() {
        partition_remove(mapper, domain, id, user_master, members);
    }
}
