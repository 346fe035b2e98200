//! # Page-Table Dump
//!
//! Human-readable dump of a full tree, one character per entry:
//! `.` absent, `r` read-only, `x` read-execute, `w` read-write,
//! `a` read-write-execute; uppercase when user-accessible. The flag bits
//! checked sit at the same positions at every level, so a single decoder
//! serves PDPTEs, PDEs and PTEs alike.

#![allow(clippy::cast_possible_truncation)] // table indices are < 512

use crate::address_space::AddressSpace;
use crate::page_table::pd::{L2Index, PdEntryKind, PageDirectory};
use crate::page_table::pdpt::{L3Index, PageDirectoryPointerTable};
use crate::page_table::pt::{L1Index, PageTable};
use crate::{EntryFlags, PhysMapper, PhysMapperExt};
use core::fmt;
use kernel_info::memory::{PD_COVERAGE, PT_COVERAGE};
use kernel_memory_addresses::{PhysicalPage, Size4K};
use log::debug;

/// Entries per output row for PD/PT bodies.
const COLUMNS: usize = 64;

/// Single-character code for one entry's permission bits.
fn entry_code(value: u64) -> char {
    let flags = EntryFlags::from_bits_retain(value);
    if !flags.contains(EntryFlags::PRESENT) {
        return '.';
    }

    let code = match (
        flags.contains(EntryFlags::WRITE),
        flags.contains(EntryFlags::EXECUTE_DISABLE),
    ) {
        (true, true) => 'w',
        (true, false) => 'a',
        (false, true) => 'r',
        (false, false) => 'x',
    };

    if flags.contains(EntryFlags::USER) {
        code.to_ascii_uppercase()
    } else {
        code
    }
}

/// One row of entry codes.
struct Row<'a>(&'a [char]);

impl fmt::Display for Row<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &c in self.0 {
            fmt::Write::write_char(f, c)?;
        }
        Ok(())
    }
}

/// Log the codes of `entries` in [`COLUMNS`]-wide rows.
fn dump_rows(entries: impl Iterator<Item = u64>) {
    let mut row = ['.'; COLUMNS];
    let mut column = 0;
    for value in entries {
        row[column] = entry_code(value);
        column += 1;
        if column == COLUMNS {
            debug!("{}", Row(&row));
            column = 0;
        }
    }
    if column != 0 {
        debug!("{}", Row(&row[..column]));
    }
}

fn dump_pt<M: PhysMapper>(mapper: &M, page: PhysicalPage<Size4K>, base: u32, index: usize) {
    let end = base + (PT_COVERAGE - 1);
    debug!("page table {index} for {base:#010x} - {end:#010x} at {}", page.base());

    let pt: &PageTable = mapper.pt_mut(page);
    dump_rows((0..PageTable::LEN).map(|i| pt.get(L1Index::new(i as u16)).into_bits()));
}

fn dump_pd<M: PhysMapper>(mapper: &M, page: PhysicalPage<Size4K>, base: u32, index: usize) {
    let end = base + (PD_COVERAGE - 1);
    debug!("page directory {index} for {base:#010x} - {end:#010x} at {}", page.base());

    let pd: &PageDirectory = mapper.pd_mut(page);
    dump_rows((0..PageDirectory::LEN).map(|i| pd.get(L2Index::new(i as u16)).into_bits()));

    for i in 0..PageDirectory::LEN {
        // 2 MiB leaves and absent entries have no page table to descend to.
        if let Some(PdEntryKind::NextPageTable(pt_page, _)) =
            pd.get(L2Index::new(i as u16)).kind()
        {
            dump_pt(mapper, pt_page, base + (i as u32) * PT_COVERAGE, i);
        }
    }
}

/// Dump the whole hierarchy reachable from `space`.
pub fn dump_page_tables<M: PhysMapper>(space: &AddressSpace<'_, M>) {
    let mapper = space.mapper();
    let pdpt: &PageDirectoryPointerTable = mapper.pdpt_mut(space.root());

    debug!(
        "page directory pointer table for 0x00000000 - 0xFFFFFFFF at {}",
        space.root()
    );
    dump_rows((0..PageDirectoryPointerTable::LEN).map(|i| pdpt.get(L3Index::new(i as u8)).into_bits()));

    for i in 0..PageDirectoryPointerTable::LEN {
        if let Some(pd_page) = pdpt.get(L3Index::new(i as u8)).next_table() {
            dump_pd(mapper, pd_page, (i as u32) * PD_COVERAGE, i);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_cover_the_permission_grid() {
        let p = EntryFlags::PRESENT.bits();
        let w = EntryFlags::WRITE.bits();
        let u = EntryFlags::USER.bits();
        let xd = EntryFlags::EXECUTE_DISABLE.bits();

        assert_eq!(entry_code(0), '.');
        assert_eq!(entry_code(w | xd), '.', "non-present ignores other bits");
        assert_eq!(entry_code(p | xd), 'r');
        assert_eq!(entry_code(p), 'x');
        assert_eq!(entry_code(p | w | xd), 'w');
        assert_eq!(entry_code(p | w), 'a');
        assert_eq!(entry_code(p | w | u), 'A');
        assert_eq!(entry_code(p | u | xd), 'R');
    }
}
