//! # Sv39 Page Table
//!
//! A single 4 KiB table of 512 [`PageEntryBits`]. The same type serves all
//! three levels; the level is a property of the walk, not of the table.

use crate::PageEntryBits;
use kernel_info::memory::ENTRIES_PER_TABLE;

#[doc(alias = "PT")]
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageEntryBits; ENTRIES_PER_TABLE],
}

const _: () = assert!(size_of::<PageTable>() == 4096);

impl PageTable {
    /// A table with every entry invalid.
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PageEntryBits::new(); ENTRIES_PER_TABLE],
        }
    }

    /// Invalidate every entry in place.
    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(PageEntryBits::new());
    }

    /// Read the entry at `i`.
    ///
    /// Plain load; does not imply any TLB synchronization.
    #[inline]
    #[must_use]
    pub const fn get(&self, i: usize) -> PageEntryBits {
        self.entries[i]
    }

    /// Write the entry at `i`.
    ///
    /// Caller must handle any required TLB invalidation when changing active mappings.
    #[inline]
    pub const fn set(&mut self, i: usize, e: PageEntryBits) {
        self.entries[i] = e;
    }

    #[inline]
    pub const fn entry_mut(&mut self, i: usize) -> &mut PageEntryBits {
        &mut self.entries[i]
    }

    /// Valid entries with their index.
    pub fn valid_entries(&self) -> impl Iterator<Item = (usize, PageEntryBits)> + '_ {
        self.entries
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, e)| e.valid())
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::zeroed()
    }
}
