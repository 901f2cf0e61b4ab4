//! # Address Space (Sv39, single root table)
//!
//! Operations on one page-table tree. The handle is a root page plus the
//! [`PhysMapper`] used to reach table memory; it owns nothing else, and does
//! not synchronize: callers serialize mutations of one tree.
//!
//! ## Highlights
//!
//! - [`AddressSpace::walk`] / [`AddressSpace::walk_create`] locate the level-0
//!   slot for a virtual address, optionally building missing tables.
//! - [`AddressSpace::translate`] resolves a **user** address, never panicking
//!   on bad input.
//! - [`AddressSpace::map_range`] / [`AddressSpace::unmap_range`] install and
//!   remove runs of 4 KiB leaves.
//! - [`AddressSpace::free_table`] tears the tree down once no leaf is left.
//! - [`AddressSpace::activate`] hands the root to the MMU via `satp`.
//!
//! ## Fatal conditions
//!
//! Remapping a valid slot, unmapping something that is not a leaf, leaving a
//! leaf behind in [`free_table`](AddressSpace::free_table) and walking past
//! `MAXVA` are kernel bugs, not recoverable errors; they panic.

use crate::{FrameAlloc, PageEntryBits, PagePerm, PageTable, PhysMapper};
use core::fmt;
use kernel_info::memory::{ENTRIES_PER_TABLE, MAXVA, PAGE_SIZE, TABLE_LEVELS};
use kernel_memory_addresses::{
    PhysicalAddress, PhysicalPage, Size4K, VirtualAddress, page_round_down,
};
use kernel_registers::{Satp, TranslationControl};
use log::trace;

/// Handle to a single, concrete address space.
pub struct AddressSpace<'m, M: PhysMapper> {
    root: PhysicalPage<Size4K>,
    mapper: &'m M,
}

/// Upper bound on pages [`AddressSpace::take_accessed`] reports at once.
pub const MAX_ACCESS_SCAN: u64 = 64;

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    /// Allocate and zero a fresh root table.
    ///
    /// Returns `None` only if `alloc` is exhausted.
    pub fn new<A: FrameAlloc + ?Sized>(mapper: &'m M, alloc: &A) -> Option<Self> {
        let root = alloc.alloc_4k()?;
        let space = Self { root, mapper };
        space.table_mut(root).zero();
        trace!("Allocated root page table at {root}");
        Some(space)
    }

    /// If you already know the root frame, e.g. one handed over at boot.
    #[inline]
    pub const fn from_root(mapper: &'m M, root: PhysicalPage<Size4K>) -> Self {
        Self { root, mapper }
    }

    /// Physical page of the root (level-2) table.
    #[inline]
    #[must_use]
    pub const fn root_page(&self) -> PhysicalPage<Size4K> {
        self.root
    }

    #[inline]
    #[must_use]
    pub const fn mapper(&self) -> &'m M {
        self.mapper
    }

    /// `satp` value that activates this space.
    #[inline]
    #[must_use]
    pub fn satp(&self) -> Satp {
        Satp::sv39(self.root)
    }

    /// Install this space on the current hart and flush its TLB.
    ///
    /// # Safety
    /// The tree must map the code and stack executing the switch at their
    /// current addresses.
    #[inline]
    pub unsafe fn activate<T: TranslationControl + ?Sized>(&self, mmu: &T) {
        unsafe { mmu.install(self.satp()) };
    }

    /// Borrow the table stored in `page`.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) fn table_mut(&self, page: PhysicalPage<Size4K>) -> &mut PageTable {
        // SAFETY: table pages are owned by this tree and only ever hold tables.
        unsafe { self.mapper.phys_to_mut::<PageTable>(page.base()) }
    }

    #[allow(clippy::mut_from_ref)]
    fn walk_impl<A: FrameAlloc + ?Sized>(
        &self,
        va: VirtualAddress,
        alloc: Option<&A>,
    ) -> Result<&mut PageEntryBits, WalkError> {
        assert!(va.as_u64() < MAXVA, "walk: {va} beyond MAXVA");

        let mut table = self.table_mut(self.root);
        for level in (1..TABLE_LEVELS).rev() {
            let entry = table.entry_mut(va.table_index(level));
            let next = if entry.valid() {
                entry.physical_page()
            } else {
                let Some(alloc) = alloc else {
                    return Err(WalkError::NotMapped);
                };
                let Some(page) = alloc.alloc_4k() else {
                    return Err(WalkError::OutOfMemory);
                };
                self.table_mut(page).zero();
                *entry = PageEntryBits::table(page);
                trace!("Allocated level-{} table at {page} for {va}", level - 1);
                page
            };
            table = self.table_mut(next);
        }
        Ok(table.entry_mut(va.table_index(0)))
    }

    /// The level-0 slot for `va`, without building anything.
    ///
    /// The slot may hold an invalid entry; its permissions are not checked.
    ///
    /// # Errors
    /// [`WalkError::NotMapped`] if an intermediate table is missing.
    ///
    /// # Panics
    /// If `va >= MAXVA`.
    #[allow(clippy::mut_from_ref)]
    pub fn walk(&self, va: VirtualAddress) -> Result<&mut PageEntryBits, WalkError> {
        self.walk_impl::<NoFrames>(va, None)
    }

    /// The level-0 slot for `va`, allocating and zeroing missing intermediate
    /// tables from `alloc`. Never allocates the leaf itself.
    ///
    /// # Errors
    /// [`WalkError::OutOfMemory`] if a table page could not be obtained.
    /// Tables built before the failure stay in place.
    ///
    /// # Panics
    /// If `va >= MAXVA`.
    #[allow(clippy::mut_from_ref)]
    pub fn walk_create<A: FrameAlloc + ?Sized>(
        &self,
        alloc: &A,
        va: VirtualAddress,
    ) -> Result<&mut PageEntryBits, WalkError> {
        self.walk_impl(va, Some(alloc))
    }

    /// The leaf entry for a user address, checked the way a user access
    /// would be: in range, valid and `U` set.
    ///
    /// # Errors
    /// See [`TranslateError`]. Never panics on untrusted `va`.
    pub fn user_entry(&self, va: VirtualAddress) -> Result<PageEntryBits, TranslateError> {
        if va.as_u64() >= MAXVA {
            return Err(TranslateError::OutOfRange);
        }
        let entry = *self.walk(va).map_err(|_| TranslateError::Unmapped)?;
        if !entry.valid() {
            return Err(TranslateError::Unmapped);
        }
        if !entry.user() {
            return Err(TranslateError::NotUser);
        }
        Ok(entry)
    }

    /// Physical page backing the user address `va`.
    ///
    /// # Errors
    /// See [`TranslateError`].
    pub fn translate(&self, va: VirtualAddress) -> Result<PhysicalPage<Size4K>, TranslateError> {
        self.user_entry(va).map(|e| e.physical_page())
    }

    /// Map every page overlapping `[va, va + size)` to consecutive physical
    /// pages starting at `pa`'s page, with `perm` (+`V`).
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] if a table page could not be allocated.
    /// Pages mapped before the failure stay mapped.
    ///
    /// # Panics
    /// If `size` is zero, or a target slot is already valid.
    pub fn map_range<A: FrameAlloc + ?Sized>(
        &self,
        alloc: &A,
        va: VirtualAddress,
        size: u64,
        pa: PhysicalAddress,
        perm: PagePerm,
    ) -> Result<(), MapError> {
        assert!(size != 0, "map_range: size 0");

        let mut a = page_round_down(va.as_u64());
        let last = page_round_down(va.as_u64() + size - 1);
        let mut page = pa.page::<Size4K>();
        loop {
            let slot = self
                .walk_create(alloc, VirtualAddress::new(a))
                .map_err(|_| MapError::OutOfMemory)?;
            if slot.valid() {
                panic!("map_range: remap at {:#x}", a);
            }
            *slot = PageEntryBits::leaf(page, perm);
            if a == last {
                break;
            }
            a += PAGE_SIZE;
            page = page.add_pages(1);
        }
        Ok(())
    }

    fn unmap_impl(
        &self,
        va: VirtualAddress,
        npages: u64,
        mut release: impl FnMut(PhysicalPage<Size4K>),
    ) {
        assert!(va.is_aligned::<Size4K>(), "unmap_range: {va} not aligned");

        for i in 0..npages {
            let a = va + i * PAGE_SIZE;
            let Ok(slot) = self.walk(a) else {
                panic!("unmap_range: walk failed at {a}");
            };
            if !slot.valid() {
                panic!("unmap_range: {a} not mapped");
            }
            if !slot.is_leaf() {
                panic!("unmap_range: {a} not a leaf");
            }
            release(slot.physical_page());
            *slot = PageEntryBits::new();
        }
    }

    /// Clear `npages` leaves starting at the aligned `va`, keeping the pages.
    ///
    /// # Panics
    /// If `va` is misaligned, or any page in the range lacks a table, is
    /// invalid, or is not a leaf.
    pub fn unmap_range(&self, va: VirtualAddress, npages: u64) {
        self.unmap_impl(va, npages, |_| {});
    }

    /// Like [`unmap_range`](Self::unmap_range), additionally releasing each
    /// page to `alloc` (which may merely drop a reference).
    ///
    /// # Panics
    /// As [`unmap_range`](Self::unmap_range).
    pub fn unmap_range_and_free<A: FrameAlloc + ?Sized>(
        &self,
        alloc: &A,
        va: VirtualAddress,
        npages: u64,
    ) {
        self.unmap_impl(va, npages, |page| alloc.free_4k(page));
    }

    fn free_level<A: FrameAlloc + ?Sized>(&self, alloc: &A, page: PhysicalPage<Size4K>) {
        let table = self.table_mut(page);
        for i in 0..ENTRIES_PER_TABLE {
            let entry = table.get(i);
            if entry.is_table() {
                self.free_level(alloc, entry.physical_page());
                table.set(i, PageEntryBits::new());
            } else if entry.valid() {
                panic!("free_table: leaf left at index {i} of table {page}");
            }
        }
        alloc.free_4k(page);
    }

    /// Release every table page of the tree, root last.
    ///
    /// # Panics
    /// If any leaf is still present; unmap first.
    pub fn free_table<A: FrameAlloc + ?Sized>(self, alloc: &A) {
        trace!("Freeing page table rooted at {}", self.root);
        self.free_level(alloc, self.root);
    }

    /// Withdraw user access from the page at `va` (e.g. a stack guard page).
    ///
    /// # Panics
    /// If no level-0 slot exists for `va`.
    pub fn clear_user(&self, va: VirtualAddress) {
        let Ok(slot) = self.walk(va) else {
            panic!("clear_user: no slot for {va}");
        };
        slot.set_user(false);
    }

    /// Report and clear the accessed bit of `npages` consecutive user pages
    /// starting at `va`. Bit `i` of the result is page `i`.
    ///
    /// # Errors
    /// [`TranslateError::OutOfRange`] if `va` is at or above `MAXVA`, even
    /// for zero pages; [`TranslateError::TooManyPages`] above
    /// [`MAX_ACCESS_SCAN`] pages; any other variant if a page fails the user
    /// checks of [`user_entry`](Self::user_entry). Bits already cleared stay
    /// cleared.
    pub fn take_accessed(&self, va: VirtualAddress, npages: u64) -> Result<u64, TranslateError> {
        if va.as_u64() >= MAXVA {
            return Err(TranslateError::OutOfRange);
        }
        if npages > MAX_ACCESS_SCAN {
            return Err(TranslateError::TooManyPages);
        }
        let base = page_round_down(va.as_u64());
        let mut mask = 0;
        for i in 0..npages {
            let a = VirtualAddress::new(base + i * PAGE_SIZE);
            self.user_entry(a)?;
            let slot = self.walk(a).map_err(|_| TranslateError::Unmapped)?;
            if slot.accessed() {
                mask |= 1 << i;
                slot.set_accessed(false);
            }
        }
        Ok(mask)
    }

    fn visit_level(
        &self,
        page: PhysicalPage<Size4K>,
        depth: usize,
        f: &mut impl FnMut(usize, usize, PageEntryBits),
    ) {
        for (i, entry) in self.table_mut(page).valid_entries() {
            f(depth, i, entry);
            if entry.is_table() {
                self.visit_level(entry.physical_page(), depth + 1, f);
            }
        }
    }

    /// Pre-order traversal of all valid entries as `(depth, index, entry)`,
    /// depth 1 being the root table.
    pub fn visit(&self, mut f: impl FnMut(usize, usize, PageEntryBits)) {
        self.visit_level(self.root, 1, &mut f);
    }

    /// Render the tree, one line per valid entry, indented by depth.
    ///
    /// ```text
    /// page table 0x0000000087F6E000
    ///  ..0: pte 0x0000000021FDA801 pa 0x0000000087F6A000
    ///  .. ..0: pte 0x0000000021FDA401 pa 0x0000000087F69000
    ///  .. .. ..0: pte 0x0000000021FDAC1F pa 0x0000000087F6B000
    /// ```
    ///
    /// # Errors
    /// Whatever `out` reports.
    pub fn dump<W: fmt::Write>(&self, out: &mut W) -> fmt::Result {
        writeln!(out, "page table {}", self.root.base())?;
        let mut result = Ok(());
        self.visit(|depth, i, entry| {
            if result.is_ok() {
                result = writeln!(out, "{}", DumpLine { depth, index: i, entry });
            }
        });
        result
    }
}

/// One line of [`AddressSpace::dump`].
pub struct DumpLine {
    pub depth: usize,
    pub index: usize,
    pub entry: PageEntryBits,
}

impl fmt::Display for DumpLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for _ in 0..self.depth {
            f.write_str(" ..")?;
        }
        write!(
            f,
            "{}: pte 0x{:016X} pa {}",
            self.index,
            self.entry.into_bits(),
            self.entry.physical_page().base()
        )
    }
}

/// Allocator type for walks that must not allocate.
enum NoFrames {}

impl FrameAlloc for NoFrames {
    fn alloc_4k(&self) -> Option<PhysicalPage<Size4K>> {
        unreachable!("NoFrames has no values")
    }

    fn free_4k(&self, _page: PhysicalPage<Size4K>) {
        unreachable!("NoFrames has no values")
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalkError {
    #[error("intermediate page table missing")]
    NotMapped,
    #[error("out of memory allocating a page table")]
    OutOfMemory,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    #[error("out of memory allocating a page table")]
    OutOfMemory,
}

/// Why a user address did not translate.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranslateError {
    #[error("address at or above MAXVA")]
    OutOfRange,
    #[error("address not mapped")]
    Unmapped,
    #[error("page not accessible from user mode")]
    NotUser,
    #[error("more than {MAX_ACCESS_SCAN} pages requested")]
    TooManyPages,
}
