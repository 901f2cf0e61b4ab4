//! User address-space operations.
//!
//! [`Vmm`] is the context every operation runs in: the shared page allocator
//! and, through it, the physical mapper. A [`UserSpace`] is owned state
//! handed to each call; nothing here keeps hidden globals.
//!
//! Operations that change a space take `&mut UserSpace`, so one space is
//! never mutated from two places at once. Different spaces may be worked on
//! concurrently; they only share the allocator, which locks internally.

use core::fmt;
use kernel_alloc::{AllocError, PageAllocator};
use kernel_info::config::DuplicationPolicy;
use kernel_info::memory::{PAGE_SIZE, TRAPFRAME};
use kernel_memory_addresses::{
    PhysicalPage, Size4K, VirtualAddress, page_round_down, page_round_up,
};
use kernel_sync::CurrentCpu;
use kernel_vmem::address_space::DumpLine;
use kernel_vmem::{
    AddressSpace, MapError, PageEntryBits, PagePerm, PhysMapper, TranslateError, copy_page,
    fill_page, page_bytes,
};
use log::{debug, info, warn};

/// One process's user address space.
///
/// Owns its root table and every page mapped in it (shared pages are owned
/// jointly, tracked by reference count). Give it back to
/// [`Vmm::destroy`]; dropping it leaks the pages.
#[must_use = "user spaces must be returned to Vmm::destroy"]
pub struct UserSpace {
    root: PhysicalPage<Size4K>,
    size: u64,
}

impl UserSpace {
    /// Highest mapped user byte + 1. Not necessarily page aligned.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Physical page of the root table, e.g. for building a `satp` value.
    #[inline]
    #[must_use]
    pub const fn root(&self) -> PhysicalPage<Size4K> {
        self.root
    }

    #[inline]
    const fn pages(&self) -> u64 {
        page_round_up(self.size) / PAGE_SIZE
    }
}

impl fmt::Debug for UserSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserSpace")
            .field("root", &self.root)
            .field("size", &format_args!("{:#x}", self.size))
            .finish()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("bad user address: {0}")]
    BadAddress(#[from] TranslateError),
    #[error("user page is not writable")]
    ReadOnly,
    #[error("write fault on a page that is not copy-on-write")]
    NotCopyOnWrite,
    #[error("no terminator within {0} bytes")]
    NoTerminator(usize),
    #[error("size {0:#x} reaches into the trap frame")]
    TooLarge(u64),
}

impl From<AllocError> for VmError {
    fn from(value: AllocError) -> Self {
        match value {
            AllocError::OutOfMemory => Self::OutOfMemory,
        }
    }
}

impl From<MapError> for VmError {
    fn from(value: MapError) -> Self {
        match value {
            MapError::OutOfMemory => Self::OutOfMemory,
        }
    }
}

/// Address-space operations over one shared page allocator.
pub struct Vmm<'a, M: PhysMapper, C: CurrentCpu> {
    pages: &'a PageAllocator<M, C>,
}

impl<M: PhysMapper, C: CurrentCpu> Clone for Vmm<'_, M, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M: PhysMapper, C: CurrentCpu> Copy for Vmm<'_, M, C> {}

impl<'a, M: PhysMapper, C: CurrentCpu> Vmm<'a, M, C> {
    pub const fn new(pages: &'a PageAllocator<M, C>) -> Self {
        Self { pages }
    }

    #[inline]
    #[must_use]
    pub const fn allocator(&self) -> &'a PageAllocator<M, C> {
        self.pages
    }

    #[inline]
    pub(crate) fn mapper(self) -> &'a M {
        self.pages.mapper()
    }

    #[inline]
    pub(crate) fn tables(self, root: PhysicalPage<Size4K>) -> AddressSpace<'a, M> {
        AddressSpace::from_root(self.mapper(), root)
    }

    /// A fresh, empty user space (zeroed root table, size 0).
    ///
    /// # Errors
    /// [`VmError::OutOfMemory`] if no page is left for the root.
    pub fn create(&self) -> Result<UserSpace, VmError> {
        let tables = AddressSpace::new(self.mapper(), self.pages).ok_or(VmError::OutOfMemory)?;
        debug!("Created user space rooted at {}", tables.root_page());
        Ok(UserSpace {
            root: tables.root_page(),
            size: 0,
        })
    }

    /// Allocate a zeroed page and map it R|W|X|U at `va`.
    fn map_zeroed(self, tables: &AddressSpace<'a, M>, va: u64) -> Result<(), VmError> {
        let page = self.pages.allocate()?;
        // SAFETY: fresh page, owned by us until mapped.
        unsafe { fill_page(self.mapper(), page, 0) };
        if let Err(e) = tables.map_range(
            self.pages,
            VirtualAddress::new(va),
            PAGE_SIZE,
            page.base(),
            PagePerm::USER_RWX,
        ) {
            self.pages.free(page.base());
            return Err(e.into());
        }
        Ok(())
    }

    /// Place the first process's code at virtual address 0.
    ///
    /// The space becomes exactly one page large.
    ///
    /// # Errors
    /// [`VmError::OutOfMemory`] if the page or its tables cannot be allocated.
    ///
    /// # Panics
    /// If `image` does not fit in one page with room to spare
    /// (`image.len() >= 4096`).
    pub fn load_initial_image(&self, space: &mut UserSpace, image: &[u8]) -> Result<(), VmError> {
        assert!(
            (image.len() as u64) < PAGE_SIZE,
            "load_initial_image: {} bytes do not fit in one page",
            image.len()
        );

        let tables = self.tables(space.root);
        self.map_zeroed(&tables, 0)?;
        let page = tables.walk(VirtualAddress::zero())?.physical_page();
        // SAFETY: just allocated and mapped into a space nobody runs yet.
        let bytes = unsafe { page_bytes(self.mapper(), page) };
        bytes[..image.len()].copy_from_slice(image);
        space.size = PAGE_SIZE;
        Ok(())
    }

    /// Grow `space` to `new_size` bytes with zeroed R|W|X|U pages.
    ///
    /// Returns the new size. A `new_size` below the current size leaves the
    /// space alone and returns the current size.
    ///
    /// # Errors
    /// - [`VmError::OutOfMemory`]: every page added by this call has been
    ///   removed again and the size is unchanged.
    /// - [`VmError::TooLarge`]: `new_size` would reach the trap frame.
    pub fn grow(&self, space: &mut UserSpace, new_size: u64) -> Result<u64, VmError> {
        let old_size = space.size;
        if new_size < old_size {
            return Ok(old_size);
        }
        if new_size > TRAPFRAME {
            return Err(VmError::TooLarge(new_size));
        }

        let tables = self.tables(space.root);
        let first = page_round_up(old_size);
        let mut va = first;
        while va < new_size {
            if let Err(e) = self.map_zeroed(&tables, va) {
                let added = (va - first) / PAGE_SIZE;
                if added > 0 {
                    tables.unmap_range_and_free(self.pages, VirtualAddress::new(first), added);
                }
                warn!("Growing user space {} to {new_size:#x} failed: {e}", space.root);
                return Err(e);
            }
            va += PAGE_SIZE;
        }

        space.size = new_size;
        debug!("Grew user space {} from {old_size:#x} to {new_size:#x}", space.root);
        Ok(new_size)
    }

    /// Shrink `space` to `new_size` bytes, releasing whole pages above it.
    ///
    /// Returns the new size; a `new_size` at or above the current size
    /// changes nothing and returns the current size.
    pub fn shrink(&self, space: &mut UserSpace, new_size: u64) -> u64 {
        let old_size = space.size;
        if new_size >= old_size {
            return old_size;
        }

        let keep = page_round_up(new_size);
        let end = page_round_up(old_size);
        if keep < end {
            self.tables(space.root).unmap_range_and_free(
                self.pages,
                VirtualAddress::new(keep),
                (end - keep) / PAGE_SIZE,
            );
        }

        space.size = new_size;
        debug!("Shrank user space {} from {old_size:#x} to {new_size:#x}", space.root);
        new_size
    }

    /// Build a child space with the same contents as `parent`.
    ///
    /// The strategy is the allocator's
    /// [`DuplicationPolicy`]: `Eager` copies every page now; `CopyOnWrite`
    /// maps the parent's pages into the child, withdrawing `W` and setting the
    /// COW marker on writable pages in both spaces. The parent is `&mut`
    /// because its entries may change.
    ///
    /// Stale writable TLB entries of the parent must be flushed before it
    /// runs again; returning to user mode does that.
    ///
    /// # Errors
    /// [`VmError::OutOfMemory`]: the partial child is torn down completely
    /// (pages freed or un-shared, tables freed).
    ///
    /// # Panics
    /// If a page below the parent's size is not mapped.
    pub fn duplicate(&self, parent: &mut UserSpace) -> Result<UserSpace, VmError> {
        let policy = self.pages.config().duplication;
        let mut child = self.create()?;
        let from = self.tables(parent.root);
        let to = self.tables(child.root);

        for i in 0..parent.pages() {
            let va = VirtualAddress::new(i * PAGE_SIZE);
            let Ok(slot) = from.walk(va) else {
                panic!("duplicate: no page table for {va}");
            };
            if !slot.valid() {
                panic!("duplicate: {va} not mapped");
            }

            let installed = match policy {
                DuplicationPolicy::Eager => self.copy_into(&to, va, *slot),
                DuplicationPolicy::CopyOnWrite => self.share_into(&to, va, slot),
            };
            if let Err(e) = installed {
                if i > 0 {
                    to.unmap_range_and_free(self.pages, VirtualAddress::zero(), i);
                }
                to.free_table(self.pages);
                warn!("Duplicating user space {} failed: {e}", parent.root);
                return Err(e);
            }
        }

        child.size = parent.size;
        debug!(
            "Duplicated user space {} into {} ({policy:?}, {:#x} bytes)",
            parent.root, child.root, child.size
        );
        Ok(child)
    }

    fn copy_into(
        self,
        to: &AddressSpace<'a, M>,
        va: VirtualAddress,
        entry: PageEntryBits,
    ) -> Result<(), VmError> {
        let copy = self.pages.allocate()?;
        // SAFETY: `copy` is fresh; the source page is not written while the
        // parent is being duplicated.
        unsafe { copy_page(self.mapper(), entry.physical_page(), copy) };
        if let Err(e) = to.map_range(self.pages, va, PAGE_SIZE, copy.base(), entry.perm()) {
            self.pages.free(copy.base());
            return Err(e.into());
        }
        Ok(())
    }

    fn share_into(
        self,
        to: &AddressSpace<'a, M>,
        va: VirtualAddress,
        parent_slot: &mut PageEntryBits,
    ) -> Result<(), VmError> {
        let mut perm = parent_slot.perm();
        if perm.contains(PagePerm::WRITE) {
            perm = (perm - PagePerm::WRITE) | PagePerm::COPY_ON_WRITE;
            parent_slot.set_perm(perm);
        }
        let page = parent_slot.physical_page();
        to.map_range(self.pages, va, PAGE_SIZE, page.base(), perm)?;
        self.pages.share(page);
        Ok(())
    }

    /// Release every page and table of `space`.
    #[allow(clippy::needless_pass_by_value)]
    pub fn destroy(&self, space: UserSpace) {
        let tables = self.tables(space.root);
        if space.size > 0 {
            tables.unmap_range_and_free(self.pages, VirtualAddress::zero(), space.pages());
        }
        tables.free_table(self.pages);
        debug!("Destroyed user space {} ({:#x} bytes)", space.root, space.size);
    }

    /// Give the page at `va` a private writable copy.
    ///
    /// The caller has checked that the entry is a COW-marked user leaf.
    pub(crate) fn break_cow(
        self,
        tables: &AddressSpace<'a, M>,
        va: VirtualAddress,
    ) -> Result<PhysicalPage<Size4K>, VmError> {
        let Ok(slot) = tables.walk(va) else {
            panic!("break_cow: no page table for {va}");
        };
        let shared = slot.physical_page();
        let private = self.pages.resolve_write_fault(shared)?;
        slot.set_physical_page(private);
        slot.set_perm((slot.perm() - PagePerm::COPY_ON_WRITE) | PagePerm::WRITE);
        debug!("Resolved COW fault at {va}: {shared} -> {private}");
        Ok(private)
    }

    /// Handle a store page fault taken in user mode at `va`.
    ///
    /// On success the faulting page is privately writable; the faulting
    /// instruction can be restarted.
    ///
    /// # Errors
    /// - [`VmError::BadAddress`]: `va` is out of range, unmapped or not user.
    /// - [`VmError::NotCopyOnWrite`]: a genuine protection violation.
    /// - [`VmError::OutOfMemory`]: no page for the private copy.
    pub fn handle_write_fault(
        &self,
        space: &mut UserSpace,
        va: VirtualAddress,
    ) -> Result<(), VmError> {
        let tables = self.tables(space.root);
        let entry = tables.user_entry(va).inspect_err(|e| {
            warn!("Rejected write fault at {va} in {}: {e}", space.root);
        })?;
        if !entry.copy_on_write() {
            warn!("Rejected write fault at {va} in {}: page not copy-on-write", space.root);
            return Err(VmError::NotCopyOnWrite);
        }
        self.break_cow(&tables, VirtualAddress::new(page_round_down(va.as_u64())))?;
        Ok(())
    }

    /// Withdraw user access from the page at `va` (stack guard pages).
    ///
    /// # Panics
    /// If `va` has no page table.
    pub fn clear_user_access(&self, space: &mut UserSpace, va: VirtualAddress) {
        self.tables(space.root).clear_user(va);
    }

    /// Report and clear the accessed bits of up to 64 pages from `va`.
    ///
    /// # Errors
    /// [`VmError::BadAddress`] if any page in the range is not a mapped user
    /// page, or more than 64 pages are asked for.
    pub fn accessed_pages(
        &self,
        space: &mut UserSpace,
        va: VirtualAddress,
        npages: u64,
    ) -> Result<u64, VmError> {
        Ok(self.tables(space.root).take_accessed(va, npages)?)
    }

    /// Log the page-table tree of `space` at `info` level.
    pub fn dump(&self, space: &UserSpace) {
        info!("page table {}", space.root.base());
        self.tables(space.root).visit(|depth, index, entry| {
            info!("{}", DumpLine { depth, index, entry });
        });
    }
}

impl From<kernel_vmem::WalkError> for VmError {
    fn from(value: kernel_vmem::WalkError) -> Self {
        match value {
            kernel_vmem::WalkError::NotMapped => Self::BadAddress(TranslateError::Unmapped),
            kernel_vmem::WalkError::OutOfMemory => Self::OutOfMemory,
        }
    }
}
