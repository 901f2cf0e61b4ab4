use crate::free_list::{FreeList, NIL};
use crate::refcount::RefCountTable;
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::AtomicU32;
use kernel_info::config::MemoryConfig;
use kernel_info::memory::{ALLOC_JUNK, FREE_JUNK, PAGE_SIZE};
use kernel_memory_addresses::{
    PhysicalAddress, PhysicalPage, Size4K, page_round_down, page_round_up,
};
use kernel_sync::{CurrentCpu, SpinLock};
use kernel_vmem::{FrameAlloc, PhysMapper, copy_page, fill_page};
use log::{info, trace, warn};

/// Physical page allocator over one contiguous range, partitioned per CPU.
///
/// `M` reaches page contents (for the sentinel fills and COW copies), `C`
/// tells which partition is "ours".
///
/// ```rust
/// # use kernel_alloc::PageAllocator;
/// # use kernel_info::config::{DuplicationPolicy, MemoryConfig};
/// # use kernel_memory_addresses::PhysicalAddress;
/// # use kernel_sync::BootCpu;
/// # use kernel_vmem::FrameArena;
/// let ram = FrameArena::new(PhysicalAddress::new(0x8000_0000), 8);
/// let pages = PageAllocator::new(&ram, BootCpu, MemoryConfig::new(2, DuplicationPolicy::CopyOnWrite), ram.start(), ram.end());
/// let page = pages.allocate().unwrap();
/// assert_eq!(pages.ref_count(page), Some(1));
/// pages.free(page.base());
/// assert_eq!(pages.free_count(), 8);
/// ```
pub struct PageAllocator<M: PhysMapper, C: CurrentCpu> {
    mapper: M,
    cpu: C,
    /// First managed page.
    base: u64,
    pages: usize,
    links: Box<[AtomicU32]>,
    partitions: Box<[SpinLock<FreeList>]>,
    refcounts: Option<RefCountTable>,
    config: MemoryConfig,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    #[error("out of physical memory")]
    OutOfMemory,
}

impl<M: PhysMapper, C: CurrentCpu> PageAllocator<M, C> {
    /// Manage the pages fully inside `[start, end)`.
    ///
    /// `start` is rounded up and `end` down to page boundaries; pages are
    /// dealt to the partitions round-robin and filled with the free sentinel.
    ///
    /// # Panics
    /// If the range holds `u32::MAX` pages or more.
    pub fn new(
        mapper: M,
        cpu: C,
        config: MemoryConfig,
        start: PhysicalAddress,
        end: PhysicalAddress,
    ) -> Self {
        let base = page_round_up(start.as_u64());
        let top = page_round_down(end.as_u64()).max(base);
        #[allow(clippy::cast_possible_truncation)]
        let pages = ((top - base) / PAGE_SIZE) as usize;
        assert!(
            pages < NIL as usize,
            "PageAllocator: {pages} pages exceed the index range"
        );

        let links: Box<[AtomicU32]> = (0..pages).map(|_| AtomicU32::new(NIL)).collect();
        let partitions: Box<[SpinLock<FreeList>]> = (0..config.partitions)
            .map(|_| SpinLock::new(FreeList::new()))
            .collect();
        let refcounts = config
            .reference_counting()
            .then(|| RefCountTable::new(pages));

        let allocator = Self {
            mapper,
            cpu,
            base,
            pages,
            links,
            partitions,
            refcounts,
            config,
        };

        for index in 0..pages {
            let page = allocator.page_of(index);
            // SAFETY: nothing else knows about this page yet.
            unsafe { fill_page(&allocator.mapper, page, FREE_JUNK) };
            #[allow(clippy::cast_possible_truncation)]
            let slot = index as u32;
            allocator.partitions[index % config.partitions]
                .lock()
                .push(&allocator.links, slot);
        }

        info!(
            "Page allocator managing {pages} pages at {:#x}..{:#x} in {} partition(s), reference counting {}",
            base,
            top,
            config.partitions,
            if allocator.refcounts.is_some() { "on" } else { "off" }
        );
        allocator
    }

    #[inline]
    pub const fn mapper(&self) -> &M {
        &self.mapper
    }

    /// Policy this allocator was created with.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> MemoryConfig {
        self.config
    }

    /// Number of managed pages.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.pages
    }

    #[inline]
    #[must_use]
    pub const fn partitions(&self) -> usize {
        self.partitions.len()
    }

    #[inline]
    #[must_use]
    pub const fn reference_counting(&self) -> bool {
        self.refcounts.is_some()
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, pa: PhysicalAddress) -> bool {
        pa.as_u64() >= self.base && pa.as_u64() < self.base + self.pages as u64 * PAGE_SIZE
    }

    #[inline]
    fn page_of(&self, index: usize) -> PhysicalPage<Size4K> {
        PhysicalPage::from_addr(PhysicalAddress::new(self.base + index as u64 * PAGE_SIZE))
    }

    /// Index of the managed page starting at `pa`.
    ///
    /// # Panics
    /// If `pa` is misaligned or outside the managed range.
    #[allow(clippy::cast_possible_truncation)]
    fn index_of(&self, op: &str, pa: PhysicalAddress) -> usize {
        assert!(pa.is_aligned::<Size4K>(), "{op}: {pa} not page aligned");
        assert!(self.contains(pa), "{op}: {pa} outside managed range");
        ((pa.as_u64() - self.base) / PAGE_SIZE) as usize
    }

    /// The calling CPU's id and its home partition.
    #[inline]
    fn whoami(&self) -> (usize, usize) {
        let cpu = self.cpu.cpu_id();
        (cpu, cpu % self.partitions.len())
    }

    /// Pop a page index from the home partition, else steal.
    ///
    /// Holds at most one partition lock at any time.
    fn take(&self) -> Option<usize> {
        let (cpu, home) = self.whoami();
        let n = self.partitions.len();

        for step in 0..n {
            let p = (home + step) % n;
            let partition = &self.partitions[p];
            if partition.is_held_by(cpu) {
                continue;
            }
            let popped = partition.lock_as(cpu).pop(&self.links);
            if let Some(index) = popped {
                if step != 0 {
                    trace!("cpu {cpu} stole page {index} from partition {p}");
                }
                return Some(index as usize);
            }
        }
        None
    }

    /// Allocate one page, filled with `0x05`, with reference count 1.
    ///
    /// # Errors
    /// [`AllocError::OutOfMemory`] only if every partition is empty.
    pub fn allocate(&self) -> Result<PhysicalPage<Size4K>, AllocError> {
        let Some(index) = self.take() else {
            warn!("Out of physical pages ({} managed)", self.pages);
            return Err(AllocError::OutOfMemory);
        };
        let page = self.page_of(index);
        // SAFETY: just removed from the free lists; the caller owns it now.
        unsafe { fill_page(&self.mapper, page, ALLOC_JUNK) };
        if let Some(refcounts) = &self.refcounts {
            refcounts.set(index, 1);
        }
        Ok(page)
    }

    /// Release one reference to the page at `pa`.
    ///
    /// With reference counting the page is reclaimed only when its count was
    /// at most one; otherwise the count is decremented and the page stays
    /// with its other owners. Reclaimed pages are filled with `0x01` and
    /// pushed on the caller's partition.
    ///
    /// # Panics
    /// If `pa` is misaligned or outside the managed range.
    pub fn free(&self, pa: PhysicalAddress) {
        let index = self.index_of("free", pa);

        if let Some(refcounts) = &self.refcounts {
            let mut counts = refcounts.lock();
            if counts[index] > 1 {
                counts[index] -= 1;
                return;
            }
            counts[index] = 0;
        }

        // SAFETY: the last reference is gone.
        unsafe { fill_page(&self.mapper, self.page_of(index), FREE_JUNK) };
        let (cpu, home) = self.whoami();
        #[allow(clippy::cast_possible_truncation)]
        let slot = index as u32;
        self.partitions[home].lock_as(cpu).push(&self.links, slot);
    }

    /// Pages currently on any free list.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.partitions.iter().map(|p| p.lock().len()).sum()
    }

    /// Free pages per partition, in partition order.
    #[must_use]
    pub fn partition_free_counts(&self) -> Vec<usize> {
        self.partitions.iter().map(|p| p.lock().len()).collect()
    }

    fn refcounts(&self, op: &str) -> &RefCountTable {
        match &self.refcounts {
            Some(refcounts) => refcounts,
            None => panic!("{op}: reference counting disabled"),
        }
    }

    /// Current reference count of `page`; `None` without reference counting.
    ///
    /// # Panics
    /// If `page` is not managed by this allocator.
    #[must_use]
    pub fn ref_count(&self, page: PhysicalPage<Size4K>) -> Option<u32> {
        let index = self.index_of("ref_count", page.base());
        self.refcounts.as_ref().map(|r| r.count(index))
    }

    /// Record one more owner of `page`; returns the new count.
    ///
    /// # Panics
    /// Without reference counting, or if `page` is not managed here.
    pub fn share(&self, page: PhysicalPage<Size4K>) -> u32 {
        let index = self.index_of("share", page.base());
        self.refcounts("share").increment(index)
    }

    /// Drop one owner of `page` without reclaiming it; saturates at zero.
    ///
    /// # Panics
    /// Without reference counting, or if `page` is not managed here.
    pub fn unshare(&self, page: PhysicalPage<Size4K>) -> u32 {
        let index = self.index_of("unshare", page.base());
        self.refcounts("unshare").decrement(index)
    }

    /// Overwrite the count of `page`.
    ///
    /// # Panics
    /// Without reference counting, or if `page` is not managed here.
    pub fn set_ref_count(&self, page: PhysicalPage<Size4K>, count: u32) {
        let index = self.index_of("set_ref_count", page.base());
        self.refcounts("set_ref_count").set(index, count);
    }

    /// Give the faulting owner of a shared page a page it may write.
    ///
    /// - count > 1: allocate, copy the contents, drop one reference from the
    ///   old page and return the copy (count 1).
    /// - count == 1: the caller is the last owner; return `page` itself.
    ///
    /// # Errors
    /// [`AllocError::OutOfMemory`] if a copy is needed and no page is free.
    /// The old page's count is unchanged in that case.
    ///
    /// # Panics
    /// If the count is zero, reference counting is disabled, or `page` is not
    /// managed here.
    pub fn resolve_write_fault(
        &self,
        page: PhysicalPage<Size4K>,
    ) -> Result<PhysicalPage<Size4K>, AllocError> {
        let index = self.index_of("resolve_write_fault", page.base());
        let mut counts = self.refcounts("resolve_write_fault").lock();

        match counts[index] {
            0 => panic!("resolve_write_fault: {page} has no references"),
            1 => Ok(page),
            n => {
                // Partition locks nest inside the count lock.
                let Some(copy_index) = self.take() else {
                    warn!("Out of physical pages breaking COW share of {page}");
                    return Err(AllocError::OutOfMemory);
                };
                let copy = self.page_of(copy_index);
                // SAFETY: `copy` is fresh; `page` is read-only for all owners
                // while shared.
                unsafe { copy_page(&self.mapper, page, copy) };
                counts[index] = n - 1;
                counts[copy_index] = 1;
                Ok(copy)
            }
        }
    }
}

impl<M: PhysMapper, C: CurrentCpu> FrameAlloc for PageAllocator<M, C> {
    #[inline]
    fn alloc_4k(&self) -> Option<PhysicalPage<Size4K>> {
        self.allocate().ok()
    }

    #[inline]
    fn free_4k(&self, page: PhysicalPage<Size4K>) {
        self.free(page.base());
    }
}
