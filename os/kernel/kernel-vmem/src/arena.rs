//! # Host-side Physical Memory
//!
//! [`FrameArena`] stands in for RAM when the memory core runs as an ordinary
//! process: a page-aligned heap block that pretends to live at a chosen
//! physical base (typically `KERNBASE`), addressed through [`PhysMapper`].

use crate::PhysMapper;
use alloc::alloc::{Layout, alloc_zeroed, dealloc, handle_alloc_error};
use core::ptr::NonNull;
use kernel_memory_addresses::{PageSize, PhysicalAddress, PhysicalPage, Size4K};

/// Page-aligned, zero-initialized "physical memory" for tests.
///
/// ```rust
/// # use kernel_memory_addresses::*;
/// # use kernel_vmem::{FrameArena, PhysMapper};
/// let ram = FrameArena::new(PhysicalAddress::new(0x8000_0000), 4);
/// assert_eq!(ram.end().as_u64(), 0x8000_4000);
///
/// let word: &mut u64 = unsafe { ram.phys_to_mut(PhysicalAddress::new(0x8000_1008)) };
/// *word = 7;
/// assert_eq!(ram.page_bytes(PhysicalAddress::new(0x8000_1000).page())[8], 7);
/// ```
pub struct FrameArena {
    base: u64,
    frames: usize,
    ptr: NonNull<u8>,
}

// Safety: the arena is plain memory; exclusive access to individual pages is
// arranged by the code that allocates them.
unsafe impl Send for FrameArena {}
unsafe impl Sync for FrameArena {}

impl FrameArena {
    /// Reserve `frames` zeroed pages appearing at physical address `base`.
    ///
    /// # Panics
    /// If `base` is not page aligned or `frames` is zero.
    #[must_use]
    pub fn new(base: PhysicalAddress, frames: usize) -> Self {
        assert!(
            base.is_aligned::<Size4K>(),
            "FrameArena: base {base} not page aligned"
        );
        assert!(frames > 0, "FrameArena: no frames requested");

        let layout = Self::layout(frames);
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            handle_alloc_error(layout)
        };
        Self {
            base: base.as_u64(),
            frames,
            ptr,
        }
    }

    fn layout(frames: usize) -> Layout {
        #[allow(clippy::cast_possible_truncation)]
        let page = Size4K::SIZE as usize;
        let Ok(layout) = Layout::from_size_align(frames * page, page) else {
            panic!("FrameArena: {frames} frames exceed the address space");
        };
        layout
    }

    #[inline]
    #[must_use]
    pub const fn start(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.base)
    }

    /// First physical address past the arena.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.base + self.frames as u64 * Size4K::SIZE)
    }

    #[inline]
    #[must_use]
    pub const fn frames(&self) -> usize {
        self.frames
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, pa: PhysicalAddress) -> bool {
        pa.as_u64() >= self.base && pa.as_u64() < self.end().as_u64()
    }

    /// Snapshot view of one page, for assertions.
    #[must_use]
    pub fn page_bytes(&self, page: PhysicalPage<Size4K>) -> &[u8; 4096] {
        // SAFETY: the range check happens in `phys_to_mut`; the shared borrow
        // only lives as long as the caller's inspection.
        unsafe { self.phys_to_mut::<[u8; 4096]>(page.base()) }
    }
}

impl PhysMapper for FrameArena {
    #[allow(clippy::cast_possible_truncation)]
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let end = pa.as_u64() + size_of::<T>() as u64;
        assert!(
            self.contains(pa) && end <= self.end().as_u64(),
            "FrameArena: physical address {pa} outside arena {}..{}",
            self.start(),
            self.end()
        );
        let offset = (pa.as_u64() - self.base) as usize;
        // SAFETY: in bounds of the allocation; the caller promises `T` matches
        // the bytes at `pa` and that no other reference aliases them.
        unsafe { &mut *self.ptr.as_ptr().add(offset).cast::<T>() }
    }
}

impl Drop for FrameArena {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with the same layout.
        unsafe { dealloc(self.ptr.as_ptr(), Self::layout(self.frames)) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_zeroed_and_bounds_are_exclusive() {
        let ram = FrameArena::new(PhysicalAddress::new(0x8000_0000), 2);
        assert!(ram.contains(PhysicalAddress::new(0x8000_1FFF)));
        assert!(!ram.contains(PhysicalAddress::new(0x8000_2000)));
        assert!(!ram.contains(PhysicalAddress::new(0x7FFF_FFFF)));
        let page = PhysicalAddress::new(0x8000_1000).page::<Size4K>();
        assert!(ram.page_bytes(page).iter().all(|&b| b == 0));
    }

    #[test]
    #[should_panic(expected = "outside arena")]
    fn access_past_end_panics() {
        let ram = FrameArena::new(PhysicalAddress::new(0x8000_0000), 1);
        let _: &mut u8 = unsafe { ram.phys_to_mut(PhysicalAddress::new(0x8000_1000)) };
    }
}
