//! # Virtual Memory Support
//!
//! Sv39 page-table management for the kernel memory core.
//!
//! ## What you get
//! - An [`AddressSpace`] handle over one root table with the walk, translate,
//!   map and unmap operations everything else is built on.
//! - The hardware entry layout as a bitfield ([`PageEntryBits`]) and the
//!   permission set used at the API boundary ([`PagePerm`]).
//! - A 4 KiB-aligned [`PageTable`].
//! - The two seams the tables need from the outside world: [`FrameAlloc`]
//!   for table pages and [`PhysMapper`] to reach physical memory.
//!
//! ## Sv39 Virtual Address → Physical Address Walk
//!
//! A 39-bit virtual address is split into three 9-bit indices and a 12-bit
//! offset:
//!
//! ```text
//! | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! |  L2   |  L1   |  L0   | Offset |
//! ```
//!
//! ```text
//!  satp.PPN → L2 table → L1 table → L0 table → 4 KiB page
//!                │          │          │
//!                │          │          └──► leaf (R/W/X set)
//!                │          └─────────────► intermediate (only V)
//!                └────────────────────────► intermediate (only V)
//! ```
//!
//! Sv39 would allow leaves at L2 (1 GiB) and L1 (2 MiB); this crate only ever
//! creates L0 leaves, and treats every valid upper-level entry as a pointer.
//!
//! Addresses at or above [`MAXVA`](kernel_info::memory::MAXVA) are rejected:
//! bit 38 would require sign extension, and the top page is kept for the
//! trampoline anyway.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

pub mod address_space;
#[cfg(any(test, feature = "arena"))]
mod arena;
mod page_entry_bits;
mod page_table;
mod perm;

#[cfg(any(test, feature = "arena"))]
extern crate alloc;

pub use crate::address_space::{AddressSpace, MapError, TranslateError, WalkError};
#[cfg(any(test, feature = "arena"))]
pub use crate::arena::FrameArena;
pub use crate::page_entry_bits::PageEntryBits;
pub use crate::page_table::PageTable;
pub use crate::perm::PagePerm;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};

/// Source and sink of **physical** 4 KiB pages.
///
/// Table code obtains its table pages here and, when asked to release mapped
/// memory, hands pages back here. Implementations synchronize internally,
/// hence `&self`.
pub trait FrameAlloc {
    /// Allocate one page. Contents are unspecified. `None` on exhaustion.
    fn alloc_4k(&self) -> Option<PhysicalPage<Size4K>>;

    /// Release one reference to `page`. Implementations with shared
    /// ownership only reclaim it when the last reference goes.
    fn free_4k(&self, page: PhysicalPage<Size4K>);
}

impl<A: FrameAlloc + ?Sized> FrameAlloc for &A {
    #[inline]
    fn alloc_4k(&self) -> Option<PhysicalPage<Size4K>> {
        (**self).alloc_4k()
    }

    #[inline]
    fn free_4k(&self, page: PhysicalPage<Size4K>) {
        (**self).free_4k(page);
    }
}

/// Converts physical addresses to *temporarily* usable references in the
/// current virtual address space.
///
/// The kernel maps all of RAM at its physical address, so its mapper is the
/// identity. Host tests use [`FrameArena`].
pub trait PhysMapper {
    /// Convert a *physical* address to a usable mutable reference.
    ///
    /// # Safety
    /// - `pa` must be mapped writable in the current address space.
    /// - The mapping must remain valid for `'a`.
    /// - `T` must match the bytes at `pa`, and no other live reference may
    ///   alias them.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;
}

impl<M: PhysMapper + ?Sized> PhysMapper for &M {
    #[inline]
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        unsafe { (**self).phys_to_mut(pa) }
    }
}

/// Identity mapping: physical address `x` is readable at virtual address `x`.
#[derive(Debug, Default, Copy, Clone)]
pub struct IdentityMapper;

impl PhysMapper for IdentityMapper {
    #[inline]
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        #[allow(clippy::cast_possible_truncation)]
        let ptr = pa.as_u64() as usize as *mut T;
        unsafe { &mut *ptr }
    }
}

/// The bytes of one physical page.
///
/// # Safety
/// Same as [`PhysMapper::phys_to_mut`]: the caller must own `page` for `'a`.
#[inline]
pub unsafe fn page_bytes<'a, M: PhysMapper + ?Sized>(
    m: &M,
    page: PhysicalPage<Size4K>,
) -> &'a mut [u8; 4096] {
    unsafe { m.phys_to_mut::<[u8; 4096]>(page.base()) }
}

/// Fill a whole page with `byte`.
///
/// # Safety
/// The caller must own `page`; nothing else may be reading it.
#[inline]
pub unsafe fn fill_page<M: PhysMapper + ?Sized>(m: &M, page: PhysicalPage<Size4K>, byte: u8) {
    unsafe { page_bytes(m, page) }.fill(byte);
}

/// Copy all 4096 bytes of `from` into `to`.
///
/// # Safety
/// The caller must own `to`, and `from` must not be written concurrently.
/// The two pages must differ.
#[inline]
pub unsafe fn copy_page<M: PhysMapper + ?Sized>(
    m: &M,
    from: PhysicalPage<Size4K>,
    to: PhysicalPage<Size4K>,
) {
    debug_assert_ne!(from, to, "copy_page onto itself");
    let src = unsafe { page_bytes(m, from) };
    let dst = unsafe { page_bytes(m, to) };
    dst.copy_from_slice(src);
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use core::cell::RefCell;
    use std::vec::Vec;

    /// Stack of arena pages; records every page handed back.
    pub struct StackAlloc {
        free: RefCell<Vec<PhysicalPage<Size4K>>>,
        pub released: RefCell<Vec<PhysicalPage<Size4K>>>,
    }

    impl StackAlloc {
        pub fn over(arena: &FrameArena) -> Self {
            let first = arena.start().page::<Size4K>();
            let free = (0..arena.frames() as u64)
                .rev()
                .map(|i| first.add_pages(i))
                .collect();
            Self {
                free: RefCell::new(free),
                released: RefCell::new(Vec::new()),
            }
        }

        pub fn available(&self) -> usize {
            self.free.borrow().len()
        }

        /// Drop all but `n` pages from the pool.
        pub fn limit(&self, n: usize) {
            let mut free = self.free.borrow_mut();
            let excess = free.len() - n;
            free.drain(..excess);
        }
    }

    impl FrameAlloc for StackAlloc {
        fn alloc_4k(&self) -> Option<PhysicalPage<Size4K>> {
            self.free.borrow_mut().pop()
        }

        fn free_4k(&self, page: PhysicalPage<Size4K>) {
            self.released.borrow_mut().push(page);
            self.free.borrow_mut().push(page);
        }
    }
}
