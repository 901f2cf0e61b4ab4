use crate::{MemoryAddress, PageSize, PhysicalAddress};
use core::fmt;
use core::marker::PhantomData;

/// Physical memory page base for size `S`.
///
/// ### Invariants
/// - The low `S::SHIFT` bits of the base are always zero.
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let page = PhysicalPage::<Size4K>::from_ppn(0x80001);
/// assert_eq!(page.base().as_u64(), 0x8000_1000);
/// assert_eq!(page.ppn(), 0x80001);
/// assert!(PhysicalPage::<Size4K>::new_aligned(PhysicalAddress::new(0x8000_1008)).is_none());
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalPage<S: PageSize> {
    base: u64,
    _size: PhantomData<S>,
}

impl<S: PageSize> PhysicalPage<S> {
    /// The page containing `addr` (aligns down).
    #[inline]
    #[must_use]
    pub const fn from_addr(addr: PhysicalAddress) -> Self {
        Self {
            base: addr.0.align_down::<S>().as_u64(),
            _size: PhantomData,
        }
    }

    /// The page starting exactly at `addr`, or `None` if `addr` is unaligned.
    #[inline]
    #[must_use]
    pub const fn new_aligned(addr: PhysicalAddress) -> Option<Self> {
        if addr.is_aligned::<S>() {
            Some(Self::from_addr(addr))
        } else {
            None
        }
    }

    /// Page from a physical page number (`base >> S::SHIFT`).
    #[inline]
    #[must_use]
    pub const fn from_ppn(ppn: u64) -> Self {
        Self {
            base: ppn << S::SHIFT,
            _size: PhantomData,
        }
    }

    #[inline]
    #[must_use]
    pub const fn ppn(self) -> u64 {
        self.base >> S::SHIFT
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress(MemoryAddress::new(self.base))
    }

    /// Base plus an in-page byte offset.
    #[inline]
    #[must_use]
    pub const fn join(self, offset: u64) -> PhysicalAddress {
        debug_assert!(offset < S::SIZE, "offset must be < page size");
        PhysicalAddress(MemoryAddress::new(self.base + offset))
    }

    /// The page `n` pages further up.
    #[inline]
    #[must_use]
    pub const fn add_pages(self, n: u64) -> Self {
        Self {
            base: self.base + n * S::SIZE,
            _size: PhantomData,
        }
    }
}

impl<S: PageSize> fmt::Display for PhysicalPage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}/{}", self.base, S::NAME)
    }
}

impl<S: PageSize> fmt::Debug for PhysicalPage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalPage<{}>(0x{:016X})", S::NAME, self.base)
    }
}
