use crate::{MemoryAddress, PageSize, VirtualAddress};
use core::fmt;
use core::marker::PhantomData;

/// Virtual memory page base for size `S`.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualPage<S: PageSize> {
    base: u64,
    _size: PhantomData<S>,
}

impl<S: PageSize> VirtualPage<S> {
    /// The page containing `addr` (aligns down).
    #[inline]
    #[must_use]
    pub const fn containing_address(addr: VirtualAddress) -> Self {
        Self {
            base: addr.0.align_down::<S>().as_u64(),
            _size: PhantomData,
        }
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        VirtualAddress(MemoryAddress::new(self.base))
    }

    /// Base plus an in-page byte offset.
    #[inline]
    #[must_use]
    pub const fn join(self, offset: u64) -> VirtualAddress {
        debug_assert!(offset < S::SIZE, "offset must be < page size");
        VirtualAddress(MemoryAddress::new(self.base + offset))
    }

    /// The following page. Wraps only past the top of the 64-bit space.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self {
            base: self.base.wrapping_add(S::SIZE),
            _size: PhantomData,
        }
    }
}

impl<S: PageSize> fmt::Display for VirtualPage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}/{}", self.base, S::NAME)
    }
}

impl<S: PageSize> fmt::Debug for VirtualPage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualPage<{}>(0x{:016X})", S::NAME, self.base)
    }
}
