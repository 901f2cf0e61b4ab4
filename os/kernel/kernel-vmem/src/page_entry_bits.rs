use crate::PagePerm;
use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalPage, Size4K};

/// One 64-bit Sv39 page table entry in its raw bitfield form.
///
/// The same layout is used at every level; what an entry *means* depends on
/// its R/W/X bits:
///
/// | `V` | `R`/`W`/`X` | Kind |
/// |-----|-------------|------|
/// | 0 | any | invalid |
/// | 1 | all clear | intermediate: `ppn` names the next table |
/// | 1 | any set | leaf: `ppn` names the mapped page |
///
/// ### Bit layout
///
/// | Bits   | Name  | Meaning |
/// |--------|-------|---------|
/// | 0      | `V`   | Valid |
/// | 1      | `R`   | Readable |
/// | 2      | `W`   | Writable |
/// | 3      | `X`   | Executable |
/// | 4      | `U`   | User accessible |
/// | 5      | `G`   | Global |
/// | 6      | `A`   | Accessed |
/// | 7      | `D`   | Dirty |
/// | 8      | RSW   | Copy-on-write pending (software) |
/// | 9      | RSW   | Unused (software) |
/// | 10–53  | `PPN` | Physical page number |
/// | 54–63  | -     | Reserved, must be zero |
///
/// ### Example
/// ```rust
/// # use kernel_memory_addresses::*;
/// # use kernel_vmem::{PageEntryBits, PagePerm};
/// let page = PhysicalPage::<Size4K>::from_ppn(0x80123);
/// let e = PageEntryBits::leaf(page, PagePerm::USER_RWX);
/// assert!(e.is_leaf());
/// assert_eq!(e.into_bits(), (0x80123 << 10) | 0x1F);
/// assert_eq!(e.physical_page(), page);
/// ```
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageEntryBits {
    /// Valid (V, bit 0).
    pub valid: bool,

    /// Readable (R, bit 1).
    pub readable: bool,

    /// Writable (W, bit 2).
    pub writable: bool,

    /// Executable (X, bit 3).
    pub executable: bool,

    /// User (U, bit 4).
    pub user: bool,

    /// Global (G, bit 5).
    pub global: bool,

    /// Accessed (A, bit 6). Set by the walker on any access.
    pub accessed: bool,

    /// Dirty (D, bit 7). Set by the walker on the first store.
    pub dirty: bool,

    /// RSW bit 8: page is shared copy-on-write.
    pub copy_on_write: bool,

    /// RSW bit 9, unused.
    #[bits(1)]
    __rsw: u8,

    /// Physical page number (bits 10..=53).
    #[bits(44)]
    ppn: u64,

    #[bits(10)]
    __: u16,
}

/// The low ten flag bits of an entry.
const FLAG_MASK: u64 = 0x3FF;

impl PageEntryBits {
    /// Leaf entry mapping `page` with `perm`; sets `V`.
    #[inline]
    #[must_use]
    pub const fn leaf(page: PhysicalPage<Size4K>, perm: PagePerm) -> Self {
        debug_assert!(perm.is_leaf(), "leaf entry without R/W/X");
        Self::from_bits(perm.bits() & FLAG_MASK)
            .with_valid(true)
            .with_ppn(page.ppn())
    }

    /// Intermediate entry pointing at the table in `page`.
    #[inline]
    #[must_use]
    pub const fn table(page: PhysicalPage<Size4K>) -> Self {
        Self::new().with_valid(true).with_ppn(page.ppn())
    }

    #[inline]
    #[must_use]
    pub const fn physical_page(&self) -> PhysicalPage<Size4K> {
        PhysicalPage::from_ppn(self.ppn())
    }

    #[inline]
    pub const fn set_physical_page(&mut self, page: PhysicalPage<Size4K>) {
        self.set_ppn(page.ppn());
    }

    /// Valid with at least one of R/W/X.
    #[inline]
    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        self.valid() && (self.readable() || self.writable() || self.executable())
    }

    /// Valid with none of R/W/X: points to a lower-level table.
    #[inline]
    #[must_use]
    pub const fn is_table(&self) -> bool {
        self.valid() && !(self.readable() || self.writable() || self.executable())
    }

    /// Permission bits of this entry (R, W, X, U, G and the COW marker).
    #[inline]
    #[must_use]
    pub const fn perm(&self) -> PagePerm {
        PagePerm::from_bits_truncate(self.into_bits())
    }

    /// Replace the permission bits, keeping `V`, `A`, `D` and the page number.
    #[inline]
    pub const fn set_perm(&mut self, perm: PagePerm) {
        let keep = self.into_bits() & !PagePerm::all().bits();
        *self = Self::from_bits(keep | perm.bits());
    }
}
