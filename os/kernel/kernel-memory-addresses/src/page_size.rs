use core::fmt;
use core::hash::Hash;

/// Sealed trait pattern to restrict `PageSize` impls to our markers.
mod sealed {
    pub trait Sealed {}
}

/// Marker trait for the page sizes an Sv39 leaf can map.
pub trait PageSize:
    sealed::Sealed + Clone + Copy + Eq + PartialEq + Ord + PartialOrd + Hash + fmt::Debug
{
    /// Page size in bytes (power of two).
    const SIZE: u64;
    /// log2(SIZE), i.e., number of low bits used for the offset.
    const SHIFT: u32;
    /// Table level whose leaf maps a page of this size.
    const LEVEL: usize;
    /// Short human-readable name.
    const NAME: &'static str;
}

macro_rules! page_size {
    ($(#[$doc:meta])* $name:ident, $shift:expr, $level:expr, $label:literal) => {
        $(#[$doc])*
        #[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name;

        impl sealed::Sealed for $name {}

        impl PageSize for $name {
            const SIZE: u64 = 1 << $shift;
            const SHIFT: u32 = $shift;
            const LEVEL: usize = $level;
            const NAME: &'static str = $label;
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(Self::NAME)
            }
        }
    };
}

page_size!(
    /// 4 KiB page, mapped by a level-0 leaf.
    Size4K, 12, 0, "4K"
);
page_size!(
    /// 2 MiB megapage, mapped by a level-1 leaf.
    Size2M, 21, 1, "2M"
);
page_size!(
    /// 1 GiB gigapage, mapped by a level-2 leaf.
    Size1G, 30, 2, "1G"
);
