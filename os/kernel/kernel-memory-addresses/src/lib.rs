//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for the raw addresses and page bases handled by the
//! memory core, so that a physical page can never be passed where a virtual
//! address is expected (and vice versa).
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`MemoryAddress`] | Raw 64-bit address, no intent attached. |
//! | [`PhysicalAddress`] / [`PhysicalPage<S>`] | RAM or MMIO as seen on the bus. |
//! | [`VirtualAddress`] / [`VirtualPage<S>`] | Addresses translated by a page table. |
//!
//! ## Page Sizes
//!
//! Sv39 terminates a walk at one of three levels. Each level maps a page of a
//! fixed size, modelled by a marker implementing [`PageSize`]:
//!
//! | Marker | Size | Leaf at level |
//! |--------|------|---------------|
//! | [`Size4K`] | 4 KiB | 0 |
//! | [`Size2M`] | 2 MiB | 1 |
//! | [`Size1G`] | 1 GiB | 2 |
//!
//! The memory core only installs level-0 leaves; the larger sizes exist so the
//! page-table walk can name its levels by the amount of memory they span.
//!
//! ## Sv39 Virtual Address Split
//!
//! ```text
//!  63      39 38    30 29    21 20    12 11         0
//! |  zero    |  VPN2  |  VPN1  |  VPN0  |  offset    |
//! ```
//!
//! [`VirtualAddress::table_index`] extracts `VPNn` for level `n`.
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0x0000_0012_3456_7890);
//! let page = va.page::<Size4K>();
//! assert_eq!(page.base().as_u64(), 0x0000_0012_3456_7000);
//! assert_eq!(page.join(va.offset::<Size4K>()), va);
//!
//! assert_eq!(va.table_index(0), (0x0000_0012_3456_7890 >> 12) & 0x1FF);
//! assert_eq!(page_round_up(4097), 8192);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

mod memory_address;
mod page_size;
mod physical_address;
mod physical_page;
mod virtual_address;
mod virtual_page;

pub use crate::memory_address::MemoryAddress;
pub use crate::page_size::{PageSize, Size1G, Size2M, Size4K};
pub use crate::physical_address::PhysicalAddress;
pub use crate::physical_page::PhysicalPage;
pub use crate::virtual_address::VirtualAddress;
pub use crate::virtual_page::VirtualPage;

/// Mask for one 9-bit Sv39 table index.
pub const LEVEL_INDEX_MASK: u64 = 0x1FF;

/// Round `x` down to a 4 KiB page boundary.
#[inline(always)]
#[must_use]
pub const fn page_round_down(x: u64) -> u64 {
    x & !(Size4K::SIZE - 1)
}

/// Round `x` up to a 4 KiB page boundary.
///
/// `x + 4095` must not overflow; sizes and addresses handled by the memory
/// core are bounded by `MAXVA` and never come close.
#[inline(always)]
#[must_use]
pub const fn page_round_up(x: u64) -> u64 {
    (x + Size4K::SIZE - 1) & !(Size4K::SIZE - 1)
}
