//! # Kernel Physical Page Allocation
//!
//! The physical page allocator of the memory core, and the reference counts
//! that let several address spaces share one page copy-on-write.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  PageAllocator                      │
//! │    • allocate / free of 4 KiB pages                 │
//! │    • COW write-fault resolution                     │
//! └───────┬─────────────────────────────────┬───────────┘
//!         │                                 │
//! ┌───────▼─────────────────────┐  ┌────────▼──────────┐
//! │  per-CPU free lists          │  │  RefCountTable    │
//! │  (one SpinLock each,         │  │  (own SpinLock,   │
//! │   shared `next` side array)  │  │   taken first)    │
//! └──────────────────────────────┘  └───────────────────┘
//! ```
//!
//! ### Free lists ([`free_list`])
//!
//! Every managed page has one `next` slot in a side array; a partition is a
//! head index plus a length. Free memory itself is never written as a list
//! node, so a stray write through a dangling pointer cannot corrupt the
//! allocator, and freed pages can be filled with junk unconditionally.
//!
//! Each CPU allocates from and frees to its own partition. An empty partition
//! steals from the others in circular order, one lock at a time.
//!
//! ### Reference counts ([`refcount`])
//!
//! Enabled when [`MemoryConfig::reference_counting`](kernel_info::config::MemoryConfig::reference_counting)
//! holds. A freshly allocated page has count 1; [`PageAllocator::free`] only
//! reclaims a page when its last reference goes.
//!
//! ### Lock ordering
//!
//! The reference-count lock is always taken before any partition lock.
//! [`PageAllocator::allocate`] drops its partition lock before it touches the
//! counts.
//!
//! ## Sentinels
//!
//! Allocated pages are filled with [`ALLOC_JUNK`](kernel_info::memory::ALLOC_JUNK)
//! (`0x05`), reclaimed pages with [`FREE_JUNK`](kernel_info::memory::FREE_JUNK)
//! (`0x01`), so use of uninitialized or freed memory shows up quickly.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

pub mod free_list;
mod page_allocator;
pub mod refcount;

pub use crate::page_allocator::{AllocError, PageAllocator};
pub use crate::refcount::RefCountTable;
