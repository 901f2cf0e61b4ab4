//! Per-page reference counts for copy-on-write sharing.

use alloc::boxed::Box;
use alloc::vec;
use kernel_sync::{SpinLock, SpinLockGuard};

/// One counter per managed page, behind a single lock.
///
/// Counts are indexed like the allocator's pages. No operation here
/// allocates or frees; that policy lives in
/// [`PageAllocator`](crate::PageAllocator).
pub struct RefCountTable {
    counts: SpinLock<Box<[u32]>>,
}

impl RefCountTable {
    /// `pages` counters, all zero.
    #[must_use]
    pub fn new(pages: usize) -> Self {
        Self {
            counts: SpinLock::new(vec![0; pages].into_boxed_slice()),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.counts.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set(&self, index: usize, count: u32) {
        self.counts.lock()[index] = count;
    }

    /// Add one reference; returns the new count.
    pub fn increment(&self, index: usize) -> u32 {
        let mut counts = self.counts.lock();
        counts[index] += 1;
        counts[index]
    }

    /// Drop one reference, saturating at zero; returns the new count.
    pub fn decrement(&self, index: usize) -> u32 {
        let mut counts = self.counts.lock();
        counts[index] = counts[index].saturating_sub(1);
        counts[index]
    }

    #[must_use]
    pub fn count(&self, index: usize) -> u32 {
        self.counts.lock()[index]
    }

    /// Hold the table lock across a compound update.
    ///
    /// Partition locks may be taken while this guard is alive, never the
    /// other way round.
    pub fn lock(&self) -> SpinLockGuard<'_, Box<[u32]>> {
        self.counts.lock()
    }
}
