//! # Memory Core Policy
//!
//! Build-time variants of the memory core (single pool vs. per-CPU free lists,
//! eager vs. copy-on-write `fork`) are expressed as one runtime value chosen
//! when the allocator is created.

/// Maximum number of CPUs the kernel brings up.
pub const NCPU: usize = 8;

/// Maximum number of process slots; one kernel stack is mapped per slot.
pub const NPROC: usize = 64;

/// How an address space is copied when a process forks.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum DuplicationPolicy {
    /// Every page is copied into a fresh page up front.
    Eager,
    /// Pages are shared read-only and copied on the first write.
    #[default]
    CopyOnWrite,
}

/// Memory core configuration, fixed for the lifetime of the allocator.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MemoryConfig {
    /// Number of independent free-list partitions (normally one per CPU).
    pub partitions: usize,
    /// `fork` duplication strategy.
    pub duplication: DuplicationPolicy,
}

impl MemoryConfig {
    /// # Panics
    /// Panics if `partitions` is zero.
    #[must_use]
    pub const fn new(partitions: usize, duplication: DuplicationPolicy) -> Self {
        assert!(partitions > 0, "at least one allocator partition is required");
        Self {
            partitions,
            duplication,
        }
    }

    /// A single shared free list with eager copying.
    #[must_use]
    pub const fn single_pool() -> Self {
        Self::new(1, DuplicationPolicy::Eager)
    }

    /// Physical pages carry reference counts only when they can be shared.
    #[inline]
    #[must_use]
    pub const fn reference_counting(&self) -> bool {
        matches!(self.duplication, DuplicationPolicy::CopyOnWrite)
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self::new(NCPU, DuplicationPolicy::CopyOnWrite)
    }
}
