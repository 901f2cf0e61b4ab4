//! # Kernel Boot Handoff

use crate::memory::{KERNBASE, PHYSTOP};

/// Physical memory facts the platform layer hands to the memory core.
///
/// Keep this `#[repr(C)]`; it is filled in by early assembly/linker glue.
#[repr(C)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BootMemory {
    /// First byte after the kernel image (`end` in the linker script).
    /// Everything from here up to [`phys_end`](Self::phys_end) is handed to
    /// the page allocator.
    pub phys_start: u64,

    /// End of usable RAM (exclusive).
    pub phys_end: u64,

    /// End of kernel text (`etext`). Text is mapped R+X, everything after
    /// it R+W.
    pub kernel_text_end: u64,

    /// Physical address of the trampoline code page.
    pub trampoline: u64,
}

impl BootMemory {
    /// Layout of the reference platform, given the linker symbols.
    #[must_use]
    pub const fn new(kernel_end: u64, kernel_text_end: u64, trampoline: u64) -> Self {
        Self {
            phys_start: kernel_end,
            phys_end: PHYSTOP,
            kernel_text_end,
            trampoline,
        }
    }

    /// Whether the recorded bounds are ordered the way the kernel map expects.
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        KERNBASE <= self.kernel_text_end
            && self.kernel_text_end <= self.phys_start
            && self.phys_start <= self.phys_end
    }
}
