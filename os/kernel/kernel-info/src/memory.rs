//! # Memory Layout

/// Bytes per page.
pub const PAGE_SIZE: u64 = 4096;

/// Bits of byte offset within a page.
pub const PAGE_SHIFT: u32 = 12;

/// Entries per page-table page (Sv39: 512 eight-byte entries).
pub const ENTRIES_PER_TABLE: usize = 512;

/// Index bits consumed per table level.
pub const LEVEL_BITS: u32 = 9;

/// Number of table levels in an Sv39 walk.
pub const TABLE_LEVELS: usize = 3;

/// One beyond the highest virtual address usable by the kernel and by user
/// processes.
///
/// Sv39 allows 39 bits, but addresses with bit 38 set would have to be
/// sign-extended. Using one bit less avoids that entirely.
#[allow(clippy::cast_possible_truncation)]
pub const MAXVA: u64 = 1 << (LEVEL_BITS * TABLE_LEVELS as u32 + PAGE_SHIFT - 1);

/// Platform-level interrupt controller.
pub const PLIC: u64 = 0x0C00_0000;

/// Size of the PLIC register window (4 MiB).
pub const PLIC_SIZE: u64 = 0x40_0000;

/// 16550 UART registers.
pub const UART0: u64 = 0x1000_0000;

/// virtio MMIO disk interface.
pub const VIRTIO0: u64 = 0x1000_1000;

/// The boot ROM jumps here; the kernel image starts at this address.
pub const KERNBASE: u64 = 0x8000_0000;

/// End of the RAM used by the kernel and user pages.
pub const PHYSTOP: u64 = KERNBASE + 128 * 1024 * 1024;

/// The trampoline page sits at the highest virtual address, in both the
/// kernel and every user address space.
pub const TRAMPOLINE: u64 = MAXVA - PAGE_SIZE;

/// Per-process trap frame, directly below the trampoline in user space.
pub const TRAPFRAME: u64 = TRAMPOLINE - PAGE_SIZE;

/// Fill byte written over every page handed out by the page allocator.
pub const ALLOC_JUNK: u8 = 0x05;

/// Fill byte written over every page returned to the page allocator.
pub const FREE_JUNK: u8 = 0x01;

/// Virtual address of the kernel stack of process slot `slot`.
///
/// Stacks live beneath the trampoline, each followed by an unmapped guard page.
#[inline]
#[must_use]
pub const fn kernel_stack(slot: usize) -> u64 {
    TRAMPOLINE - (slot as u64) * 2 * PAGE_SIZE - 3 * PAGE_SIZE
}

const _: () = {
    assert!(PAGE_SIZE == 1 << PAGE_SHIFT);
    assert!(ENTRIES_PER_TABLE == 1 << LEVEL_BITS);
    assert!(MAXVA == 0x40_0000_0000);
    assert!(PHYSTOP > KERNBASE);
    assert!(PHYSTOP < TRAPFRAME);
    assert!(KERNBASE.is_multiple_of(PAGE_SIZE));
    assert!(PLIC_SIZE.is_multiple_of(PAGE_SIZE));
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stacks_are_separated_by_guard_pages() {
        let first = kernel_stack(0);
        let second = kernel_stack(1);
        assert_eq!(first - second, 2 * PAGE_SIZE);
        assert!(first + PAGE_SIZE < TRAMPOLINE);
        assert!(first.is_multiple_of(PAGE_SIZE));
    }
}
