#![allow(dead_code)]

use kernel_alloc::PageAllocator;
use kernel_info::config::{DuplicationPolicy, MemoryConfig};
use kernel_info::memory::PAGE_SIZE;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};
use kernel_sync::BootCpu;
use kernel_vmem::{AddressSpace, FrameArena, PageEntryBits};

pub const RAM: u64 = 0x8000_0000;

pub type Pages<'r> = PageAllocator<&'r FrameArena, BootCpu>;

pub fn arena(frames: usize) -> FrameArena {
    FrameArena::new(PhysicalAddress::new(RAM), frames)
}

pub fn allocator(ram: &FrameArena, policy: DuplicationPolicy) -> Pages<'_> {
    PageAllocator::new(
        ram,
        BootCpu,
        MemoryConfig::new(1, policy),
        ram.start(),
        ram.end(),
    )
}

/// Leaf entry of page `n` in the table rooted at `root`.
pub fn leaf(ram: &FrameArena, root: PhysicalPage<Size4K>, n: u64) -> PageEntryBits {
    *AddressSpace::from_root(ram, root)
        .walk(VirtualAddress::new(n * PAGE_SIZE))
        .unwrap()
}
