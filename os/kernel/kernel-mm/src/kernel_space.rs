//! The kernel's own address space.
//!
//! Built once at boot, before paging is on, and shared by every hart. All of
//! RAM is mapped at its physical address so the kernel can reach any page
//! directly, which is also what makes the identity
//! [`PhysMapper`](kernel_vmem::PhysMapper) valid after the switch.

use crate::vmm::Vmm;
use kernel_info::boot::BootMemory;
use kernel_info::memory::{
    KERNBASE, PAGE_SIZE, PLIC, PLIC_SIZE, TRAMPOLINE, UART0, VIRTIO0, kernel_stack,
};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};
use kernel_registers::TranslationControl;
use kernel_sync::CurrentCpu;
use kernel_vmem::{AddressSpace, PagePerm, PhysMapper};
use log::info;

/// Root of the kernel page table.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct KernelSpace {
    root: PhysicalPage<Size4K>,
}

impl KernelSpace {
    /// Build the kernel map:
    ///
    /// | Virtual | Physical | Size | Perm |
    /// |---------|----------|------|------|
    /// | `UART0` | same | 1 page | R W |
    /// | `VIRTIO0` | same | 1 page | R W |
    /// | `PLIC` | same | 4 MiB | R W |
    /// | `KERNBASE..etext` | same | text | R X |
    /// | `etext..phys_end` | same | data + RAM | R W |
    /// | `TRAMPOLINE` | trampoline code | 1 page | R X |
    /// | `kernel_stack(p)` | fresh page | 1 page per slot | R W |
    ///
    /// Every kernel stack has an unmapped guard page below it. `stacks` is
    /// the number of process slots, [`NPROC`](kernel_info::config::NPROC) in
    /// the kernel.
    ///
    /// # Panics
    /// If `boot` is inconsistent or any allocation fails; the kernel cannot
    /// run without this map.
    #[must_use]
    pub fn build<M: PhysMapper, C: CurrentCpu>(
        vmm: &Vmm<'_, M, C>,
        boot: &BootMemory,
        stacks: usize,
    ) -> Self {
        assert!(
            boot.is_consistent(),
            "kernel map: inconsistent boot layout {boot:?}"
        );

        let pages = vmm.allocator();
        let Some(tables) = AddressSpace::new(pages.mapper(), pages) else {
            panic!("kernel map: no page for the root table");
        };

        let map = |va: u64, pa: u64, size: u64, perm: PagePerm, what: &str| {
            if tables
                .map_range(pages, VirtualAddress::new(va), size, PhysicalAddress::new(pa), perm)
                .is_err()
            {
                panic!("kernel map: out of memory mapping {what}");
            }
        };

        map(UART0, UART0, PAGE_SIZE, PagePerm::RW, "UART0");
        map(VIRTIO0, VIRTIO0, PAGE_SIZE, PagePerm::RW, "VIRTIO0");
        map(PLIC, PLIC, PLIC_SIZE, PagePerm::RW, "PLIC");
        map(
            KERNBASE,
            KERNBASE,
            boot.kernel_text_end - KERNBASE,
            PagePerm::RX,
            "kernel text",
        );
        map(
            boot.kernel_text_end,
            boot.kernel_text_end,
            boot.phys_end - boot.kernel_text_end,
            PagePerm::RW,
            "kernel data",
        );
        map(TRAMPOLINE, boot.trampoline, PAGE_SIZE, PagePerm::RX, "trampoline");

        for slot in 0..stacks {
            let Ok(stack) = pages.allocate() else {
                panic!("kernel map: no page for kernel stack {slot}");
            };
            map(
                kernel_stack(slot),
                stack.base().as_u64(),
                PAGE_SIZE,
                PagePerm::RW,
                "kernel stack",
            );
        }

        info!(
            "Built kernel page table at {} ({} kernel stacks)",
            tables.root_page(),
            stacks
        );
        Self {
            root: tables.root_page(),
        }
    }

    #[inline]
    #[must_use]
    pub const fn root(&self) -> PhysicalPage<Size4K> {
        self.root
    }

    /// Switch the current hart to the kernel map.
    ///
    /// # Safety
    /// The running code and stack must be mapped at their current addresses
    /// in this map (true for the identity-mapped boot path).
    pub unsafe fn activate<M: PhysMapper, T: TranslationControl + ?Sized>(
        &self,
        mapper: &M,
        mmu: &T,
    ) {
        let tables = AddressSpace::from_root(mapper, self.root);
        unsafe { tables.activate(mmu) };
        info!("Kernel paging enabled, root {}", self.root);
    }
}
