//! # Typed RISC-V Supervisor Registers
//!
//! Only what the memory core touches: the `satp` translation register and the
//! `sfence.vma` TLB fence. Instruction wrappers are compiled for `riscv64`
//! targets with the `asm` feature; elsewhere the bitfield types still build so
//! that table code can be tested on the host through [`TranslationControl`].

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(feature = "satp")]
pub mod satp;

#[cfg(feature = "satp")]
pub use satp::{Satp, SatpMode};

pub trait StoreRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require supervisor mode.
    unsafe fn store_unsafe(self);
}

/// The hardware side of switching address spaces.
///
/// The memory core never writes `satp` itself; it hands the value to an
/// implementation of this trait.
#[cfg(feature = "satp")]
pub trait TranslationControl {
    /// Make `satp` the active translation root and discard stale TLB entries.
    ///
    /// # Safety
    /// The table named by `satp` must map the currently executing code and
    /// stack at their current addresses, or the next fetch faults.
    unsafe fn install(&self, satp: Satp);
}

#[cfg(feature = "satp")]
impl<T: TranslationControl + ?Sized> TranslationControl for &T {
    #[inline]
    unsafe fn install(&self, satp: Satp) {
        unsafe { (**self).install(satp) }
    }
}

/// The executing hart's own MMU.
#[cfg(all(feature = "asm", feature = "satp", target_arch = "riscv64"))]
#[derive(Debug, Default, Copy, Clone)]
pub struct HartMmu;

#[cfg(all(feature = "asm", feature = "satp", target_arch = "riscv64"))]
impl TranslationControl for HartMmu {
    unsafe fn install(&self, satp: Satp) {
        // Fence before the switch so earlier table writes are visible to the walker.
        sfence_vma();
        unsafe { satp.store_unsafe() };
        sfence_vma();
    }
}

/// Flush every TLB entry of the executing hart (`sfence.vma zero, zero`).
#[cfg(all(feature = "asm", target_arch = "riscv64"))]
#[inline]
pub fn sfence_vma() {
    // SAFETY: a fence has no architectural effect besides ordering and flushing.
    unsafe {
        core::arch::asm!("sfence.vma zero, zero", options(nostack, preserves_flags));
    }
}
