#[cfg(all(feature = "asm", target_arch = "riscv64"))]
use crate::StoreRegisterUnsafe;
use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalPage, Size4K};

/// `satp.MODE` encodings the kernel uses.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum SatpMode {
    /// No translation; virtual equals physical.
    Bare = 0,
    /// Three-level, 39-bit virtual addresses.
    Sv39 = 8,
}

impl SatpMode {
    const fn into_bits(self) -> u8 {
        self as u8
    }

    const fn from_bits(value: u8) -> Self {
        match value {
            8 => Self::Sv39,
            _ => Self::Bare,
        }
    }
}

/// `satp`: Supervisor Address Translation and Protection (RV64).
///
/// ```text
///  63   60 59        44 43                      0
/// | MODE  |    ASID    |           PPN           |
/// ```
#[bitfield(u64)]
pub struct Satp {
    /// Bits 0–43: physical page number of the root page table.
    #[bits(44)]
    pub ppn: u64,

    /// Bits 44–59: address-space identifier. The memory core always uses 0.
    #[bits(16)]
    pub asid: u16,

    /// Bits 60–63: translation scheme.
    #[bits(4)]
    pub mode: SatpMode,
}

impl Satp {
    /// `satp` value selecting Sv39 translation rooted at `root`.
    #[must_use]
    pub fn sv39(root: PhysicalPage<Size4K>) -> Self {
        Self::new().with_mode(SatpMode::Sv39).with_ppn(root.ppn())
    }

    /// Root table page named by this value.
    #[must_use]
    pub fn root(&self) -> PhysicalPage<Size4K> {
        PhysicalPage::from_ppn(self.ppn())
    }
}

#[cfg(all(feature = "asm", target_arch = "riscv64"))]
impl StoreRegisterUnsafe for Satp {
    unsafe fn store_unsafe(self) {
        let satp = self.into_bits();
        unsafe {
            core::arch::asm!("csrw satp, {}", in(reg) satp, options(nostack, preserves_flags));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_memory_addresses::PhysicalAddress;

    #[test]
    fn sv39_encoding_matches_make_satp() {
        let root = PhysicalAddress::new(0x8765_4000).page::<Size4K>();
        let satp = Satp::sv39(root);
        assert_eq!(satp.into_bits(), (8u64 << 60) | (0x8765_4000 >> 12));
        assert_eq!(satp.mode(), SatpMode::Sv39);
        assert_eq!(satp.asid(), 0);
        assert_eq!(satp.root(), root);
    }

    #[test]
    fn bare_decodes_from_zero() {
        assert_eq!(Satp::from_bits(0).mode(), SatpMode::Bare);
    }
}
