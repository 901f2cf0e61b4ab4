/// Identifies the CPU executing the caller.
///
/// Implementations must return a value in `0..partitions` for every consumer
/// that indexes per-CPU state with it, and the value must not change while the
/// caller is inside a critical section.
pub trait CurrentCpu {
    fn cpu_id(&self) -> usize;
}

impl<C: CurrentCpu + ?Sized> CurrentCpu for &C {
    #[inline]
    fn cpu_id(&self) -> usize {
        (**self).cpu_id()
    }
}

/// Single-CPU stand-in: always CPU 0.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct BootCpu;

impl CurrentCpu for BootCpu {
    #[inline]
    fn cpu_id(&self) -> usize {
        0
    }
}

/// Reads the hart id the boot code parks in `tp`.
#[cfg(target_arch = "riscv64")]
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct HartId;

#[cfg(target_arch = "riscv64")]
impl CurrentCpu for HartId {
    #[inline]
    fn cpu_id(&self) -> usize {
        let id: usize;
        // SAFETY: reads a general purpose register, no side effects.
        unsafe {
            core::arch::asm!("mv {}, tp", out(reg) id, options(nomem, nostack, preserves_flags));
        }
        id
    }
}
