//! # Kernel synchronization primitives
//!
//! A test-and-test-and-set [`SpinLock`] that remembers which CPU holds it, and
//! the [`CurrentCpu`] seam through which lock users learn who they are.
//!
//! Knowing the holder lets a caller that is about to visit several locks of the
//! same family (for example the allocator walking other CPUs' free lists) skip
//! the ones it already holds instead of spinning on itself forever.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod cpu;
mod spin_lock;

pub use cpu::{BootCpu, CurrentCpu};
#[cfg(target_arch = "riscv64")]
pub use cpu::HartId;
pub use spin_lock::{ANONYMOUS_HOLDER, SpinLock, SpinLockGuard};
