//! # Kernel Memory Layout and Configuration
//!
//! This crate is the single source of truth for the numbers every memory
//! subsystem crate has to agree on: page geometry, the highest usable virtual
//! address, where devices and RAM live in physical memory, and where the
//! kernel puts its trampoline, trap frames and per-process kernel stacks.
//!
//! ## Modules
//!
//! ### Memory Layout ([`memory`])
//! Compile-time constants for the Sv39 reference platform (QEMU `virt`):
//!
//! ```text
//! Physical memory                         Kernel virtual memory
//!
//! 0x0C00_0000 PLIC                        MAXVA ┌────────────────────┐
//!                                               │ trampoline (R X)   │
//! 0x1000_0000 UART0                 TRAMPOLINE  ├────────────────────┤
//! 0x1000_1000 VIRTIO0                           │ guard              │
//! 0x8000_0000 KERNBASE (text)                   │ kstack p (R W)     │
//!   etext     kernel data, free RAM             │ ...                │
//! PHYSTOP     end of managed RAM                ├────────────────────┤
//!                                               │ direct map of RAM  │
//!                                      KERNBASE └────────────────────┘
//! ```
//!
//! ### Boot Handoff ([`boot`])
//! The `#[repr(C)]` record the platform layer fills in before the memory core
//! is brought up: managed physical range and the linker-provided symbols the
//! kernel map needs.
//!
//! ### Runtime Policy ([`config`])
//! [`MemoryConfig`](config::MemoryConfig) selects, once at initialization, how
//! many allocator partitions exist and whether `fork` copies eagerly or shares
//! pages copy-on-write.
//!
//! ## Usage
//!
//! ```rust
//! use kernel_info::config::{DuplicationPolicy, MemoryConfig};
//! use kernel_info::memory::{MAXVA, PAGE_SIZE, TRAMPOLINE};
//!
//! let config = MemoryConfig::new(4, DuplicationPolicy::CopyOnWrite);
//! assert!(config.reference_counting());
//! assert_eq!(TRAMPOLINE + PAGE_SIZE, MAXVA);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod config;
pub mod memory;
