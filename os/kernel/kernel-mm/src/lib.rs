//! # Process and Kernel Address Spaces
//!
//! Address-space level operations of the memory core, built from the page
//! allocator ([`kernel_alloc`]) and the Sv39 table manager ([`kernel_vmem`]).
//!
//! ## Components
//!
//! ### User address spaces ([`vmm`])
//! A [`UserSpace`] is a root table plus a size: every page in
//! `[0, round_up(size))` is mapped, nothing else below the trap frame is.
//! [`Vmm`] creates, grows, shrinks, duplicates and destroys them, and
//! resolves copy-on-write faults.
//!
//! ### Copy primitives ([`copy`])
//! [`Vmm::copy_out`], [`Vmm::copy_in`] and [`Vmm::copy_in_string`] move
//! bytes between kernel buffers and *untrusted* user addresses by walking the
//! user table, never by dereferencing user pointers.
//!
//! ### Kernel address space ([`kernel_space`])
//! [`KernelSpace::build`] creates the always-resident kernel map at boot.
//!
//! ## Copy-on-write in one picture
//!
//! ```text
//! fork:           parent PTE  W=1 ──┐            child PTE
//!                                   ▼
//!                 parent PTE  W=0 COW=1 ──► page (count 2) ◄── W=0 COW=1
//!
//! write fault:    resolve_write_fault(page)
//!                   count > 1 → copy to a fresh page, count(page) -= 1
//!                   count = 1 → keep page
//!                 faulting PTE  W=1 COW=0 ──► private page
//! ```
//!
//! ## Errors
//!
//! Exhaustion and bad user input come back as [`VmError`]; broken kernel
//! invariants panic.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod copy;
pub mod kernel_space;
pub mod vmm;

pub use crate::kernel_space::KernelSpace;
pub use crate::vmm::{UserSpace, VmError, Vmm};
