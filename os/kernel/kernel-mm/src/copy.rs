//! Moving bytes between kernel buffers and user virtual addresses.
//!
//! User addresses are untrusted: every page is translated through the user
//! table with the same checks the MMU applies to U-mode, and a failure is an
//! error value, never a fault. Copies proceed page by page and stop at the
//! first bad page without undoing what was already copied.

use crate::vmm::{UserSpace, VmError, Vmm};
use kernel_info::memory::PAGE_SIZE;
use kernel_memory_addresses::{VirtualAddress, page_round_down};
use kernel_sync::CurrentCpu;
use kernel_vmem::{PhysMapper, page_bytes};

/// Splits `[va, va + len)` into per-page chunks: `(page_va, offset, len)`.
fn chunks(va: u64, len: usize) -> impl Iterator<Item = (u64, usize, usize)> {
    let mut va = va;
    let mut left = len;
    core::iter::from_fn(move || {
        if left == 0 {
            return None;
        }
        let page = page_round_down(va);
        #[allow(clippy::cast_possible_truncation)]
        let offset = (va - page) as usize;
        #[allow(clippy::cast_possible_truncation)]
        let n = left.min(PAGE_SIZE as usize - offset);
        left -= n;
        va = page.wrapping_add(PAGE_SIZE);
        Some((page, offset, n))
    })
}

impl<M: PhysMapper, C: CurrentCpu> Vmm<'_, M, C> {
    /// Copy `src` to user address `dst` in `space`.
    ///
    /// A copy-on-write destination page is made private first, exactly as a
    /// user store would, so the write never shows through to another space.
    ///
    /// # Errors
    /// - [`VmError::BadAddress`]: a destination page is not a mapped user page.
    /// - [`VmError::ReadOnly`]: a destination page is neither writable nor COW.
    /// - [`VmError::OutOfMemory`]: breaking a COW share needed a page.
    ///
    /// Pages before the failing one have been written.
    pub fn copy_out(
        &self,
        space: &mut UserSpace,
        dst: VirtualAddress,
        src: &[u8],
    ) -> Result<(), VmError> {
        let tables = self.tables(space.root());
        let mut copied = 0;
        for (page_va, offset, n) in chunks(dst.as_u64(), src.len()) {
            let va = VirtualAddress::new(page_va);
            let entry = tables.user_entry(va)?;
            let page = if entry.copy_on_write() {
                self.break_cow(&tables, va)?
            } else if entry.writable() {
                entry.physical_page()
            } else {
                return Err(VmError::ReadOnly);
            };
            // SAFETY: the page is mapped, writable and private to `space`.
            let bytes = unsafe { page_bytes(self.mapper(), page) };
            bytes[offset..offset + n].copy_from_slice(&src[copied..copied + n]);
            copied += n;
        }
        Ok(())
    }

    /// Fill `dst` from user address `src` in `space`.
    ///
    /// # Errors
    /// [`VmError::BadAddress`] if a source page is not a mapped user page.
    /// `dst` is partially filled in that case.
    pub fn copy_in(
        &self,
        space: &UserSpace,
        dst: &mut [u8],
        src: VirtualAddress,
    ) -> Result<(), VmError> {
        let tables = self.tables(space.root());
        let mut copied = 0;
        for (page_va, offset, n) in chunks(src.as_u64(), dst.len()) {
            let page = tables.translate(VirtualAddress::new(page_va))?;
            // SAFETY: mapped user page; only read.
            let bytes = unsafe { page_bytes(self.mapper(), page) };
            dst[copied..copied + n].copy_from_slice(&bytes[offset..offset + n]);
            copied += n;
        }
        Ok(())
    }

    /// Copy a NUL-terminated string from user address `src` into `dst`.
    ///
    /// At most `min(max, dst.len())` bytes are consumed. Returns the number of
    /// bytes written, terminator included.
    ///
    /// # Errors
    /// - [`VmError::NoTerminator`]: no NUL within the limit.
    /// - [`VmError::BadAddress`]: the string runs into a bad page first.
    pub fn copy_in_string(
        &self,
        space: &UserSpace,
        dst: &mut [u8],
        src: VirtualAddress,
        max: usize,
    ) -> Result<usize, VmError> {
        let limit = max.min(dst.len());
        let tables = self.tables(space.root());
        let mut copied = 0;
        for (page_va, offset, n) in chunks(src.as_u64(), limit) {
            let page = tables.translate(VirtualAddress::new(page_va))?;
            // SAFETY: mapped user page; only read.
            let bytes = unsafe { page_bytes(self.mapper(), page) };
            for &b in &bytes[offset..offset + n] {
                dst[copied] = b;
                copied += 1;
                if b == 0 {
                    return Ok(copied);
                }
            }
        }
        Err(VmError::NoTerminator(limit))
    }
}
