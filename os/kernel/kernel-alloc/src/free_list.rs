//! Index-based singly linked free lists.
//!
//! Pages are named by their index within the managed range. All lists of one
//! allocator share a single `links` array holding each page's successor;
//! a page is on at most one list, so its slot has at most one writer at a
//! time (whoever holds that list's lock).

use core::sync::atomic::{AtomicU32, Ordering};

/// End-of-list marker.
pub const NIL: u32 = u32::MAX;

/// One partition: head index and length.
#[derive(Debug)]
pub struct FreeList {
    head: u32,
    len: usize,
}

impl FreeList {
    #[must_use]
    pub const fn new() -> Self {
        Self { head: NIL, len: 0 }
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.head == NIL
    }

    /// Push page `index` on the front.
    #[inline]
    pub fn push(&mut self, links: &[AtomicU32], index: u32) {
        debug_assert_ne!(index, NIL);
        links[index as usize].store(self.head, Ordering::Relaxed);
        self.head = index;
        self.len += 1;
    }

    /// Pop the front page.
    #[inline]
    pub fn pop(&mut self, links: &[AtomicU32]) -> Option<u32> {
        if self.head == NIL {
            return None;
        }
        let index = self.head;
        self.head = links[index as usize].swap(NIL, Ordering::Relaxed);
        self.len -= 1;
        Some(index)
    }
}

impl Default for FreeList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn links(n: usize) -> Vec<AtomicU32> {
        (0..n).map(|_| AtomicU32::new(NIL)).collect()
    }

    #[test]
    fn lifo_order_and_length() {
        let links = links(4);
        let mut list = FreeList::new();
        assert!(list.is_empty());

        list.push(&links, 2);
        list.push(&links, 0);
        list.push(&links, 3);
        assert_eq!(list.len(), 3);

        assert_eq!(list.pop(&links), Some(3));
        assert_eq!(list.pop(&links), Some(0));
        assert_eq!(list.pop(&links), Some(2));
        assert_eq!(list.pop(&links), None);
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn two_lists_share_one_link_array() {
        let links = links(4);
        let mut a = FreeList::new();
        let mut b = FreeList::new();
        a.push(&links, 0);
        b.push(&links, 1);
        a.push(&links, 2);
        b.push(&links, 3);

        // move a page from one list to the other
        let moved = a.pop(&links).unwrap();
        b.push(&links, moved);

        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 3);
        assert_eq!(b.pop(&links), Some(2));
        assert_eq!(b.pop(&links), Some(3));
        assert_eq!(b.pop(&links), Some(1));
        assert_eq!(a.pop(&links), Some(0));
    }
}
