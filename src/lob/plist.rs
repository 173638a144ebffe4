#![forbid(unsafe_code)]
//! Doubly linked lists confined to a single page.
//!
//! Nodes are identified by their in-page byte offset; offset 0 is null since
//! the page header never holds a node. The base is 6 bytes (length, first,
//! last) and each node starts with a 4-byte `prev`/`next` pair.

use crate::primitives::mtr::PageAccess;
use crate::types::page::PAGE_HDR_LEN;
use crate::types::{LobError, PageNo, Result};

/// Size of a base.
pub const BASE_LEN: usize = 6;
/// Size of a node's link pair.
pub const NODE_LEN: usize = 4;

/// Null node offset.
pub const NULL: u16 = 0;

/// A page list anchored at `base` within `page`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PageList {
    /// Page holding the base and every node.
    pub page: PageNo,
    /// Offset of the base.
    pub base: usize,
}

impl PageList {
    /// Handle to the list anchored at `base`.
    pub fn new(page: PageNo, base: usize) -> Self {
        Self { page, base }
    }

    fn check(node: u16) -> Result<usize> {
        if node == NULL {
            return Err(LobError::Invalid("null page list node"));
        }
        if (node as usize) < PAGE_HDR_LEN {
            return Err(LobError::Corruption("page list node inside page header"));
        }
        Ok(node as usize)
    }

    /// Writes an empty base.
    pub fn init<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<()> {
        a.write_bytes(self.page, self.base, &[0u8; BASE_LEN])
    }

    /// Number of nodes.
    pub fn len<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<u16> {
        a.read_u16(self.page, self.base)
    }

    /// Head node offset, or [`NULL`].
    pub fn first<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<u16> {
        a.read_u16(self.page, self.base + 2)
    }

    /// Tail node offset, or [`NULL`].
    pub fn last<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<u16> {
        a.read_u16(self.page, self.base + 4)
    }

    /// Node after `node`.
    pub fn next<A: PageAccess + ?Sized>(&self, a: &mut A, node: u16) -> Result<u16> {
        a.read_u16(self.page, Self::check(node)? + 2)
    }

    /// Node before `node`.
    pub fn prev<A: PageAccess + ?Sized>(&self, a: &mut A, node: u16) -> Result<u16> {
        a.read_u16(self.page, Self::check(node)?)
    }

    fn set_len<A: PageAccess + ?Sized>(&self, a: &mut A, v: u16) -> Result<()> {
        a.write_u16(self.page, self.base, v)
    }

    fn set_first<A: PageAccess + ?Sized>(&self, a: &mut A, v: u16) -> Result<()> {
        a.write_u16(self.page, self.base + 2, v)
    }

    fn set_last<A: PageAccess + ?Sized>(&self, a: &mut A, v: u16) -> Result<()> {
        a.write_u16(self.page, self.base + 4, v)
    }

    fn set_next<A: PageAccess + ?Sized>(&self, a: &mut A, node: u16, v: u16) -> Result<()> {
        a.write_u16(self.page, Self::check(node)? + 2, v)
    }

    fn set_prev<A: PageAccess + ?Sized>(&self, a: &mut A, node: u16, v: u16) -> Result<()> {
        a.write_u16(self.page, Self::check(node)?, v)
    }

    fn bump<A: PageAccess + ?Sized>(&self, a: &mut A, grow: bool) -> Result<()> {
        let n = self.len(a)?;
        let n = if grow {
            n.checked_add(1)
                .ok_or(LobError::Corruption("page list length overflow"))?
        } else {
            n.checked_sub(1)
                .ok_or(LobError::Corruption("page list length underflow"))?
        };
        self.set_len(a, n)
    }

    /// Links `node` at the head.
    pub fn add_first<A: PageAccess + ?Sized>(&self, a: &mut A, node: u16) -> Result<()> {
        Self::check(node)?;
        let old = self.first(a)?;
        self.set_prev(a, node, NULL)?;
        self.set_next(a, node, old)?;
        if old == NULL {
            self.set_last(a, node)?;
        } else {
            self.set_prev(a, old, node)?;
        }
        self.set_first(a, node)?;
        self.bump(a, true)
    }

    /// Links `node` at the tail.
    pub fn add_last<A: PageAccess + ?Sized>(&self, a: &mut A, node: u16) -> Result<()> {
        Self::check(node)?;
        let old = self.last(a)?;
        self.set_next(a, node, NULL)?;
        self.set_prev(a, node, old)?;
        if old == NULL {
            self.set_first(a, node)?;
        } else {
            self.set_next(a, old, node)?;
        }
        self.set_last(a, node)?;
        self.bump(a, true)
    }

    /// Same as [`PageList::add_first`].
    pub fn push_front<A: PageAccess + ?Sized>(&self, a: &mut A, node: u16) -> Result<()> {
        self.add_first(a, node)
    }

    /// Same as [`PageList::add_last`].
    pub fn push_back<A: PageAccess + ?Sized>(&self, a: &mut A, node: u16) -> Result<()> {
        self.add_last(a, node)
    }

    /// Inserts `node` immediately after `existing`.
    pub fn insert_after<A: PageAccess + ?Sized>(
        &self,
        a: &mut A,
        existing: u16,
        node: u16,
    ) -> Result<()> {
        Self::check(node)?;
        let after = self.next(a, existing)?;
        self.set_prev(a, node, existing)?;
        self.set_next(a, node, after)?;
        self.set_next(a, existing, node)?;
        if after == NULL {
            self.set_last(a, node)?;
        } else {
            self.set_prev(a, after, node)?;
        }
        self.bump(a, true)
    }

    /// Inserts `node` immediately before `existing`.
    pub fn insert_before<A: PageAccess + ?Sized>(
        &self,
        a: &mut A,
        existing: u16,
        node: u16,
    ) -> Result<()> {
        Self::check(node)?;
        let before = self.prev(a, existing)?;
        self.set_next(a, node, existing)?;
        self.set_prev(a, node, before)?;
        self.set_prev(a, existing, node)?;
        if before == NULL {
            self.set_first(a, node)?;
        } else {
            self.set_next(a, before, node)?;
        }
        self.bump(a, true)
    }

    /// Unlinks `node` and clears both of its links.
    pub fn remove<A: PageAccess + ?Sized>(&self, a: &mut A, node: u16) -> Result<()> {
        let before = self.prev(a, node)?;
        let after = self.next(a, node)?;
        if before == NULL {
            if self.first(a)? != node {
                return Err(LobError::Corruption("page list node not in list"));
            }
            self.set_first(a, after)?;
        } else {
            self.set_next(a, before, after)?;
        }
        if after == NULL {
            self.set_last(a, before)?;
        } else {
            self.set_prev(a, after, before)?;
        }
        self.set_prev(a, node, NULL)?;
        self.set_next(a, node, NULL)?;
        self.bump(a, false)
    }

    /// Node offsets, first to last.
    pub fn collect<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<Vec<u16>> {
        let expected = self.len(a)?;
        let mut out = Vec::with_capacity(expected as usize);
        let mut cur = self.first(a)?;
        while cur != NULL {
            if out.len() >= expected as usize {
                return Err(LobError::Corruption("page list longer than its length"));
            }
            out.push(cur);
            cur = self.next(a, cur)?;
        }
        Ok(out)
    }

    /// Walks the list and checks length, back links and end links.
    pub fn validate<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<u16> {
        let expected = self.len(a)?;
        let head = self.first(a)?;
        let tail = self.last(a)?;
        if (head == NULL) != (tail == NULL) || (head == NULL && expected != 0) {
            return Err(LobError::Corruption("page list ends inconsistent with length"));
        }
        let mut count = 0u16;
        let mut behind = NULL;
        let mut cur = head;
        while cur != NULL {
            count = count
                .checked_add(1)
                .filter(|c| *c <= expected)
                .ok_or(LobError::Corruption("page list longer than its length"))?;
            if self.prev(a, cur)? != behind {
                return Err(LobError::Corruption("page list back link mismatch"));
            }
            behind = cur;
            cur = self.next(a, cur)?;
        }
        if count != expected || behind != tail {
            return Err(LobError::Corruption("page list length mismatch"));
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lob::flst::tests::MemPages;

    #[test]
    fn list_operations_keep_invariants() {
        let mut mem = MemPages::new(1, 4096);
        let list = PageList::new(PageNo(0), 40);
        list.init(&mut mem).unwrap();
        list.push_back(&mut mem, 100).unwrap();
        list.push_front(&mut mem, 200).unwrap();
        list.insert_after(&mut mem, 200, 300).unwrap();
        list.insert_before(&mut mem, 100, 400).unwrap();
        assert_eq!(list.validate(&mut mem).unwrap(), 4);
        assert_eq!(list.collect(&mut mem).unwrap(), vec![200, 300, 400, 100]);

        list.remove(&mut mem, 200).unwrap();
        list.remove(&mut mem, 100).unwrap();
        assert_eq!(list.first(&mut mem).unwrap(), 300);
        assert_eq!(list.last(&mut mem).unwrap(), 400);
        assert_eq!(list.validate(&mut mem).unwrap(), 2);
        assert_eq!(list.prev(&mut mem, 200).unwrap(), NULL);
        assert_eq!(list.next(&mut mem, 200).unwrap(), NULL);
    }

    #[test]
    fn null_and_header_nodes_are_rejected() {
        let mut mem = MemPages::new(1, 4096);
        let list = PageList::new(PageNo(0), 40);
        list.init(&mut mem).unwrap();
        assert!(matches!(list.add_last(&mut mem, NULL), Err(LobError::Invalid(_))));
        assert!(matches!(list.add_last(&mut mem, 8), Err(LobError::Corruption(_))));
    }

    #[test]
    fn validate_catches_broken_back_link() {
        let mut mem = MemPages::new(1, 4096);
        let list = PageList::new(PageNo(0), 40);
        list.init(&mut mem).unwrap();
        list.push_back(&mut mem, 100).unwrap();
        list.push_back(&mut mem, 200).unwrap();
        mem.write_u16(PageNo(0), 200, 300).unwrap();
        assert!(list.validate(&mut mem).is_err());
    }
}
