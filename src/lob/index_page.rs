//! Overflow pages holding fixed-size slots: index entries of either format
//! and compressed fragment entries. Pages of one kind form a singly linked
//! chain anchored on the first page.

use super::addr::FilAddr;
use crate::primitives::mtr::{PageAccess, PageAlloc};
use crate::types::page::PageKind;
use crate::types::{PageNo, Result};

/// Format version byte.
pub const VERSION: usize = 32;
/// Next page of the chain.
pub const NEXT: usize = 33;
/// First slot.
pub const SLOTS: usize = 37;

/// Version written by [`create`].
pub const SLOT_PAGE_FORMAT_VERSION: u8 = 1;

/// Number of `slot_size` slots that fit on one page.
pub fn slot_count(page_size: usize, slot_size: usize) -> usize {
    (page_size - SLOTS) / slot_size
}

/// Address of slot `index`.
pub fn slot_addr(page: PageNo, index: usize, slot_size: usize) -> Result<FilAddr> {
    FilAddr::new(page, SLOTS + index * slot_size)
}

/// Allocates a slot page of `kind` linked in front of `next`.
pub fn create<M: PageAlloc>(
    m: &mut M,
    hint: Option<PageNo>,
    kind: PageKind,
    next: PageNo,
) -> Result<PageNo> {
    let page = m.alloc_page(hint, kind)?;
    m.write_u8(page, VERSION, SLOT_PAGE_FORMAT_VERSION)?;
    m.write_u32(page, NEXT, next.0)?;
    Ok(page)
}

/// Next page of the chain, or `PageNo::NULL`.
pub fn next<A: PageAccess + ?Sized>(a: &mut A, page: PageNo) -> Result<PageNo> {
    Ok(PageNo(a.read_u32(page, NEXT)?))
}

/// Walks the chain starting at `head`, checking every page has `kind`.
pub fn chain<A: PageAccess + ?Sized>(a: &mut A, head: PageNo, kind: PageKind) -> Result<Vec<PageNo>> {
    let mut pages = Vec::new();
    let mut cur = head;
    while !cur.is_null() {
        a.expect_kind(cur, kind)?;
        pages.push(cur);
        cur = next(a, cur)?;
    }
    Ok(pages)
}
