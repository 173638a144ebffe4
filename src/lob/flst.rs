#![forbid(unsafe_code)]
//! Doubly linked lists whose nodes may live on different pages.
//!
//! A base node (16 bytes: length, first, last) anchors the list; each node
//! embeds a 12-byte `prev`/`next` pair. Nodes and bases are addressed with
//! [`FilAddr`] and every access goes through [`PageAccess`], so the same
//! code serves logged mini-transactions and the bulk page cache.

use tracing::error;

use super::addr::FilAddr;
use crate::primitives::mtr::PageAccess;
use crate::types::{LobError, Result};

/// Size of a base node.
pub const BASE_LEN: usize = 16;
/// Size of the link pair in each node.
pub const NODE_LEN: usize = 12;

const BASE_LEN_FIELD: usize = 0;
const BASE_FIRST: usize = 4;
const BASE_LAST: usize = 10;
const NODE_PREV: usize = 0;
const NODE_NEXT: usize = 6;

fn field(addr: FilAddr, off: usize) -> Result<FilAddr> {
    addr.at_offset(off)
}

/// Writes an empty base at `base`.
pub fn init<A: PageAccess + ?Sized>(a: &mut A, base: FilAddr) -> Result<()> {
    a.write_u32(base.page, base.offset() + BASE_LEN_FIELD, 0)?;
    FilAddr::NULL.write(a, field(base, BASE_FIRST)?)?;
    FilAddr::NULL.write(a, field(base, BASE_LAST)?)
}

/// Number of nodes on the list.
pub fn len<A: PageAccess + ?Sized>(a: &mut A, base: FilAddr) -> Result<u32> {
    a.read_u32(base.page, base.offset() + BASE_LEN_FIELD)
}

/// Head node, or [`FilAddr::NULL`].
pub fn first<A: PageAccess + ?Sized>(a: &mut A, base: FilAddr) -> Result<FilAddr> {
    FilAddr::read(a, field(base, BASE_FIRST)?)
}

/// Tail node, or [`FilAddr::NULL`].
pub fn last<A: PageAccess + ?Sized>(a: &mut A, base: FilAddr) -> Result<FilAddr> {
    FilAddr::read(a, field(base, BASE_LAST)?)
}

/// Node after `node`.
pub fn next<A: PageAccess + ?Sized>(a: &mut A, node: FilAddr) -> Result<FilAddr> {
    FilAddr::read(a, field(node, NODE_NEXT)?)
}

/// Node before `node`.
pub fn prev<A: PageAccess + ?Sized>(a: &mut A, node: FilAddr) -> Result<FilAddr> {
    FilAddr::read(a, field(node, NODE_PREV)?)
}

fn set_len<A: PageAccess + ?Sized>(a: &mut A, base: FilAddr, len: u32) -> Result<()> {
    a.write_u32(base.page, base.offset() + BASE_LEN_FIELD, len)
}

fn set_first<A: PageAccess + ?Sized>(a: &mut A, base: FilAddr, v: FilAddr) -> Result<()> {
    v.write(a, field(base, BASE_FIRST)?)
}

fn set_last<A: PageAccess + ?Sized>(a: &mut A, base: FilAddr, v: FilAddr) -> Result<()> {
    v.write(a, field(base, BASE_LAST)?)
}

fn set_next<A: PageAccess + ?Sized>(a: &mut A, node: FilAddr, v: FilAddr) -> Result<()> {
    v.write(a, field(node, NODE_NEXT)?)
}

fn set_prev<A: PageAccess + ?Sized>(a: &mut A, node: FilAddr, v: FilAddr) -> Result<()> {
    v.write(a, field(node, NODE_PREV)?)
}

fn bump_len<A: PageAccess + ?Sized>(a: &mut A, base: FilAddr, grow: bool) -> Result<()> {
    let n = len(a, base)?;
    let n = if grow {
        n.checked_add(1)
            .ok_or(LobError::Corruption("file list length overflow"))?
    } else {
        n.checked_sub(1)
            .ok_or(LobError::Corruption("file list length underflow"))?
    };
    set_len(a, base, n)
}

fn check_node(node: FilAddr) -> Result<()> {
    if node.is_null() {
        return Err(LobError::Invalid("null file list node"));
    }
    Ok(())
}

/// Links `node` at the head.
pub fn add_first<A: PageAccess + ?Sized>(a: &mut A, base: FilAddr, node: FilAddr) -> Result<()> {
    check_node(node)?;
    let old_first = first(a, base)?;
    set_prev(a, node, FilAddr::NULL)?;
    set_next(a, node, old_first)?;
    if old_first.is_null() {
        set_last(a, base, node)?;
    } else {
        set_prev(a, old_first, node)?;
    }
    set_first(a, base, node)?;
    bump_len(a, base, true)
}

/// Links `node` at the tail.
pub fn add_last<A: PageAccess + ?Sized>(a: &mut A, base: FilAddr, node: FilAddr) -> Result<()> {
    check_node(node)?;
    let old_last = last(a, base)?;
    set_next(a, node, FilAddr::NULL)?;
    set_prev(a, node, old_last)?;
    if old_last.is_null() {
        set_first(a, base, node)?;
    } else {
        set_next(a, old_last, node)?;
    }
    set_last(a, base, node)?;
    bump_len(a, base, true)
}

/// Inserts `node` immediately after `existing`.
pub fn insert_after<A: PageAccess + ?Sized>(
    a: &mut A,
    base: FilAddr,
    existing: FilAddr,
    node: FilAddr,
) -> Result<()> {
    check_node(existing)?;
    check_node(node)?;
    let after = next(a, existing)?;
    set_prev(a, node, existing)?;
    set_next(a, node, after)?;
    set_next(a, existing, node)?;
    if after.is_null() {
        set_last(a, base, node)?;
    } else {
        set_prev(a, after, node)?;
    }
    bump_len(a, base, true)
}

/// Inserts `node` immediately before `existing`.
pub fn insert_before<A: PageAccess + ?Sized>(
    a: &mut A,
    base: FilAddr,
    existing: FilAddr,
    node: FilAddr,
) -> Result<()> {
    check_node(existing)?;
    check_node(node)?;
    let before = prev(a, existing)?;
    set_next(a, node, existing)?;
    set_prev(a, node, before)?;
    set_prev(a, existing, node)?;
    if before.is_null() {
        set_first(a, base, node)?;
    } else {
        set_next(a, before, node)?;
    }
    bump_len(a, base, true)
}

/// Unlinks `node` and clears both of its links.
pub fn remove<A: PageAccess + ?Sized>(a: &mut A, base: FilAddr, node: FilAddr) -> Result<()> {
    check_node(node)?;
    let before = prev(a, node)?;
    let after = next(a, node)?;
    if before.is_null() {
        if first(a, base)? != node {
            error!(?node, ?base, "flst.remove_foreign_node");
            return Err(LobError::Corruption("file list node not in list"));
        }
        set_first(a, base, after)?;
    } else {
        set_next(a, before, after)?;
    }
    if after.is_null() {
        set_last(a, base, before)?;
    } else {
        set_prev(a, after, before)?;
    }
    set_prev(a, node, FilAddr::NULL)?;
    set_next(a, node, FilAddr::NULL)?;
    bump_len(a, base, false)
}

/// Removes and returns the first node, if any.
pub fn pop_first<A: PageAccess + ?Sized>(a: &mut A, base: FilAddr) -> Result<Option<FilAddr>> {
    let node = first(a, base)?;
    if node.is_null() {
        return Ok(None);
    }
    remove(a, base, node)?;
    Ok(Some(node))
}

/// Copies the base node at `from` over `to`, moving ownership of the chain.
/// `from` is reinitialised empty.
pub fn move_base<A: PageAccess + ?Sized>(a: &mut A, from: FilAddr, to: FilAddr) -> Result<()> {
    let mut raw = [0u8; BASE_LEN];
    a.read_into(from.page, from.offset(), &mut raw)?;
    a.write_bytes(to.page, to.offset(), &raw)?;
    init(a, from)
}

/// Collects every node address, first to last.
pub fn collect<A: PageAccess + ?Sized>(a: &mut A, base: FilAddr) -> Result<Vec<FilAddr>> {
    let expected = len(a, base)?;
    let mut out = Vec::with_capacity(expected as usize);
    let mut cur = first(a, base)?;
    while !cur.is_null() {
        if out.len() as u32 >= expected {
            return Err(LobError::Corruption("file list longer than its length"));
        }
        out.push(cur);
        cur = next(a, cur)?;
    }
    Ok(out)
}

/// Walks the list both ways and checks length and end links.
pub fn validate<A: PageAccess + ?Sized>(a: &mut A, base: FilAddr) -> Result<u32> {
    let expected = len(a, base)?;
    let head = first(a, base)?;
    let tail = last(a, base)?;
    if head.is_null() != tail.is_null() || (head.is_null() && expected != 0) {
        return Err(LobError::Corruption("file list ends inconsistent with length"));
    }
    if !head.is_null() && !prev(a, head)?.is_null() {
        return Err(LobError::Corruption("file list first node has a predecessor"));
    }
    if !tail.is_null() && !next(a, tail)?.is_null() {
        return Err(LobError::Corruption("file list last node has a successor"));
    }
    let mut count = 0u32;
    let mut cur = head;
    let mut behind = FilAddr::NULL;
    while !cur.is_null() {
        count += 1;
        if count > expected {
            return Err(LobError::Corruption("file list longer than its length"));
        }
        if prev(a, cur)? != behind {
            return Err(LobError::Corruption("file list back link mismatch"));
        }
        behind = cur;
        cur = next(a, cur)?;
    }
    if count != expected || behind != tail {
        return Err(LobError::Corruption("file list length mismatch"));
    }
    Ok(count)
}
