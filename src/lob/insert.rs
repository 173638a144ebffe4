#![forbid(unsafe_code)]
//! Writing a fresh uncompressed LOB.
//!
//! The writer is generic over [`WriteScope`], which is implemented by the
//! logged [`Mtr`] and by the bulk page cache, so both produce the same page
//! images.

use tracing::trace;

use super::data_page::DataPage;
use super::entry::{live_entries, IndexEntry, LobFirstPage, OpCtx, Stamp};
use super::first_page::FirstPage;
use super::flst;
use super::index_entry::LobEntry;
use crate::primitives::mtr::{Mtr, PageAccess, PageAlloc};
use crate::types::{LobError, LobVersion, PageNo, Result, TrxId};

/// A page-allocating scope that may need to checkpoint during long writes.
pub trait WriteScope: PageAlloc {
    /// Called after each page allocated for the LOB whose first page is
    /// `first`.
    fn page_allocated(&mut self, first: PageNo, commit_frequency: u32) -> Result<()>;
}

impl WriteScope for Mtr<'_> {
    /// Restarts the scope every `commit_frequency` pages, and earlier when the
    /// buffered redo reaches the log margin.
    fn page_allocated(&mut self, first: PageNo, commit_frequency: u32) -> Result<()> {
        if self.anchor().is_none() {
            self.set_anchor(first);
        }
        if self.pages_allocated() >= commit_frequency {
            self.commit_and_restart()?;
        } else {
            self.flush_check()?;
        }
        Ok(())
    }
}

/// Writes `bytes` as a new LOB and returns its first page.
pub(crate) fn write_new<M: WriteScope>(
    m: &mut M,
    ctx: OpCtx<'_>,
    stamp: Stamp,
    bytes: &[u8],
) -> Result<FirstPage> {
    let total = u32::try_from(bytes.len()).map_err(|_| LobError::Invalid("lob larger than 4GiB"))?;
    let first = FirstPage::create(m, None, stamp)?;
    ctx.metrics.add_pages_allocated(1);
    m.page_allocated(first.0, ctx.options.commit_frequency)?;

    let inline = bytes.len().min(FirstPage::data_capacity(m.page_size()));
    first.write_data(m, 0, &bytes[..inline])?;
    let entry = first.alloc_entry(m, ctx)?;
    stamp_new_entry(m, entry, stamp, 1)?;
    entry.set_location(m, first.0)?;
    entry.set_data_len(m, inline as u32)?;
    flst::add_last(m, first.index_list(), entry.addr())?;

    let pages = append_pages(m, ctx, first, stamp, 1, first.0, &bytes[inline..])?;
    first.set_data_len(m, total)?;
    ctx.metrics.add_bytes_written(bytes.len() as u64);
    trace!(
        first = first.0 .0,
        len = total,
        data_pages = pages,
        "lob.insert"
    );
    Ok(first)
}

/// Marks a freshly allocated entry as created by `stamp` at `version`.
pub(crate) fn stamp_new_entry<E: IndexEntry, A: PageAccess + ?Sized>(
    a: &mut A,
    entry: E,
    stamp: Stamp,
    version: LobVersion,
) -> Result<()> {
    entry.set_creator(a, stamp)?;
    entry.set_modifier(a, Stamp::NONE)?;
    entry.set_lob_version(a, version)
}

/// Stores `bytes` in new data pages appended to the live index list, each
/// entry stamped with `version`. `hint` is the page holding the current last
/// chunk; when it is a data page it is linked to the first new page. Returns
/// the number of pages written.
pub(crate) fn append_pages<M: WriteScope>(
    m: &mut M,
    ctx: OpCtx<'_>,
    first: FirstPage,
    stamp: Stamp,
    version: LobVersion,
    mut hint: PageNo,
    bytes: &[u8],
) -> Result<u32> {
    let capacity = DataPage::capacity(m.page_size());
    let mut pages = 0u32;
    for chunk in bytes.chunks(capacity) {
        let entry = first.alloc_entry(m, ctx)?;
        let page = new_data_page(m, first, entry, hint, stamp.trx)?;
        ctx.metrics.add_pages_allocated(1);
        if hint != first.0 {
            DataPage(hint).set_next(m, page.0)?;
        }
        page.write(m, 0, chunk)?;
        page.set_data_len(m, chunk.len() as u32)?;
        stamp_new_entry(m, entry, stamp, version)?;
        entry.set_location(m, page.0)?;
        entry.set_data_len(m, chunk.len() as u32)?;
        flst::add_last(m, first.index_list(), entry.addr())?;
        hint = page.0;
        pages += 1;
        m.page_allocated(first.0, ctx.options.commit_frequency)?;
    }
    Ok(pages)
}

/// Allocates a data page for the unlinked `entry`, handing the entry back to
/// the free list when the page store is full.
pub(crate) fn new_data_page<M: PageAlloc>(
    m: &mut M,
    first: FirstPage,
    entry: LobEntry,
    hint: PageNo,
    creator: TrxId,
) -> Result<DataPage> {
    match DataPage::create(m, Some(hint), creator) {
        Ok(page) => Ok(page),
        Err(err) => {
            first.retire_entry(m, entry)?;
            Err(err)
        }
    }
}

/// Points the data page of `from` at the data page of `to`, or ends the
/// chain there when `to` is `None`.
pub(crate) fn link_data_page<A: PageAccess + ?Sized>(
    a: &mut A,
    first: FirstPage,
    from: LobEntry,
    to: Option<LobEntry>,
) -> Result<()> {
    let page = from.location(a)?;
    if page == first.0 || page.is_null() {
        return Ok(());
    }
    let next = match to {
        Some(entry) => entry.location(a)?,
        None => PageNo::NULL,
    };
    DataPage(page).set_next(a, next)
}

/// Rewrites the next-page links so the live data pages chain in index
/// order. Links that are already right are not touched. Returns the number
/// of links rewritten.
pub(crate) fn relink_data_pages<A: PageAccess + ?Sized>(a: &mut A, first: FirstPage) -> Result<u32> {
    let pages = live_data_pages(a, first)?;
    let mut fixed = 0u32;
    for (i, page) in pages.iter().enumerate() {
        let next = pages.get(i + 1).map_or(PageNo::NULL, |p| p.0);
        if page.next(a)? != next {
            page.set_next(a, next)?;
            fixed += 1;
        }
    }
    if fixed > 0 {
        trace!(first = first.0 .0, fixed, "lob.relink");
    }
    Ok(fixed)
}

/// Data pages of the live entries in index order.
pub(crate) fn live_data_pages<A: PageAccess + ?Sized>(a: &mut A, first: FirstPage) -> Result<Vec<DataPage>> {
    let mut pages = Vec::new();
    for entry in live_entries(a, first)? {
        let page = entry.location(a)?;
        if page != first.0 && !page.is_null() {
            pages.push(DataPage(page));
        }
    }
    Ok(pages)
}
