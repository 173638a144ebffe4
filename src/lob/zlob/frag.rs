#![forbid(unsafe_code)]
//! Choosing a fragment page for a small stream and releasing fragments.
//!
//! Candidate pages are filtered by the counters cached in their fragment
//! entries. A candidate's counters are compared with a recomputation before
//! the page is used; when they disagree the cache is refreshed and the
//! decision is taken again on the fresh numbers.

use tracing::{debug, trace};

use crate::lob::addr::FilAddr;
use crate::lob::entry::OpCtx;
use crate::lob::flst;
use crate::lob::index_page;
use crate::primitives::mtr::PageAlloc;
use crate::types::page::PageKind;
use crate::types::{FragId, LobError, PageNo, Result};

use super::first_page::ZFirstPage;
use super::frag_entry::FragEntry;
use super::frag_page::{FragPage, FRAG_HDR};

/// Places a fragment of `size` payload bytes on some fragment page of the
/// LOB, adding a page when none has room.
pub(crate) fn alloc_fragment<M: PageAlloc>(
    m: &mut M,
    ctx: OpCtx<'_>,
    first: ZFirstPage,
    size: usize,
) -> Result<(PageNo, FragId)> {
    let needed = size + FRAG_HDR;
    for fe in first.frag_entries(m)? {
        let cached = fe.stats(m)?;
        if (cached.big_free_len as usize) < needed {
            continue;
        }
        let page = FragPage(fe.page_no(m)?);
        let actual = page.stats(m)?;
        if actual != cached {
            fe.set_stats(m, actual)?;
            ctx.metrics.add_frag_cache_refresh();
            debug!(page = %page.0, ?cached, ?actual, "lob.zlob.frag_cache_refresh");
            if (actual.big_free_len as usize) < needed {
                continue;
            }
        }
        if let Some(id) = page.alloc(m, size)? {
            let stats = page.stats(m)?;
            fe.set_stats(m, stats)?;
            ctx.metrics.add_fragments_allocated(1);
            return Ok((page.0, id));
        }
    }

    let fe = alloc_frag_entry(m, ctx, first)?;
    let page = match FragPage::create(m, Some(first.0), fe.0) {
        Ok(page) => page,
        Err(err) => {
            flst::add_last(m, first.free_frag_list(), fe.0)?;
            return Err(err);
        }
    };
    ctx.metrics.add_pages_allocated(1);
    fe.set_page_no(m, page.0)?;
    flst::add_last(m, first.frag_list(), fe.0)?;
    let id = page
        .alloc(m, size)?
        .ok_or(LobError::Invalid("stream too large for a fragment page"))?;
    let stats = page.stats(m)?;
    fe.set_stats(m, stats)?;
    ctx.metrics.add_fragments_allocated(1);
    trace!(first = first.0 .0, page = page.0 .0, "lob.zlob.frag_page.new");
    Ok((page.0, id))
}

/// Frees fragment `id` on `page`. An emptied page is released and its
/// fragment entry recycled.
pub(crate) fn free_fragment<M: PageAlloc>(
    m: &mut M,
    ctx: OpCtx<'_>,
    first: ZFirstPage,
    page: PageNo,
    id: FragId,
) -> Result<()> {
    m.expect_kind(page, PageKind::ZlobFrag)?;
    let frag_page = FragPage(page);
    frag_page.free(m, id)?;
    ctx.metrics.add_fragments_freed(1);
    let fe = FragEntry(frag_page.owner(m)?);
    let stats = frag_page.stats(m)?;
    if stats.n_frags > 0 {
        return fe.set_stats(m, stats);
    }
    flst::remove(m, first.frag_list(), fe.0)?;
    fe.reset(m)?;
    flst::add_last(m, first.free_frag_list(), fe.0)?;
    m.free_page(page)?;
    ctx.metrics.add_pages_freed(1);
    trace!(first = first.0 .0, page = page.0, "lob.zlob.frag_page.freed");
    Ok(())
}

fn alloc_frag_entry<M: PageAlloc>(m: &mut M, ctx: OpCtx<'_>, first: ZFirstPage) -> Result<FragEntry> {
    if let Some(node) = flst::pop_first(m, first.free_frag_list())? {
        return Ok(FragEntry(node));
    }
    let head = first.first_frag_node_page(m)?;
    let page = index_page::create(m, Some(first.0), PageKind::ZlobFragEntry, head)?;
    first.set_first_frag_node_page(m, page)?;
    ctx.metrics.add_pages_allocated(1);
    let slots = index_page::slot_count(m.page_size(), FragEntry::SIZE);
    for i in 0..slots {
        let fe = FragEntry(index_page::slot_addr(page, i, FragEntry::SIZE)?);
        fe.reset(m)?;
        flst::add_last(m, first.free_frag_list(), fe.0)?;
    }
    let node: FilAddr = flst::pop_first(m, first.free_frag_list())?
        .ok_or(LobError::Corruption("fragment node page added no entries"))?;
    Ok(FragEntry(node))
}
