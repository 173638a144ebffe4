//! Compressed streams spread over data pages.

use tracing::debug;

use crate::lob::entry::{IndexEntry, OpCtx};
use crate::lob::insert::WriteScope;
use crate::primitives::mtr::{PageAccess, PageAlloc};
use crate::types::{LobError, PageNo, Result, TrxId, FRAG_ID_NULL};

use super::data_page::{self, ZDataPage};
use super::first_page::ZFirstPage;
use super::frag_page::FragPage;
use super::index_entry::ZEntry;

/// Writes `bytes` over as many data pages as needed and returns the head.
/// On failure the pages written so far are freed again.
pub(crate) fn write_chain<M: WriteScope>(
    m: &mut M,
    ctx: OpCtx<'_>,
    first: ZFirstPage,
    creator: TrxId,
    hint: PageNo,
    bytes: &[u8],
) -> Result<PageNo> {
    let mut written = Vec::new();
    match fill_chain(m, ctx, first, creator, hint, bytes, &mut written) {
        Ok(head) => Ok(head),
        Err(err) => {
            for page in &written {
                m.free_page(*page)?;
            }
            ctx.metrics.add_pages_freed(written.len() as u64);
            debug!(first = first.0 .0, pages = written.len(), error = %err, "lob.zlob.stream.discarded");
            Err(err)
        }
    }
}

fn fill_chain<M: WriteScope>(
    m: &mut M,
    ctx: OpCtx<'_>,
    first: ZFirstPage,
    creator: TrxId,
    mut hint: PageNo,
    bytes: &[u8],
    written: &mut Vec<PageNo>,
) -> Result<PageNo> {
    let capacity = ZDataPage::capacity(m.page_size());
    let mut prev: Option<ZDataPage> = None;
    for part in bytes.chunks(capacity) {
        let page = ZDataPage::create(m, Some(hint), creator)?;
        written.push(page.0);
        ctx.metrics.add_pages_allocated(1);
        page.fill(m, part)?;
        if let Some(p) = prev {
            p.set_next(m, page.0)?;
        }
        prev = Some(page);
        hint = page.0;
        m.page_allocated(first.0, ctx.options.commit_frequency)?;
    }
    Ok(written.first().copied().unwrap_or(PageNo::NULL))
}

/// Collects the compressed stream of `entry`.
pub(crate) fn read_stream<A: PageAccess + ?Sized>(
    a: &mut A,
    first: ZFirstPage,
    entry: ZEntry,
) -> Result<Vec<u8>> {
    let zlen = entry.zdata_len(a)? as usize;
    let page = entry.location(a)?;
    let frag_id = entry.frag_id(a)?;
    let mut out = Vec::with_capacity(zlen);
    if page.is_null() {
        return Err(LobError::Corruption("index entry without storage"));
    }
    if frag_id != FRAG_ID_NULL {
        out.resize(zlen, 0);
        FragPage(page).read(a, frag_id, &mut out)?;
        return Ok(out);
    }
    let mut next = if page == first.0 {
        first.read_inline(a, &mut out)?;
        first.inline_next(a)?
    } else {
        page
    };
    while out.len() < zlen {
        if next.is_null() {
            return Err(LobError::Corruption("stream chain ends early"));
        }
        let dp = ZDataPage(next);
        dp.read_into_vec(a, &mut out)?;
        next = dp.next(a)?;
    }
    if out.len() != zlen {
        return Err(LobError::Corruption("stream chain longer than recorded"));
    }
    Ok(out)
}

/// Frees the chain starting at `head`.
pub(crate) fn free_chain<M: PageAlloc>(m: &mut M, ctx: OpCtx<'_>, head: PageNo) -> Result<()> {
    let pages = data_page::chain(m, head)?;
    for page in &pages {
        m.free_page(*page)?;
    }
    ctx.metrics.add_pages_freed(pages.len() as u64);
    Ok(())
}
