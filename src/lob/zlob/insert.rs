#![forbid(unsafe_code)]
//! Writing compressed chunks.

use tracing::trace;

use crate::lob::entry::{IndexEntry, LobFirstPage, OpCtx, Stamp};
use crate::lob::flst;
use crate::lob::insert::{stamp_new_entry, WriteScope};
use crate::types::{FragId, LobError, LobVersion, PageNo, Result, FRAG_ID_NULL};

use super::codec;
use super::first_page::ZFirstPage;
use super::frag;
use super::frag_page::FragPage;
use super::index_entry::ZEntry;
use super::stream;

/// Writes `bytes` as a new compressed LOB and returns its first page.
pub(crate) fn write_new<M: WriteScope>(
    m: &mut M,
    ctx: OpCtx<'_>,
    stamp: Stamp,
    bytes: &[u8],
) -> Result<ZFirstPage> {
    let total = u32::try_from(bytes.len()).map_err(|_| LobError::Invalid("lob larger than 4GiB"))?;
    let first = ZFirstPage::create(m, None, stamp)?;
    ctx.metrics.add_pages_allocated(1);
    m.page_allocated(first.0, ctx.options.commit_frequency)?;
    let mut chunks = 0usize;
    for (k, chunk) in bytes.chunks(ctx.options.zlib_chunk_size).enumerate() {
        let entry = new_chunk_entry(m, ctx, first, stamp, 1, chunk, k == 0)?;
        flst::add_last(m, first.index_list(), entry.addr())?;
        chunks += 1;
    }
    first.set_data_len(m, total)?;
    ctx.metrics.add_bytes_written(bytes.len() as u64);
    trace!(first = first.0 .0, len = total, chunks, "lob.zlob.insert");
    Ok(first)
}

/// Compresses `chunk`, stores the stream and returns an unlinked entry
/// describing it. Nothing stays allocated when this fails.
pub(crate) fn new_chunk_entry<M: WriteScope>(
    m: &mut M,
    ctx: OpCtx<'_>,
    first: ZFirstPage,
    stamp: Stamp,
    version: LobVersion,
    chunk: &[u8],
    allow_inline: bool,
) -> Result<ZEntry> {
    let z = codec::compress(ctx.options.zlib_level, chunk)?;
    let zlen = u32::try_from(z.len()).map_err(|_| LobError::Invalid("compressed chunk too large"))?;
    let entry = first.alloc_entry(m, ctx)?;
    stamp_new_entry(m, entry, stamp, version)?;
    let (page, frag_id) = match place(m, ctx, first, stamp, &z, allow_inline) {
        Ok(placed) => placed,
        Err(err) => {
            first.retire_entry(m, entry)?;
            return Err(err);
        }
    };
    entry.set_location(m, page, frag_id)?;
    entry.set_data_len(m, chunk.len() as u32)?;
    entry.set_zdata_len(m, zlen)?;
    Ok(entry)
}

/// Chooses where a stream lives: inline on the first page, in a fragment
/// when it is under a quarter of a fragment page, otherwise in data pages.
fn place<M: WriteScope>(
    m: &mut M,
    ctx: OpCtx<'_>,
    first: ZFirstPage,
    stamp: Stamp,
    z: &[u8],
    allow_inline: bool,
) -> Result<(PageNo, FragId)> {
    let page_size = m.page_size();
    let inline_cap = ZFirstPage::data_capacity(page_size);
    if allow_inline && z.len() <= inline_cap {
        first.write_inline(m, z)?;
        first.set_inline_stream(m, z.len() as u32, PageNo::NULL)?;
        return Ok((first.0, FRAG_ID_NULL));
    }
    if z.len() < FragPage::fragment_capacity(page_size) / 4 {
        let (page, id) = frag::alloc_fragment(m, ctx, first, z.len())?;
        FragPage(page).write(m, id, z)?;
        return Ok((page, id));
    }
    if allow_inline {
        first.write_inline(m, &z[..inline_cap])?;
        let rest = stream::write_chain(m, ctx, first, stamp.trx, first.0, &z[inline_cap..])?;
        first.set_inline_stream(m, inline_cap as u32, rest)?;
        return Ok((first.0, FRAG_ID_NULL));
    }
    let head = stream::write_chain(m, ctx, first, stamp.trx, first.0, z)?;
    Ok((head, FRAG_ID_NULL))
}
