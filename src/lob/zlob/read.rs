#![forbid(unsafe_code)]
//! Reading a byte range of a compressed LOB.

use tracing::trace;

use crate::lob::entry::{live_entries, IndexEntry, LobFirstPage, OpCtx};
use crate::lob::version;
use crate::primitives::mtr::Mtr;
use crate::types::{LobVersion, Result, FRAG_ID_NULL};

use super::codec;
use super::first_page::ZFirstPage;
use super::index_entry::ZEntry;
use super::stream;

/// Reads up to `len` bytes at `offset`. Chunks needed whole are inflated
/// whole; partial chunks are inflated only up to the end of the range.
pub(crate) fn read(
    mtr: &mut Mtr<'_>,
    ctx: OpCtx<'_>,
    first: ZFirstPage,
    offset: u64,
    len: usize,
    bound: LobVersion,
) -> Result<Vec<u8>> {
    let available = u64::from(first.data_len(mtr)?).saturating_sub(offset);
    let mut out = Vec::with_capacity(available.min(len as u64) as usize);
    let end = offset.saturating_add(len as u64);
    let mut pos = 0u64;
    for entry in live_entries(mtr, first)? {
        if pos >= end {
            break;
        }
        let seen = version::visible(mtr, entry, bound)?;
        let chunk_len = seen.data_len(mtr)? as u64;
        let chunk_end = pos + chunk_len;
        if chunk_end > offset {
            let from = (offset.max(pos) - pos) as usize;
            let to = (end.min(chunk_end) - pos) as usize;
            let z = stream::read_stream(mtr, first, seen)?;
            if from == 0 && to == chunk_len as usize {
                out.extend_from_slice(&codec::decompress(&z, chunk_len as usize)?);
            } else {
                out.extend_from_slice(&codec::decompress_range(
                    &z,
                    from,
                    to - from,
                    ctx.options.inflate_scratch_bytes,
                )?);
            }
            release_storage(mtr, first, seen)?;
        }
        pos = chunk_end;
    }
    ctx.metrics.add_bytes_read(out.len() as u64);
    trace!(first = first.0 .0, offset, len, read = out.len(), bound, "lob.zlob.read");
    Ok(out)
}

/// Drops the shared latches taken on the entry's stream pages.
fn release_storage(mtr: &mut Mtr<'_>, first: ZFirstPage, entry: ZEntry) -> Result<()> {
    if entry.frag_id(mtr)? != FRAG_ID_NULL {
        let page = entry.location(mtr)?;
        mtr.release_page(page);
        return Ok(());
    }
    for page in first.stream_pages(mtr, entry)? {
        mtr.release_page(page);
    }
    Ok(())
}
