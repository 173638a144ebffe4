#![forbid(unsafe_code)]
//! Reading a byte range of an uncompressed LOB under a version bound.

use tracing::trace;

use super::data_page::DataPage;
use super::entry::{live_entries, IndexEntry, LobFirstPage, OpCtx};
use super::first_page::FirstPage;
use super::index_entry::LobEntry;
use super::version;
use crate::primitives::mtr::{Mtr, PageAccess};
use crate::types::{LobVersion, PageNo, Result};

/// Version bound a reader resolves every chunk against.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReadContext {
    /// Largest LOB version the reader may observe.
    pub lob_version: LobVersion,
}

impl ReadContext {
    /// Sees every committed change.
    pub const LATEST: ReadContext = ReadContext {
        lob_version: LobVersion::MAX,
    };

    /// Sees changes up to and including `lob_version`.
    pub fn at(lob_version: LobVersion) -> Self {
        Self { lob_version }
    }
}

impl Default for ReadContext {
    fn default() -> Self {
        Self::LATEST
    }
}

/// Copies `len` bytes at `chunk_offset` of the chunk `entry` stores.
pub(crate) fn read_chunk<A: PageAccess + ?Sized>(
    a: &mut A,
    first: FirstPage,
    entry: LobEntry,
    chunk_offset: usize,
    dst: &mut [u8],
) -> Result<()> {
    let page = entry.location(a)?;
    if page == first.0 {
        first.read_data(a, chunk_offset, dst)
    } else {
        DataPage(page).read(a, chunk_offset, dst)
    }
}

/// Reads up to `len` bytes starting at `offset`. Stops early at the end of
/// the chain.
pub(crate) fn read(
    mtr: &mut Mtr<'_>,
    ctx: OpCtx<'_>,
    first: FirstPage,
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
            let from = offset.max(pos);
            let to = end.min(chunk_end);
            let start = out.len();
            out.resize(start + (to - from) as usize, 0);
            read_chunk(mtr, first, seen, (from - pos) as usize, &mut out[start..])?;
            release_data_page(mtr, first, seen)?;
        }
        pos = chunk_end;
    }
    ctx.metrics.add_bytes_read(out.len() as u64);
    trace!(first = first.0 .0, offset, len, read = out.len(), bound, "lob.read");
    Ok(out)
}

fn release_data_page(mtr: &mut Mtr<'_>, first: FirstPage, entry: LobEntry) -> Result<()> {
    let page: PageNo = entry.location(mtr)?;
    if page != first.0 {
        mtr.release_page(page);
    }
    Ok(())
}
