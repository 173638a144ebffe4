#![forbid(unsafe_code)]
//! Modifying a compressed LOB. Every touched chunk is inflated, patched,
//! deflated into a new stream and swapped in by copy-on-write.

use tracing::{debug, trace};

use crate::lob::entry::{live_entries, IndexEntry, LobFirstPage, OpCtx, Stamp};
use crate::lob::flst;
use crate::lob::insert::WriteScope;
use crate::lob::undo::UpdateOutcome;
use crate::lob::update::LobDiff;
use crate::lob::version;
use crate::primitives::mtr::PageAccess;
use crate::types::{LobError, Result};

use super::codec;
use super::first_page::ZFirstPage;
use super::index_entry::ZEntry;
use super::insert::new_chunk_entry;
use super::stream;

fn check_updatable<A: PageAccess + ?Sized>(a: &mut A, first: ZFirstPage) -> Result<()> {
    if !first.can_be_partially_updated(a)? {
        return Err(LobError::Invalid("lob is not partially updatable"));
    }
    Ok(())
}

fn inflate<A: PageAccess + ?Sized>(a: &mut A, first: ZFirstPage, entry: ZEntry) -> Result<Vec<u8>> {
    let z = stream::read_stream(a, first, entry)?;
    codec::decompress(&z, entry.data_len(a)? as usize)
}

/// Applies `diffs` under `stamp`, rewriting each touched chunk once.
pub(crate) fn update<M: WriteScope>(
    m: &mut M,
    ctx: OpCtx<'_>,
    first: ZFirstPage,
    stamp: Stamp,
    diffs: &[LobDiff],
) -> Result<UpdateOutcome> {
    check_updatable(m, first)?;
    let total = first.data_len(m)? as u64;
    if diffs
        .iter()
        .any(|d| d.offset + d.bytes.len() as u64 > total)
    {
        return Err(LobError::Invalid("diff extends past the end of the lob"));
    }
    let changed: usize = diffs.iter().map(|d| d.bytes.len()).sum();
    if changed == 0 {
        return Ok(UpdateOutcome {
            lob_version: first.lob_version(m)?,
            undo: Vec::new(),
        });
    }

    let version = first.lob_version(m)? + 1;
    let mut pos = 0u64;
    let mut rewritten = 0u32;
    for entry in live_entries(m, first)? {
        let len = entry.data_len(m)? as u64;
        let (start, end) = (pos, pos + len);
        pos = end;
        let touching: Vec<&LobDiff> = diffs
            .iter()
            .filter(|d| !d.bytes.is_empty() && d.offset < end && d.offset + d.bytes.len() as u64 > start)
            .collect();
        if touching.is_empty() {
            continue;
        }
        let mut plain = inflate(m, first, entry)?;
        for d in touching {
            let from = d.offset.max(start);
            let to = (d.offset + d.bytes.len() as u64).min(end);
            plain[(from - start) as usize..(to - start) as usize]
                .copy_from_slice(&d.bytes[(from - d.offset) as usize..(to - d.offset) as usize]);
        }
        let fresh = new_chunk_entry(m, ctx, first, stamp, version, &plain, false)?;
        version::supersede(m, first, entry, fresh, stamp)?;
        rewritten += 1;
    }
    first.set_lob_version(m, version)?;
    first.set_last_modifier(m, stamp)?;
    ctx.metrics.add_cow_update();
    ctx.metrics.add_bytes_written(changed as u64);
    debug!(first = first.0 .0, version, rewritten, "lob.zlob.update");
    Ok(UpdateOutcome {
        lob_version: version,
        undo: Vec::new(),
    })
}

/// Appends `bytes`, topping up the last chunk before adding new ones.
pub(crate) fn append<M: WriteScope>(
    m: &mut M,
    ctx: OpCtx<'_>,
    first: ZFirstPage,
    stamp: Stamp,
    bytes: &[u8],
) -> Result<UpdateOutcome> {
    check_updatable(m, first)?;
    let old_total = first.data_len(m)?;
    let new_total = u32::try_from(bytes.len())
        .ok()
        .and_then(|len| old_total.checked_add(len))
        .ok_or(LobError::Invalid("lob larger than 4GiB"))?;
    if bytes.is_empty() {
        return Ok(UpdateOutcome {
            lob_version: first.lob_version(m)?,
            undo: Vec::new(),
        });
    }

    let version = first.lob_version(m)? + 1;
    let chunk_size = ctx.options.zlib_chunk_size;
    let mut rest = bytes;
    let last = flst::last(m, first.index_list())?;
    let empty = last.is_null();
    if !empty {
        let entry = ZEntry::at(last);
        let len = entry.data_len(m)? as usize;
        if len < chunk_size {
            let take = (chunk_size - len).min(rest.len());
            let mut plain = inflate(m, first, entry)?;
            plain.extend_from_slice(&rest[..take]);
            let fresh = new_chunk_entry(m, ctx, first, stamp, version, &plain, false)?;
            version::supersede(m, first, entry, fresh, stamp)?;
            rest = &rest[take..];
        }
    }
    for (k, chunk) in rest.chunks(chunk_size).enumerate() {
        let entry = new_chunk_entry(m, ctx, first, stamp, version, chunk, empty && k == 0)?;
        flst::add_last(m, first.index_list(), entry.addr())?;
    }
    first.set_lob_version(m, version)?;
    first.set_data_len(m, new_total)?;
    first.set_last_modifier(m, stamp)?;
    ctx.metrics.add_bytes_written(bytes.len() as u64);
    trace!(first = first.0 .0, len = bytes.len(), total = new_total, "lob.zlob.append");
    Ok(UpdateOutcome {
        lob_version: version,
        undo: Vec::new(),
    })
}
