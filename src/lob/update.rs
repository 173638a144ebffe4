#![forbid(unsafe_code)]
//! Modifying an uncompressed LOB: diff lists, replace and append.
//!
//! Small diff lists are applied in place and return their old bytes as undo
//! records. Larger ones copy every touched chunk to a fresh data page and
//! push the previous entry onto the new entry's versions list, so readers
//! bound to the previous LOB version keep seeing the old bytes.

use tracing::{debug, trace};

use super::data_page::DataPage;
use super::entry::{live_entries, IndexEntry, LobFirstPage, OpCtx, Stamp};
use super::first_page::FirstPage;
use super::flst;
use super::index_entry::LobEntry;
use super::insert::{append_pages, link_data_page, new_data_page, stamp_new_entry, WriteScope};
use super::read::read_chunk;
use super::undo::{LobUndo, UpdateOutcome};
use super::version;
use crate::primitives::mtr::PageAccess;
use crate::types::{LobError, LobVersion, Result};

/// New bytes for the range starting at `offset`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LobDiff {
    /// First byte replaced.
    pub offset: u64,
    /// Replacement bytes.
    pub bytes: Vec<u8>,
}

impl LobDiff {
    /// Diff replacing `bytes.len()` bytes at `offset`.
    pub fn new(offset: u64, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            offset,
            bytes: bytes.into(),
        }
    }

    fn end(&self) -> u64 {
        self.offset + self.bytes.len() as u64
    }
}

/// How a diff list is applied.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum UpdateMode {
    /// In place when the diff total is at most the small-change threshold.
    Auto,
    /// Always copy-on-write.
    CopyOnWrite,
}

/// Overwrites bytes of the chunk `entry` stores.
pub(crate) fn write_chunk<A: PageAccess + ?Sized>(
    a: &mut A,
    first: FirstPage,
    entry: LobEntry,
    chunk_offset: usize,
    bytes: &[u8],
) -> Result<()> {
    let page = entry.location(a)?;
    if page == first.0 {
        first.write_data(a, chunk_offset, bytes)
    } else {
        DataPage(page).write(a, chunk_offset, bytes)
    }
}

/// Live entries with their starting offset in the LOB.
fn positioned<A: PageAccess + ?Sized>(a: &mut A, first: FirstPage) -> Result<Vec<(u64, LobEntry, u32)>> {
    let mut pos = 0u64;
    let mut out = Vec::new();
    for entry in live_entries(a, first)? {
        let len = entry.data_len(a)?;
        out.push((pos, entry, len));
        pos += len as u64;
    }
    Ok(out)
}

fn check_updatable<A: PageAccess + ?Sized>(a: &mut A, first: FirstPage) -> Result<()> {
    if !first.can_be_partially_updated(a)? {
        return Err(LobError::Invalid("lob is not partially updatable"));
    }
    Ok(())
}

/// Applies `diffs` under `stamp`.
pub(crate) fn update<M: WriteScope>(
    m: &mut M,
    ctx: OpCtx<'_>,
    first: FirstPage,
    stamp: Stamp,
    diffs: &[LobDiff],
    mode: UpdateMode,
) -> Result<UpdateOutcome> {
    check_updatable(m, first)?;
    let total = first.data_len(m)? as u64;
    if diffs.iter().any(|d| d.end() > total) {
        return Err(LobError::Invalid("diff extends past the end of the lob"));
    }
    let changed: usize = diffs.iter().map(|d| d.bytes.len()).sum();
    if changed == 0 {
        return Ok(UpdateOutcome {
            lob_version: first.lob_version(m)?,
            undo: Vec::new(),
        });
    }
    let outcome = if mode == UpdateMode::Auto && changed <= ctx.options.small_change_threshold {
        update_in_place(m, ctx, first, stamp, diffs)?
    } else {
        update_cow(m, ctx, first, stamp, diffs)?
    };
    first.set_last_modifier(m, stamp)?;
    ctx.metrics.add_bytes_written(changed as u64);
    Ok(outcome)
}

fn update_in_place<M: WriteScope>(
    m: &mut M,
    ctx: OpCtx<'_>,
    first: FirstPage,
    stamp: Stamp,
    diffs: &[LobDiff],
) -> Result<UpdateOutcome> {
    let chunks = positioned(m, first)?;
    let mut undo = Vec::new();
    for diff in diffs {
        for &(start, entry, len) in &chunks {
            let end = start + len as u64;
            if end <= diff.offset || start >= diff.end() {
                continue;
            }
            let from = diff.offset.max(start);
            let to = diff.end().min(end);
            let chunk_offset = (from - start) as usize;
            let src = &diff.bytes[(from - diff.offset) as usize..(to - diff.offset) as usize];
            let mut old = vec![0u8; src.len()];
            read_chunk(m, first, entry, chunk_offset, &mut old)?;
            let old_modifier = entry.modifier(m)?;
            write_chunk(m, first, entry, chunk_offset, src)?;
            entry.set_modifier(m, stamp)?;
            undo.push(LobUndo::InPlace {
                entry: entry.addr(),
                chunk_offset: chunk_offset as u32,
                old,
                old_modifier,
            });
        }
    }
    ctx.metrics.add_in_place_update();
    trace!(first = first.0 .0, records = undo.len(), "lob.update.in_place");
    Ok(UpdateOutcome {
        lob_version: first.lob_version(m)?,
        undo,
    })
}

fn update_cow<M: WriteScope>(
    m: &mut M,
    ctx: OpCtx<'_>,
    first: FirstPage,
    stamp: Stamp,
    diffs: &[LobDiff],
) -> Result<UpdateOutcome> {
    let version = first.lob_version(m)? + 1;
    let mut chunks = positioned(m, first)?;
    let mut copied = Vec::new();
    for diff in diffs {
        for (i, slot) in chunks.iter_mut().enumerate() {
            let (start, entry, len) = *slot;
            let end = start + len as u64;
            if end <= diff.offset || start >= diff.end() {
                continue;
            }
            let from = diff.offset.max(start);
            let to = diff.end().min(end);
            let chunk_offset = (from - start) as usize;
            let src = &diff.bytes[(from - diff.offset) as usize..(to - diff.offset) as usize];
            let target = if created_by(m, entry, stamp, version)? {
                entry
            } else {
                let fresh = copy_chunk(m, ctx, first, entry, len, src.len() == len as usize, stamp, version)?;
                copied.push(i);
                fresh
            };
            write_chunk(m, first, target, chunk_offset, src)?;
            slot.1 = target;
        }
    }
    for &i in &copied {
        if i > 0 {
            link_data_page(m, first, chunks[i - 1].1, Some(chunks[i].1))?;
        }
        link_data_page(m, first, chunks[i].1, chunks.get(i + 1).map(|c| c.1))?;
    }
    first.set_lob_version(m, version)?;
    ctx.metrics.add_cow_update();
    debug!(first = first.0 .0, version, copied = copied.len(), "lob.update.cow");
    Ok(UpdateOutcome {
        lob_version: version,
        undo: Vec::new(),
    })
}

fn created_by<A: PageAccess + ?Sized>(
    a: &mut A,
    entry: LobEntry,
    stamp: Stamp,
    version: LobVersion,
) -> Result<bool> {
    Ok(entry.creator(a)? == stamp && entry.lob_version(a)? == version)
}

/// Moves the chunk of `old` to a new data page and makes the new entry live
/// in its place. The old bytes are copied unless the caller overwrites the
/// whole chunk.
#[allow(clippy::too_many_arguments)]
fn copy_chunk<M: WriteScope>(
    m: &mut M,
    ctx: OpCtx<'_>,
    first: FirstPage,
    old: LobEntry,
    len: u32,
    full_overwrite: bool,
    stamp: Stamp,
    version: LobVersion,
) -> Result<LobEntry> {
    let hint = old.location(m)?;
    let fresh = first.alloc_entry(m, ctx)?;
    let page = new_data_page(m, first, fresh, hint, stamp.trx)?;
    ctx.metrics.add_pages_allocated(1);
    if !full_overwrite {
        let mut buf = vec![0u8; len as usize];
        read_chunk(m, first, old, 0, &mut buf)?;
        page.write(m, 0, &buf)?;
    }
    page.set_data_len(m, len)?;
    stamp_new_entry(m, fresh, stamp, version)?;
    fresh.set_location(m, page.0)?;
    fresh.set_data_len(m, len)?;
    version::supersede(m, first, old, fresh, stamp)?;
    m.page_allocated(first.0, ctx.options.commit_frequency)?;
    Ok(fresh)
}

/// Appends `bytes` to the end of the LOB.
pub(crate) fn append<M: WriteScope>(
    m: &mut M,
    ctx: OpCtx<'_>,
    first: FirstPage,
    stamp: Stamp,
    bytes: &[u8],
) -> Result<UpdateOutcome> {
    check_updatable(m, first)?;
    let old_total = first.data_len(m)?;
    let new_total = u32::try_from(bytes.len())
        .ok()
        .and_then(|len| old_total.checked_add(len))
        .ok_or(LobError::Invalid("lob larger than 4GiB"))?;
    let mut outcome = UpdateOutcome {
        lob_version: first.lob_version(m)?,
        undo: Vec::new(),
    };
    if bytes.is_empty() {
        return Ok(outcome);
    }

    let mut rest = bytes;
    let mut hint = first.0;
    let last = flst::last(m, first.index_list())?;
    if !last.is_null() {
        let entry = LobEntry::at(last);
        let page = entry.location(m)?;
        let len = entry.data_len(m)?;
        let capacity = if page == first.0 {
            FirstPage::data_capacity(m.page_size())
        } else {
            DataPage::capacity(m.page_size())
        };
        let take = capacity.saturating_sub(len as usize).min(rest.len());
        if take > 0 {
            let old_modifier = entry.modifier(m)?;
            write_chunk(m, first, entry, len as usize, &rest[..take])?;
            let grown = len + take as u32;
            entry.set_data_len(m, grown)?;
            if page != first.0 {
                DataPage(page).set_data_len(m, grown)?;
            }
            entry.set_modifier(m, stamp)?;
            outcome.undo.push(LobUndo::TailGrowth {
                entry: entry.addr(),
                old_len: len,
                old_total,
                old_modifier,
            });
            rest = &rest[take..];
        }
        hint = page;
    }

    if !rest.is_empty() {
        let version = outcome.lob_version + 1;
        append_pages(m, ctx, first, stamp, version, hint, rest)?;
        first.set_lob_version(m, version)?;
        outcome.lob_version = version;
    }
    first.set_data_len(m, new_total)?;
    first.set_last_modifier(m, stamp)?;
    ctx.metrics.add_bytes_written(bytes.len() as u64);
    trace!(first = first.0 .0, len = bytes.len(), total = new_total, "lob.append");
    Ok(outcome)
}
