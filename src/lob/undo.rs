#![forbid(unsafe_code)]
//! Undo information produced by in-place modifications.
//!
//! Copy-on-write changes need no undo payload: rollback restores the older
//! entry from the versions list. In-place changes overwrite bytes, so the old
//! bytes travel back to the caller as [`LobUndo`] records.

use tracing::debug;

use super::addr::FilAddr;
use super::data_page::DataPage;
use super::entry::{IndexEntry, LobFirstPage, Stamp};
use super::first_page::FirstPage;
use super::index_entry::LobEntry;
use super::update::write_chunk;
use crate::primitives::mtr::PageAccess;
use crate::types::{LobVersion, Result};

/// Kind of the owning record's undo entry that caused a rollback or purge.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UndoKind {
    /// The record, and with it the LOB, was inserted.
    Insert,
    /// An existing LOB was modified.
    UpdateExisting,
    /// The owning record was delete-marked.
    DeleteMarked,
}

/// Old state captured by an in-place modification.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LobUndo {
    /// Bytes overwritten inside the chunk of `entry`.
    InPlace {
        /// Entry whose chunk was overwritten.
        entry: FilAddr,
        /// Start of the overwritten range within the chunk.
        chunk_offset: u32,
        /// Bytes that were there before.
        old: Vec<u8>,
        /// Modifier stamp the entry carried before.
        old_modifier: Stamp,
    },
    /// The last chunk grew from `old_len` bytes.
    TailGrowth {
        /// Entry of the last chunk.
        entry: FilAddr,
        /// Chunk length before growing.
        old_len: u32,
        /// Total LOB length before growing.
        old_total: u32,
        /// Modifier stamp the entry carried before.
        old_modifier: Stamp,
    },
}

/// Result of a modification.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UpdateOutcome {
    /// LOB version after the modification.
    pub lob_version: LobVersion,
    /// Records to hand back to [`apply_undolog`] on rollback, oldest first.
    pub undo: Vec<LobUndo>,
}

/// Reverts in-place changes, newest record first.
pub(crate) fn apply_undolog<A: PageAccess + ?Sized>(
    a: &mut A,
    first: FirstPage,
    records: &[LobUndo],
) -> Result<()> {
    for record in records.iter().rev() {
        match record {
            LobUndo::InPlace {
                entry,
                chunk_offset,
                old,
                old_modifier,
            } => {
                let entry = LobEntry::at(*entry);
                write_chunk(a, first, entry, *chunk_offset as usize, old)?;
                entry.set_modifier(a, *old_modifier)?;
            }
            LobUndo::TailGrowth {
                entry,
                old_len,
                old_total,
                old_modifier,
            } => {
                let entry = LobEntry::at(*entry);
                let page = entry.location(a)?;
                entry.set_data_len(a, *old_len)?;
                if page != first.0 {
                    DataPage(page).set_data_len(a, *old_len)?;
                }
                entry.set_modifier(a, *old_modifier)?;
                first.set_data_len(a, *old_total)?;
            }
        }
    }
    debug!(first = first.0 .0, records = records.len(), "lob.undo.applied");
    Ok(())
}
