#![forbid(unsafe_code)]
//! Rolling a LOB back to a transaction savepoint.

use tracing::debug;

use super::entry::{live_data_len, live_entries, IndexEntry, LobFirstPage, OpCtx};
use super::version;
use crate::primitives::mtr::PageAlloc;
use crate::types::{LobError, Result, TrxId, UndoNo};

/// Undoes every live entry created by `trx` at or after `savepoint`.
///
/// Each such entry is replaced by the newest image in its versions list, or
/// unlinked when it has none, then its storage is freed and the slot
/// returned to the free list. The restored image is examined again, so
/// several changes by `trx` to the same chunk unwind in one call. Returns the
/// number of entries undone; a second call with the same arguments finds
/// nothing to do.
pub(crate) fn rollback_entries<F: LobFirstPage, M: PageAlloc>(
    m: &mut M,
    ctx: OpCtx<'_>,
    first: F,
    trx: TrxId,
    savepoint: UndoNo,
) -> Result<u32> {
    let mut undone = 0u32;
    for entry in live_entries(m, first)? {
        let mut current = entry;
        loop {
            let creator = current.creator(m)?;
            if creator.trx != trx || creator.undo < savepoint {
                break;
            }
            let restored = version::restore_previous(m, first, current)?;
            current.free_storage(m, first.page(), ctx)?;
            first.retire_entry(m, current)?;
            undone += 1;
            match restored {
                Some(older) => current = older,
                None => break,
            }
        }
    }
    if undone > 0 {
        let len = u32::try_from(live_data_len(m, first)?)
            .map_err(|_| LobError::Corruption("live entries exceed lob length"))?;
        first.set_data_len(m, len)?;
        ctx.metrics.add_entries_rolled_back(undone as u64);
    }
    debug!(
        first = %first.page(),
        trx = trx.0,
        savepoint,
        undone,
        "lob.rollback"
    );
    Ok(undone)
}
