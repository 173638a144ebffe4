#![forbid(unsafe_code)]
//! Reclaiming history no transaction can see, and destroying whole LOBs.

use tracing::{debug, trace};

use super::entry::{live_entries, versions_of, IndexEntry, LobFirstPage, OpCtx, Stamp};
use super::flst;
use crate::primitives::mtr::{Mtr, PageAccess, PageAlloc};
use crate::types::Result;

/// Drops every older image modified by `stamp`, oldest first. Returns the
/// number of images removed.
pub(crate) fn purge_versions<F: LobFirstPage, M: PageAlloc>(
    m: &mut M,
    ctx: OpCtx<'_>,
    first: F,
    stamp: Stamp,
) -> Result<u32> {
    let mut purged = 0u32;
    for entry in live_entries(m, first)? {
        for old in versions_of(m, entry)?.into_iter().rev() {
            if old.modifier(m)? != stamp {
                continue;
            }
            flst::remove(m, entry.versions()?, old.addr())?;
            old.free_storage(m, first.page(), ctx)?;
            first.retire_entry(m, old)?;
            purged += 1;
            trace!(entry = ?old.addr(), "lob.purge.version");
        }
    }
    ctx.metrics.add_versions_purged(purged as u64);
    Ok(purged)
}

/// Frees every page of the LOB, the first page last.
///
/// The first page is reset to an empty LOB before anything is freed so a
/// restart between batches never leaves it pointing at freed pages. Pages
/// are freed in batches of `commit_frequency`, committing between batches.
pub(crate) fn destroy<F: LobFirstPage>(mtr: &mut Mtr<'_>, ctx: OpCtx<'_>, first: F) -> Result<u32> {
    let page = first.page();
    mtr.expect_kind(page, F::KIND)?;
    mtr.set_anchor(page);
    let owned = first.owned_pages(mtr)?;
    first.reset_lists(mtr)?;
    let batch = ctx.options.commit_frequency.max(1) as usize;
    for (i, p) in owned.iter().enumerate() {
        mtr.free_page(*p)?;
        if (i + 1) % batch == 0 {
            mtr.commit_and_restart()?;
        }
    }
    mtr.free_page(page)?;
    let freed = owned.len() as u32 + 1;
    ctx.metrics.add_pages_freed(freed as u64);
    debug!(first = %page, freed, "lob.destroy");
    Ok(freed)
}
