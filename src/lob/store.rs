#![forbid(unsafe_code)]
//! [`LobStore`]: every LOB operation behind one handle.
//!
//! Each call runs in its own mini-transaction that latches the first page
//! before any other page of the LOB. Mutations flag the reference as being
//! modified for their duration and write the new length back into it.

use std::sync::Arc;

use tracing::{debug, warn};

use super::bulk::BulkLoader;
use super::entry::{live_entries, LobFirstPage, OpCtx, Stamp};
use super::first_page::FirstPage;
use super::lob_ref::LobRef;
use super::metrics::{LobMetrics, LobMetricsSnapshot};
use super::options::{LobFormat, LobOptions};
use super::read::ReadContext;
use super::undo::{LobUndo, UndoKind, UpdateOutcome};
use super::update::{LobDiff, UpdateMode};
use super::validate::{validate_lob, ListValidator, LobReport, ValidationHook};
use super::zlob::{self, ZFirstPage};
use super::{insert, purge, read, rollback, undo, update};
use crate::primitives::mtr::{Mtr, PageAccess};
use crate::primitives::pager::PageStore;
use crate::types::page::PageKind;
use crate::types::{LobError, LobVersion, PageNo, Result, TrxId, UndoNo};

/// Header fields and shape of one LOB.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LobInfo {
    /// Representation chosen at insert.
    pub format: LobFormat,
    /// Kind stamped on the first page.
    pub page_kind: PageKind,
    /// Bumped by every modification.
    pub lob_version: LobVersion,
    /// Stamp of the last modification.
    pub last_modifier: Stamp,
    /// Transaction that inserted the LOB.
    pub creator_trx: TrxId,
    /// Total value length.
    pub data_len: u32,
    /// Whether in-place small changes are still allowed.
    pub partially_updatable: bool,
    /// Live index entries.
    pub entries: u32,
    /// Pages owned by the LOB, first page included.
    pub pages: u32,
}

/// Handle for storing, reading and maintaining LOBs in one page store.
#[derive(Clone)]
pub struct LobStore {
    pages: Arc<dyn PageStore>,
    options: LobOptions,
    metrics: Arc<LobMetrics>,
    hook: Option<Arc<dyn ValidationHook>>,
}

fn format_at<A: PageAccess + ?Sized>(a: &mut A, page: PageNo) -> Result<LobFormat> {
    match a.page_kind(page)? {
        PageKind::LobFirst => Ok(LobFormat::Uncompressed),
        PageKind::ZlobFirst => Ok(LobFormat::Compressed),
        _ => Err(LobError::Corruption("reference does not point at a first page")),
    }
}

fn info_of<F: LobFirstPage, A: PageAccess + ?Sized>(a: &mut A, first: F) -> Result<LobInfo> {
    Ok(LobInfo {
        format: F::FORMAT,
        page_kind: F::KIND,
        lob_version: first.lob_version(a)?,
        last_modifier: first.last_modifier(a)?,
        creator_trx: first.creator_trx(a)?,
        data_len: first.data_len(a)?,
        partially_updatable: first.can_be_partially_updated(a)?,
        entries: live_entries(a, first)?.len() as u32,
        pages: first.owned_pages(a)?.len() as u32 + 1,
    })
}

impl LobStore {
    /// Opens a store over `pages`. A [`ListValidator`] is installed when
    /// `options.validate` is set.
    pub fn new(pages: Arc<dyn PageStore>, options: LobOptions) -> Result<Self> {
        options.validate_for_page_size(pages.page_size())?;
        let hook = options
            .validate
            .then(|| Arc::new(ListValidator) as Arc<dyn ValidationHook>);
        Ok(Self {
            pages,
            options,
            metrics: Arc::new(LobMetrics::default()),
            hook,
        })
    }

    /// Replaces the validation hook.
    pub fn with_validation_hook(mut self, hook: Option<Arc<dyn ValidationHook>>) -> Self {
        self.hook = hook;
        self
    }

    /// The page store LOBs live in.
    pub fn page_store(&self) -> &Arc<dyn PageStore> {
        &self.pages
    }

    /// Options applied to every operation.
    pub fn options(&self) -> &LobOptions {
        &self.options
    }

    /// Counters accumulated since the store was created.
    pub fn metrics(&self) -> LobMetricsSnapshot {
        self.metrics.snapshot()
    }

    fn ctx(&self) -> OpCtx<'_> {
        OpCtx {
            options: &self.options,
            metrics: &self.metrics,
        }
    }

    fn after(&self, first: PageNo, op: &'static str) {
        if let Some(hook) = &self.hook {
            hook.after_op(&*self.pages, first, op);
        }
    }

    fn check_space(&self, lob: &LobRef) -> Result<()> {
        if lob.space_id != self.pages.space_id() {
            return Err(LobError::Invalid("lob belongs to another tablespace"));
        }
        Ok(())
    }

    /// Whether maintenance may touch the LOB. Inherited or foreign
    /// references are skipped silently.
    fn owns(&self, lob: &LobRef, op: &'static str) -> Result<bool> {
        if lob.is_null() {
            debug!(op, "lob.maintenance.null_ref");
            return Ok(false);
        }
        self.check_space(lob)?;
        if !lob.is_owner() || lob.is_inherited() {
            debug!(op, first = %lob.page_no, flags = lob.flags, "lob.maintenance.not_owner");
            return Ok(false);
        }
        Ok(true)
    }

    fn start_mtr<'s>(&'s self, outer: Option<&Mtr<'_>>) -> Mtr<'s> {
        match outer {
            Some(outer) => Mtr::start_nested(&*self.pages, outer),
            None => Mtr::start(&*self.pages),
        }
    }

    /// Runs `op` on the LOB in one mini-transaction with the first page
    /// latched exclusively, then writes the new length into `lob`.
    fn modify<T>(
        &self,
        lob: &mut LobRef,
        name: &'static str,
        op: impl FnOnce(&mut Mtr<'_>, OpCtx<'_>, LobFormat, PageNo) -> Result<T>,
    ) -> Result<T> {
        if lob.is_null() || lob.is_partially_deleted() {
            return Err(LobError::Invalid("lob has been destroyed"));
        }
        self.check_space(lob)?;
        if !lob.is_owner() {
            return Err(LobError::Invalid("lob is not owned by this record"));
        }
        let first = lob.page_no;
        lob.set_being_modified(true);
        let outcome: Result<(T, u32)> = (|| {
            let mut mtr = Mtr::start(&*self.pages);
            mtr.x_latch(first)?;
            mtr.set_anchor(first);
            let format = format_at(&mut mtr, first)?;
            let value = op(&mut mtr, self.ctx(), format, first)?;
            let len = match format {
                LobFormat::Uncompressed => FirstPage(first).data_len(&mut mtr)?,
                LobFormat::Compressed => ZFirstPage(first).data_len(&mut mtr)?,
            };
            mtr.commit()?;
            Ok((value, len))
        })();
        lob.set_being_modified(false);
        let (value, len) = outcome?;
        lob.length = len;
        self.after(first, name);
        Ok(value)
    }

    /// Stores `bytes` as a new LOB in the configured format. When the write
    /// fails part way the pages written so far are released again.
    pub fn insert(&self, stamp: Stamp, bytes: &[u8]) -> Result<LobRef> {
        let ctx = self.ctx();
        let mut mtr = Mtr::start(&*self.pages);
        let written = match self.options.format {
            LobFormat::Uncompressed => insert::write_new(&mut mtr, ctx, stamp, bytes).map(|f| f.0),
            LobFormat::Compressed => zlob::insert::write_new(&mut mtr, ctx, stamp, bytes).map(|f| f.0),
        };
        let first = match written {
            Ok(first) => first,
            Err(err) => {
                let partial = mtr.anchor();
                mtr.commit()?;
                if let Some(first) = partial {
                    warn!(first = %first, error = %err, "lob.insert.partial_discarded");
                    let mut lob = LobRef::new(self.pages.space_id(), first, 0);
                    self.destroy(&mut lob)?;
                }
                return Err(err);
            }
        };
        mtr.commit()?;
        self.after(first, "insert");
        Ok(LobRef::new(self.pages.space_id(), first, bytes.len() as u32))
    }

    /// Reads the newest bytes in `offset..offset + len`.
    pub fn read(&self, lob: &LobRef, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.read_at(lob, ReadContext::LATEST, offset, len)
    }

    /// Reads `offset..offset + len` as seen by a reader bound to `at`. The
    /// result is shorter than `len` when the range runs past the end.
    pub fn read_at(&self, lob: &LobRef, at: ReadContext, offset: u64, len: usize) -> Result<Vec<u8>> {
        if lob.is_null() || lob.is_partially_deleted() || len == 0 {
            return Ok(Vec::new());
        }
        self.check_space(lob)?;
        let first = lob.page_no;
        let mut mtr = Mtr::start(&*self.pages);
        mtr.s_latch(first)?;
        let bytes = match format_at(&mut mtr, first)? {
            LobFormat::Uncompressed => {
                read::read(&mut mtr, self.ctx(), FirstPage(first), offset, len, at.lob_version)?
            }
            LobFormat::Compressed => zlob::read::read(
                &mut mtr,
                self.ctx(),
                ZFirstPage(first),
                offset,
                len,
                at.lob_version,
            )?,
        };
        mtr.commit()?;
        Ok(bytes)
    }

    /// Applies a diff list. Small uncompressed changes are made in place and
    /// return undo records; everything else is copy-on-write.
    pub fn update(&self, lob: &mut LobRef, stamp: Stamp, diffs: &[LobDiff]) -> Result<UpdateOutcome> {
        self.modify(lob, "update", |mtr, ctx, format, first| match format {
            LobFormat::Uncompressed => {
                update::update(mtr, ctx, FirstPage(first), stamp, diffs, UpdateMode::Auto)
            }
            LobFormat::Compressed => zlob::update::update(mtr, ctx, ZFirstPage(first), stamp, diffs),
        })
    }

    /// Overwrites `bytes.len()` bytes at `offset` by copy-on-write.
    pub fn replace(&self, lob: &mut LobRef, stamp: Stamp, offset: u64, bytes: &[u8]) -> Result<UpdateOutcome> {
        let diffs = [LobDiff::new(offset, bytes)];
        self.modify(lob, "replace", |mtr, ctx, format, first| match format {
            LobFormat::Uncompressed => update::update(
                mtr,
                ctx,
                FirstPage(first),
                stamp,
                &diffs,
                UpdateMode::CopyOnWrite,
            ),
            LobFormat::Compressed => zlob::update::update(mtr, ctx, ZFirstPage(first), stamp, &diffs),
        })
    }

    /// Appends `bytes` to the end of the LOB.
    pub fn append(&self, lob: &mut LobRef, stamp: Stamp, bytes: &[u8]) -> Result<UpdateOutcome> {
        self.modify(lob, "append", |mtr, ctx, format, first| match format {
            LobFormat::Uncompressed => update::append(mtr, ctx, FirstPage(first), stamp, bytes),
            LobFormat::Compressed => zlob::update::append(mtr, ctx, ZFirstPage(first), stamp, bytes),
        })
    }

    /// Reverts in-place changes described by `records`.
    pub fn apply_undolog(&self, lob: &mut LobRef, records: &[LobUndo]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.modify(lob, "apply_undolog", |mtr, _ctx, format, first| match format {
            LobFormat::Uncompressed => undo::apply_undolog(mtr, FirstPage(first), records),
            LobFormat::Compressed => Err(LobError::Invalid(
                "compressed lobs have no in-place undo records",
            )),
        })
    }

    /// Frees every page of the LOB. The reference length drops to 0 before
    /// anything is freed and the page number becomes null at the end.
    /// Destroying a null or foreign reference does nothing.
    pub fn destroy(&self, lob: &mut LobRef) -> Result<()> {
        self.destroy_in(lob, None, "destroy").map(|_| ())
    }

    fn destroy_in(&self, lob: &mut LobRef, outer: Option<&Mtr<'_>>, op: &'static str) -> Result<u32> {
        if !self.owns(lob, op)? {
            return Ok(0);
        }
        let first = lob.page_no;
        lob.length = 0;
        let mut mtr = self.start_mtr(outer);
        mtr.x_latch(first)?;
        let freed = match format_at(&mut mtr, first)? {
            LobFormat::Uncompressed => purge::destroy(&mut mtr, self.ctx(), FirstPage(first))?,
            LobFormat::Compressed => purge::destroy(&mut mtr, self.ctx(), ZFirstPage(first))?,
        };
        mtr.commit()?;
        lob.page_no = PageNo::NULL;
        Ok(freed)
    }

    /// Header fields and page counts of the LOB.
    pub fn get_info(&self, lob: &LobRef) -> Result<LobInfo> {
        if lob.is_null() {
            return Err(LobError::Invalid("lob has been destroyed"));
        }
        self.check_space(lob)?;
        let first = lob.page_no;
        let mut mtr = Mtr::start(&*self.pages);
        mtr.s_latch(first)?;
        let info = match format_at(&mut mtr, first)? {
            LobFormat::Uncompressed => info_of(&mut mtr, FirstPage(first))?,
            LobFormat::Compressed => info_of(&mut mtr, ZFirstPage(first))?,
        };
        mtr.commit()?;
        Ok(info)
    }

    /// Rolls back every change `trx` made at or after undo number
    /// `savepoint`. Undoing the insert itself destroys the LOB. When `outer`
    /// is given the rollback must not latch a page in a mode conflicting
    /// with it. Returns the number of entries undone.
    pub fn rollback(
        &self,
        lob: &mut LobRef,
        trx: TrxId,
        savepoint: UndoNo,
        kind: UndoKind,
        outer: Option<&Mtr<'_>>,
    ) -> Result<u32> {
        if kind == UndoKind::Insert {
            return self.destroy_in(lob, outer, "rollback");
        }
        if !self.owns(lob, "rollback")? {
            return Ok(0);
        }
        let first = lob.page_no;
        let mut mtr = self.start_mtr(outer);
        mtr.x_latch(first)?;
        mtr.set_anchor(first);
        let ctx = self.ctx();
        let (undone, len) = match format_at(&mut mtr, first)? {
            LobFormat::Uncompressed => {
                let f = FirstPage(first);
                let n = rollback::rollback_entries(&mut mtr, ctx, f, trx, savepoint)?;
                if n > 0 {
                    insert::relink_data_pages(&mut mtr, f)?;
                }
                (n, f.data_len(&mut mtr)?)
            }
            LobFormat::Compressed => {
                let f = ZFirstPage(first);
                let n = rollback::rollback_entries(&mut mtr, ctx, f, trx, savepoint)?;
                (n, f.data_len(&mut mtr)?)
            }
        };
        mtr.commit()?;
        lob.length = len;
        self.after(first, "rollback");
        Ok(undone)
    }

    /// Reclaims history no reader can see any more. For
    /// [`UndoKind::UpdateExisting`] the older images modified by `stamp` are
    /// dropped; for [`UndoKind::DeleteMarked`] the LOB is destroyed. Purging
    /// a destroyed reference does nothing. Returns the number of pages or
    /// images reclaimed.
    pub fn purge(&self, lob: &mut LobRef, stamp: Stamp, kind: UndoKind, outer: Option<&Mtr<'_>>) -> Result<u32> {
        if !self.owns(lob, "purge")? {
            return Ok(0);
        }
        match kind {
            UndoKind::Insert => {
                debug!(first = %lob.page_no, "lob.purge.insert_noop");
                Ok(0)
            }
            UndoKind::UpdateExisting => {
                let purged = self.purge_versions(lob, stamp, outer, false)?;
                self.after(lob.page_no, "purge");
                Ok(purged)
            }
            UndoKind::DeleteMarked => {
                let purged = self.purge_versions(lob, stamp, outer, true)?;
                Ok(purged + self.destroy_in(lob, outer, "purge")?)
            }
        }
    }

    /// With `updatable_only` set, LOBs that never allowed partial updates
    /// are left alone since they carry no history.
    fn purge_versions(
        &self,
        lob: &LobRef,
        stamp: Stamp,
        outer: Option<&Mtr<'_>>,
        updatable_only: bool,
    ) -> Result<u32> {
        let first = lob.page_no;
        let mut mtr = self.start_mtr(outer);
        mtr.x_latch(first)?;
        let ctx = self.ctx();
        let purged = match format_at(&mut mtr, first)? {
            LobFormat::Uncompressed => {
                let f = FirstPage(first);
                if updatable_only && !f.can_be_partially_updated(&mut mtr)? {
                    0
                } else {
                    purge::purge_versions(&mut mtr, ctx, f, stamp)?
                }
            }
            LobFormat::Compressed => {
                let f = ZFirstPage(first);
                if updatable_only && !f.can_be_partially_updated(&mut mtr)? {
                    0
                } else {
                    purge::purge_versions(&mut mtr, ctx, f, stamp)?
                }
            }
        };
        mtr.commit()?;
        debug!(first = %first, trx = stamp.trx.0, undo = stamp.undo, purged, "lob.purge");
        Ok(purged)
    }

    /// Permanently forbids partial updates of the LOB.
    pub fn mark_not_partially_updatable(&self, lob: &LobRef) -> Result<()> {
        let mut copy = *lob;
        self.modify(&mut copy, "mark_not_partially_updatable", |mtr, _ctx, format, first| {
            match format {
                LobFormat::Uncompressed => FirstPage(first).mark_not_partially_updatable(mtr),
                LobFormat::Compressed => ZFirstPage(first).mark_not_partially_updatable(mtr),
            }
        })
    }

    /// Walks every list of the LOB and checks its counters.
    pub fn validate(&self, lob: &LobRef) -> Result<LobReport> {
        if lob.is_null() {
            return Err(LobError::Invalid("lob has been destroyed"));
        }
        self.check_space(lob)?;
        let mut mtr = Mtr::start(&*self.pages);
        let report = validate_lob(&mut mtr, lob.page_no)?;
        mtr.commit()?;
        Ok(report)
    }

    /// A loader writing fresh uncompressed LOBs without redo.
    pub fn bulk_loader(&self) -> BulkLoader<'_> {
        BulkLoader::new(&*self.pages, &self.options, &self.metrics)
    }
}
