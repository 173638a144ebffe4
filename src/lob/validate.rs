#![forbid(unsafe_code)]
//! Structural checks over a whole LOB, and the hook that runs them after
//! every operation in test builds.

use std::fmt;

use tracing::error;

use super::entry::{live_entries, versions_of, IndexEntry, LobFirstPage};
use super::first_page::FirstPage;
use super::flst;
use super::insert::live_data_pages;
use super::options::LobFormat;
use super::zlob::{FragEntry, FragPage, ZFirstPage};
use crate::primitives::mtr::{Mtr, PageAccess};
use crate::primitives::pager::PageStore;
use crate::types::page::PageKind;
use crate::types::{LobError, PageNo, Result};

/// Counts gathered while validating one LOB.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct LobReport {
    /// Representation found on the first page; `None` before it is read.
    pub format: Option<LobFormat>,
    /// Entries on the live index list.
    pub live_entries: u32,
    /// Entries on versions lists.
    pub versions: u32,
    /// Entries on the free list.
    pub free_entries: u32,
    /// Fragment pages, compressed LOBs only.
    pub frag_pages: u32,
    /// Fragments in use across all fragment pages.
    pub fragments: u32,
    /// Sum of live entry lengths.
    pub data_len: u64,
}

/// Called after each operation on a LOB.
pub trait ValidationHook: Send + Sync {
    /// Runs after `op` completed on the LOB whose first page is `first`.
    fn after_op(&self, store: &dyn PageStore, first: PageNo, op: &'static str);
}

/// Hook that validates every list of the LOB and panics on the first
/// inconsistency.
#[derive(Clone, Copy, Debug, Default)]
pub struct ListValidator;

impl ValidationHook for ListValidator {
    fn after_op(&self, store: &dyn PageStore, first: PageNo, op: &'static str) {
        if first.is_null() {
            return;
        }
        let mut mtr = Mtr::start(store);
        let outcome = validate_lob(&mut mtr, first);
        drop(mtr);
        if let Err(err) = outcome {
            error!(first = %first, op, error = %err, "lob.validate.failed");
            panic!("lob {first} failed validation after {op}: {err}");
        }
    }
}

impl fmt::Display for LobReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "live={} versions={} free={} frag_pages={} fragments={} len={}",
            self.live_entries,
            self.versions,
            self.free_entries,
            self.frag_pages,
            self.fragments,
            self.data_len
        )
    }
}

/// Validates the LOB whose first page is `first`.
pub fn validate_lob<A: PageAccess + ?Sized>(a: &mut A, first: PageNo) -> Result<LobReport> {
    match a.page_kind(first)? {
        PageKind::LobFirst => {
            let mut report = validate_common(a, FirstPage(first))?;
            report.format = Some(LobFormat::Uncompressed);
            validate_data_chain(a, FirstPage(first))?;
            Ok(report)
        }
        PageKind::ZlobFirst => {
            let zfirst = ZFirstPage(first);
            let mut report = validate_common(a, zfirst)?;
            report.format = Some(LobFormat::Compressed);
            validate_fragments(a, zfirst, &mut report)?;
            Ok(report)
        }
        _ => Err(LobError::Corruption("not a lob first page")),
    }
}

fn validate_common<F: LobFirstPage, A: PageAccess + ?Sized>(a: &mut A, first: F) -> Result<LobReport> {
    let mut report = LobReport {
        live_entries: flst::validate(a, first.index_list())?,
        free_entries: flst::validate(a, first.free_list())?,
        ..LobReport::default()
    };
    let mut last_version = 0;
    for entry in live_entries(a, first)? {
        report.versions += flst::validate(a, entry.versions()?)?;
        report.data_len += entry.data_len(a)? as u64;
        let stamp = entry.lob_version(a)?;
        last_version = last_version.max(stamp);
        let mut newer = stamp;
        for old in versions_of(a, entry)? {
            let v = old.lob_version(a)?;
            if v > newer {
                return Err(LobError::Corruption("versions list not newest first"));
            }
            newer = v;
        }
    }
    if report.data_len != first.data_len(a)? as u64 {
        return Err(LobError::Corruption("entry lengths disagree with lob length"));
    }
    if last_version > first.lob_version(a)? {
        return Err(LobError::Corruption("entry newer than its lob"));
    }
    Ok(report)
}

/// Live data pages must chain through their next-page links in index order.
fn validate_data_chain<A: PageAccess + ?Sized>(a: &mut A, first: FirstPage) -> Result<()> {
    let pages = live_data_pages(a, first)?;
    for (i, page) in pages.iter().enumerate() {
        let want = pages.get(i + 1).map_or(PageNo::NULL, |p| p.0);
        let next = page.next(a)?;
        if next != want {
            error!(page = page.0 .0, next = next.0, want = want.0, "lob.validate.broken_chain");
            return Err(LobError::Corruption("data page chain out of index order"));
        }
    }
    Ok(())
}

fn validate_fragments<A: PageAccess + ?Sized>(
    a: &mut A,
    first: ZFirstPage,
    report: &mut LobReport,
) -> Result<()> {
    flst::validate(a, first.free_frag_list())?;
    report.frag_pages = flst::validate(a, first.frag_list())?;
    for fe in first.frag_entries(a)? {
        let page = fe.page_no(a)?;
        a.expect_kind(page, PageKind::ZlobFrag)?;
        let frag_page = FragPage(page);
        if FragEntry(frag_page.owner(a)?) != fe {
            return Err(LobError::Corruption("fragment page owned by another entry"));
        }
        let stats = frag_page.check(a)?;
        if stats != fe.stats(a)? {
            return Err(LobError::Corruption("cached fragment counters are stale"));
        }
        report.fragments += stats.n_frags as u32;
    }
    Ok(())
}
