#![forbid(unsafe_code)]
//! Mini-transactions: scoped page latches plus the redo they produce.
//!
//! An [`Mtr`] latches pages on first access (shared for reads, exclusive for
//! writes), records every byte it writes as a [`RedoRecord`] and, on commit,
//! stamps LSN and CRC into the pages it modified, appends one redo batch and
//! releases its latches. Pages freed inside the scope are handed back to the
//! [`PageStore`] only after the latches are gone.

use std::fmt;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::RawRwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use crate::primitives::bytes::be;
use crate::primitives::pager::PageStore;
use crate::primitives::wal::RedoRecord;
use crate::types::page::{self, PageHeader, PageKind, PAGE_HDR_LEN};
use crate::types::{page_crc32, LobError, Lsn, PageNo, Result, SpaceId};

/// Byte-level page access shared by the logged path ([`Mtr`]) and the bulk
/// path, so on-page structures are written identically by both.
pub trait PageAccess {
    /// Page size in bytes.
    fn page_size(&self) -> usize;
    /// Tablespace the pages belong to.
    fn space_id(&self) -> SpaceId;
    /// Copies `dst.len()` bytes starting at `offset`.
    fn read_into(&mut self, page: PageNo, offset: usize, dst: &mut [u8]) -> Result<()>;
    /// Overwrites bytes starting at `offset`.
    fn write_bytes(&mut self, page: PageNo, offset: usize, src: &[u8]) -> Result<()>;

    /// Reads one byte.
    fn read_u8(&mut self, page: PageNo, offset: usize) -> Result<u8> {
        let mut raw = [0u8; 1];
        self.read_into(page, offset, &mut raw)?;
        Ok(raw[0])
    }

    /// Reads a big-endian `u16`.
    fn read_u16(&mut self, page: PageNo, offset: usize) -> Result<u16> {
        let mut raw = [0u8; 2];
        self.read_into(page, offset, &mut raw)?;
        Ok(u16::from_be_bytes(raw))
    }

    /// Reads a big-endian `u32`.
    fn read_u32(&mut self, page: PageNo, offset: usize) -> Result<u32> {
        let mut raw = [0u8; 4];
        self.read_into(page, offset, &mut raw)?;
        Ok(u32::from_be_bytes(raw))
    }

    /// Reads a big-endian 6-byte integer.
    fn read_u48(&mut self, page: PageNo, offset: usize) -> Result<u64> {
        let mut raw = [0u8; 6];
        self.read_into(page, offset, &mut raw)?;
        be::get_u48(&raw, 0)
    }

    /// Copies `len` bytes into a new vector.
    fn read_vec(&mut self, page: PageNo, offset: usize, len: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; len];
        self.read_into(page, offset, &mut out)?;
        Ok(out)
    }

    /// Writes one byte.
    fn write_u8(&mut self, page: PageNo, offset: usize, v: u8) -> Result<()> {
        self.write_bytes(page, offset, &[v])
    }

    /// Writes a big-endian `u16`.
    fn write_u16(&mut self, page: PageNo, offset: usize, v: u16) -> Result<()> {
        self.write_bytes(page, offset, &v.to_be_bytes())
    }

    /// Writes a big-endian `u32`.
    fn write_u32(&mut self, page: PageNo, offset: usize, v: u32) -> Result<()> {
        self.write_bytes(page, offset, &v.to_be_bytes())
    }

    /// Writes `v` as 6 big-endian bytes; fails if it does not fit.
    fn write_u48(&mut self, page: PageNo, offset: usize, v: u64) -> Result<()> {
        if v >> 48 != 0 {
            return Err(LobError::Invalid("value does not fit in 6 bytes"));
        }
        self.write_bytes(page, offset, &be::u48_bytes(v))
    }

    /// Sets `len` bytes to `byte`.
    fn fill(&mut self, page: PageNo, offset: usize, len: usize, byte: u8) -> Result<()> {
        self.write_bytes(page, offset, &vec![byte; len])
    }

    /// Reads and validates the page kind from the header.
    fn page_kind(&mut self, page: PageNo) -> Result<PageKind> {
        let mut hdr = [0u8; PAGE_HDR_LEN];
        self.read_into(page, 0, &mut hdr)?;
        page::peek_kind(&hdr)
    }

    /// Fails with [`LobError::Corruption`] unless `page` has kind `expected`.
    fn expect_kind(&mut self, page: PageNo, expected: PageKind) -> Result<()> {
        let kind = self.page_kind(page)?;
        if kind != expected {
            tracing::error!(page = page.0, ?kind, ?expected, "lob.page_kind_mismatch");
            return Err(LobError::Corruption("unexpected page kind"));
        }
        Ok(())
    }
}

/// Page allocation through the same scope that writes the pages.
pub trait PageAlloc: PageAccess {
    /// Allocates a page near `hint` and writes a fresh header of `kind`.
    fn alloc_page(&mut self, hint: Option<PageNo>, kind: PageKind) -> Result<PageNo>;
    /// Releases a page back to the page store.
    fn free_page(&mut self, page: PageNo) -> Result<()>;
    /// Number of pages allocated since the scope started.
    fn pages_allocated(&self) -> u32;
}

/// Latch mode held on a page.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LatchMode {
    /// Readers only.
    Shared,
    /// Held by the single writer.
    Exclusive,
}

enum Latch {
    Shared(ArcRwLockReadGuard<RawRwLock, Box<[u8]>>),
    Exclusive(ArcRwLockWriteGuard<RawRwLock, Box<[u8]>>),
}

impl Latch {
    fn mode(&self) -> LatchMode {
        match self {
            Latch::Shared(_) => LatchMode::Shared,
            Latch::Exclusive(_) => LatchMode::Exclusive,
        }
    }

    fn bytes(&self) -> &[u8] {
        match self {
            Latch::Shared(g) => &g[..],
            Latch::Exclusive(g) => &g[..],
        }
    }
}

/// Mini-transaction over a [`PageStore`].
pub struct Mtr<'s> {
    store: &'s dyn PageStore,
    page_size: usize,
    latches: FxHashMap<PageNo, Latch>,
    outer: FxHashMap<PageNo, LatchMode>,
    dirty: FxHashSet<PageNo>,
    redo: Vec<RedoRecord>,
    redo_bytes: usize,
    pending_free: SmallVec<[PageNo; 8]>,
    anchor: Option<PageNo>,
    allocated: u32,
    active: bool,
}

impl<'s> Mtr<'s> {
    /// Starts a mini-transaction.
    pub fn start(store: &'s dyn PageStore) -> Self {
        Self {
            store,
            page_size: store.page_size() as usize,
            latches: FxHashMap::default(),
            outer: FxHashMap::default(),
            dirty: FxHashSet::default(),
            redo: Vec::new(),
            redo_bytes: 0,
            pending_free: SmallVec::new(),
            anchor: None,
            allocated: 0,
            active: true,
        }
    }

    /// Starts a mini-transaction that must never latch a page in a mode
    /// conflicting with what `outer` currently holds.
    pub fn start_nested(store: &'s dyn PageStore, outer: &Mtr<'_>) -> Self {
        let mut mtr = Self::start(store);
        mtr.outer = outer
            .latches
            .iter()
            .map(|(page, latch)| (*page, latch.mode()))
            .collect();
        mtr
    }

    /// Page store the scope runs against.
    pub fn store(&self) -> &'s dyn PageStore {
        self.store
    }

    /// Page re-latched exclusively first after every restart.
    pub fn set_anchor(&mut self, page: PageNo) {
        self.anchor = Some(page);
    }

    /// Anchor page set by [`Mtr::set_anchor`].
    pub fn anchor(&self) -> Option<PageNo> {
        self.anchor
    }

    /// Latch currently held on `page`, if any.
    pub fn latch_mode(&self, page: PageNo) -> Option<LatchMode> {
        self.latches.get(&page).map(Latch::mode)
    }

    /// Bytes of redo buffered since the last commit.
    pub fn redo_bytes(&self) -> usize {
        self.redo_bytes
    }

    /// Returns `true` when both scopes hold a latch on the same page and at
    /// least one of them holds it exclusively.
    pub fn conflicts_with(&self, other: &Mtr<'_>) -> bool {
        self.latches.iter().any(|(page, latch)| {
            other.latches.get(page).is_some_and(|theirs| {
                latch.mode() == LatchMode::Exclusive || theirs.mode() == LatchMode::Exclusive
            })
        })
    }

    fn check_outer(&self, page: PageNo, want: LatchMode) -> Result<()> {
        if let Some(held) = self.outer.get(&page) {
            if *held == LatchMode::Exclusive || want == LatchMode::Exclusive {
                warn!(page = page.0, ?held, ?want, "mtr.outer_conflict");
                return Err(LobError::Invalid("nested mtr conflicts with outer latch"));
            }
        }
        Ok(())
    }

    fn check_not_freed(&self, page: PageNo) -> Result<()> {
        if self.pending_free.contains(&page) {
            return Err(LobError::Corruption("access to page freed in this mtr"));
        }
        Ok(())
    }

    /// Latches `page` shared unless already latched.
    pub fn s_latch(&mut self, page: PageNo) -> Result<()> {
        self.check_not_freed(page)?;
        if self.latches.contains_key(&page) {
            return Ok(());
        }
        self.check_outer(page, LatchMode::Shared)?;
        let frame = self.store.frame(page)?;
        self.latches.insert(page, Latch::Shared(frame.read_arc()));
        trace!(page = page.0, "mtr.s_latch");
        Ok(())
    }

    /// Latches `page` exclusively, upgrading a shared latch if needed.
    ///
    /// An upgrade is not atomic: the shared latch is released before the
    /// exclusive one is acquired, so another scope may write the page in
    /// between. Callers that read a page before writing it must already hold
    /// a latch that excludes other writers of that page. Every LOB
    /// modification x-latches the first page before touching any other page
    /// of the LOB, which gives that guarantee.
    pub fn x_latch(&mut self, page: PageNo) -> Result<()> {
        self.check_not_freed(page)?;
        if let Some(LatchMode::Exclusive) = self.latch_mode(page) {
            return Ok(());
        }
        self.check_outer(page, LatchMode::Exclusive)?;
        if self.latches.remove(&page).is_some() {
            trace!(page = page.0, "mtr.latch_upgrade");
        }
        let frame = self.store.frame(page)?;
        self.latches.insert(page, Latch::Exclusive(frame.write_arc()));
        trace!(page = page.0, "mtr.x_latch");
        Ok(())
    }

    /// Drops a shared latch early. Exclusive latches stay until commit.
    pub fn release_page(&mut self, page: PageNo) {
        if let Some(LatchMode::Shared) = self.latch_mode(page) {
            self.latches.remove(&page);
        }
    }

    fn latched_bytes(&mut self, page: PageNo) -> Result<&[u8]> {
        self.s_latch(page)?;
        self.latches
            .get(&page)
            .map(Latch::bytes)
            .ok_or(LobError::Corruption("latch vanished"))
    }

    fn latched_mut(&mut self, page: PageNo) -> Result<&mut [u8]> {
        self.x_latch(page)?;
        match self.latches.get_mut(&page) {
            Some(Latch::Exclusive(guard)) => Ok(&mut guard[..]),
            _ => Err(LobError::Corruption("latch vanished")),
        }
    }

    fn log(&mut self, record: RedoRecord) {
        self.redo_bytes += record.encoded_len();
        self.redo.push(record);
    }

    /// Commits buffered redo and releases every latch.
    pub fn commit(mut self) -> Result<Lsn> {
        self.commit_inner()
    }

    fn commit_inner(&mut self) -> Result<Lsn> {
        self.active = false;
        let redo = self.store.redo();
        let lsn = if self.redo.is_empty() {
            Lsn(redo.next_lsn().0.saturating_sub(1))
        } else {
            redo.append(&self.redo)
        };
        let space = self.store.space_id();
        for page in self.dirty.iter() {
            if self.pending_free.contains(page) {
                continue;
            }
            if let Some(Latch::Exclusive(guard)) = self.latches.get_mut(page) {
                stamp_page(&mut guard[..], *page, space, lsn)?;
            }
        }
        let latches = self.latches.len();
        self.latches.clear();
        let mut freed = 0usize;
        for page in self.pending_free.drain(..) {
            self.store.free_page(page)?;
            freed += 1;
        }
        trace!(
            lsn = lsn.0,
            records = self.redo.len(),
            bytes = self.redo_bytes,
            latches,
            freed,
            "mtr.commit"
        );
        self.redo.clear();
        self.redo_bytes = 0;
        self.dirty.clear();
        Ok(lsn)
    }

    /// Commits and immediately starts a new scope, re-latching the anchor
    /// page exclusively before anything else.
    pub fn commit_and_restart(&mut self) -> Result<Lsn> {
        let lsn = self.commit_inner()?;
        self.active = true;
        self.allocated = 0;
        if let Some(anchor) = self.anchor {
            self.x_latch(anchor)?;
        }
        debug!(lsn = lsn.0, anchor = ?self.anchor.map(|p| p.0), "mtr.restart");
        Ok(lsn)
    }

    /// Commits and restarts when buffered redo exceeds the log margin.
    pub fn flush_check(&mut self) -> Result<bool> {
        if self.redo_bytes < self.store.redo().options().log_margin_bytes {
            return Ok(false);
        }
        self.commit_and_restart()?;
        Ok(true)
    }
}

pub(crate) fn stamp_page(buf: &mut [u8], page: PageNo, space: SpaceId, lsn: Lsn) -> Result<()> {
    be::put_u64(buf, page::header::LSN.start, lsn.0)?;
    page::clear_crc32(buf)?;
    let crc = page_crc32(page.0, space.0, buf);
    be::put_u32(buf, page::header::CRC32.start, crc)
}

impl PageAccess for Mtr<'_> {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn space_id(&self) -> SpaceId {
        self.store.space_id()
    }

    fn read_into(&mut self, page: PageNo, offset: usize, dst: &mut [u8]) -> Result<()> {
        let bytes = self.latched_bytes(page)?;
        let end = offset
            .checked_add(dst.len())
            .filter(|end| *end <= bytes.len())
            .ok_or(LobError::Corruption("read past end of page"))?;
        dst.copy_from_slice(&bytes[offset..end]);
        Ok(())
    }

    fn write_bytes(&mut self, page: PageNo, offset: usize, src: &[u8]) -> Result<()> {
        if offset < PAGE_HDR_LEN {
            return Err(LobError::Invalid("write into page header"));
        }
        let bytes = self.latched_mut(page)?;
        let end = offset
            .checked_add(src.len())
            .filter(|end| *end <= bytes.len())
            .ok_or(LobError::Invalid("write past end of page"))?;
        bytes[offset..end].copy_from_slice(src);
        self.dirty.insert(page);
        self.log(RedoRecord::Write {
            page,
            offset: offset as u16,
            bytes: src.to_vec(),
        });
        Ok(())
    }
}

impl PageAlloc for Mtr<'_> {
    fn alloc_page(&mut self, hint: Option<PageNo>, kind: PageKind) -> Result<PageNo> {
        let page = self.store.alloc_page(hint)?;
        let header = PageHeader::new(page, kind, self.page_size as u32, self.store.space_id())?;
        let bytes = self.latched_mut(page)?;
        header.encode(bytes)?;
        self.dirty.insert(page);
        self.allocated += 1;
        self.log(RedoRecord::InitPage { page, kind });
        trace!(page = page.0, ?kind, "mtr.alloc_page");
        Ok(page)
    }

    fn free_page(&mut self, page: PageNo) -> Result<()> {
        if self.pending_free.contains(&page) {
            return Err(LobError::Corruption("page freed twice in one mtr"));
        }
        self.x_latch(page)?;
        self.pending_free.push(page);
        self.log(RedoRecord::FreePage { page });
        trace!(page = page.0, "mtr.free_page");
        Ok(())
    }

    fn pages_allocated(&self) -> u32 {
        self.allocated
    }
}

impl fmt::Debug for Mtr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mtr")
            .field("latches", &self.latches.len())
            .field("redo_records", &self.redo.len())
            .field("redo_bytes", &self.redo_bytes)
            .field("pending_free", &self.pending_free.len())
            .field("anchor", &self.anchor)
            .finish()
    }
}

impl Drop for Mtr<'_> {
    fn drop(&mut self) {
        if !self.active || (self.latches.is_empty() && self.redo.is_empty()) {
            return;
        }
        debug!(records = self.redo.len(), "mtr.implicit_commit");
        if let Err(err) = self.commit_inner() {
            warn!(error = %err, "mtr.implicit_commit_failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::pager::{Pager, PagerOptions};

    fn pager() -> Pager {
        Pager::new(PagerOptions::default().with_page_size(4096)).unwrap()
    }

    #[test]
    fn writes_are_logged_and_pages_stamped() {
        let pager = pager();
        let mut mtr = Mtr::start(&pager);
        let page = mtr.alloc_page(None, PageKind::LobData).unwrap();
        mtr.write_u32(page, 40, 0xABCD_0123).unwrap();
        mtr.write_u48(page, 44, 77).unwrap();
        assert_eq!(mtr.read_u32(page, 40).unwrap(), 0xABCD_0123);
        let lsn = mtr.commit().unwrap();
        pager.verify_page(page).unwrap();
        let image = pager.page_image(page).unwrap();
        assert_eq!(PageHeader::decode(&image).unwrap().lsn, lsn);
        let batches = pager.redo().batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].records().unwrap().len(), 3);
    }

    #[test]
    fn header_writes_are_rejected() {
        let pager = pager();
        let mut mtr = Mtr::start(&pager);
        let page = mtr.alloc_page(None, PageKind::LobData).unwrap();
        assert!(mtr.write_u8(page, 4, 1).is_err());
        assert!(mtr.write_u32(page, 4094, 1).is_err());
        mtr.commit().unwrap();
    }

    #[test]
    fn frees_apply_at_commit() {
        let pager = pager();
        let mut mtr = Mtr::start(&pager);
        let page = mtr.alloc_page(None, PageKind::LobData).unwrap();
        mtr.commit().unwrap();
        let mut mtr = Mtr::start(&pager);
        mtr.free_page(page).unwrap();
        assert!(pager.is_allocated(page));
        assert!(mtr.read_u8(page, 40).is_err());
        mtr.commit().unwrap();
        assert!(!pager.is_allocated(page));
    }

    #[test]
    fn shared_latches_do_not_conflict() {
        let pager = pager();
        let mut setup = Mtr::start(&pager);
        let page = setup.alloc_page(None, PageKind::LobData).unwrap();
        setup.commit().unwrap();
        let mut a = Mtr::start(&pager);
        let mut b = Mtr::start(&pager);
        a.read_u8(page, 40).unwrap();
        b.read_u8(page, 40).unwrap();
        assert!(!a.conflicts_with(&b));
        b.release_page(page);
        assert_eq!(b.latch_mode(page), None);
        a.x_latch(page).unwrap();
        b.commit().unwrap();
        let c = Mtr::start(&pager);
        assert!(!a.conflicts_with(&c));
        a.commit().unwrap();
    }

    #[test]
    fn upgrade_waits_for_other_readers() {
        let pager = pager();
        let mut setup = Mtr::start(&pager);
        let page = setup.alloc_page(None, PageKind::LobData).unwrap();
        setup.commit().unwrap();

        let mut reader = Mtr::start(&pager);
        reader.s_latch(page).unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        let shared = &pager;
        std::thread::scope(|s| {
            s.spawn(move || {
                let mut writer = Mtr::start(shared);
                assert_eq!(writer.read_u8(page, 40).unwrap(), 0);
                writer.write_u8(page, 40, 7).unwrap();
                assert_eq!(writer.latch_mode(page), Some(LatchMode::Exclusive));
                tx.send(()).unwrap();
                writer.commit().unwrap();
            });
            assert!(rx
                .recv_timeout(std::time::Duration::from_millis(100))
                .is_err());
            reader.commit().unwrap();
            rx.recv().unwrap();
        });
        let mut check = Mtr::start(&pager);
        assert_eq!(check.read_u8(page, 40).unwrap(), 7);
        check.commit().unwrap();
    }

    #[test]
    fn flush_check_restarts_and_relatches_anchor() {
        let pager = Pager::new(PagerOptions {
            page_size: 4096,
            redo: crate::primitives::wal::RedoOptions {
                log_margin_bytes: 64,
                capacity_bytes: 1 << 20,
            },
            ..PagerOptions::default()
        })
        .unwrap();
        let mut mtr = Mtr::start(&pager);
        let first = mtr.alloc_page(None, PageKind::LobFirst).unwrap();
        mtr.set_anchor(first);
        assert!(!mtr.flush_check().unwrap());
        mtr.write_bytes(first, 100, &[9u8; 80]).unwrap();
        assert!(mtr.flush_check().unwrap());
        assert_eq!(mtr.latch_mode(first), Some(LatchMode::Exclusive));
        assert_eq!(mtr.redo_bytes(), 0);
        mtr.commit().unwrap();
        assert_eq!(pager.redo().stats().batches_appended, 1);
    }

    #[test]
    fn nested_scope_rejects_outer_exclusive_page() {
        let pager = pager();
        let mut outer = Mtr::start(&pager);
        let page = outer.alloc_page(None, PageKind::LobFirst).unwrap();
        let mut inner = Mtr::start_nested(&pager, &outer);
        assert!(matches!(inner.s_latch(page), Err(LobError::Invalid(_))));
    }
}
