#![forbid(unsafe_code)]
//! Bulk construction of uncompressed LOBs.
//!
//! Sorted index builds write many fresh LOBs that no transaction has seen,
//! so the loader skips latches, redo and version bookkeeping. Pages live in
//! a [`BulkPageCache`] while a LOB is written and are copied to the page
//! store when it is finished. The page images match what the logged insert
//! path writes for the same value and stamp.

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use super::entry::{OpCtx, Stamp};
use super::insert::{self, WriteScope};
use super::lob_ref::LobRef;
use super::metrics::LobMetrics;
use super::options::LobOptions;
use crate::primitives::mtr::{stamp_page, PageAccess, PageAlloc};
use crate::primitives::pager::PageStore;
use crate::types::page::{PageHeader, PageKind, PAGE_HDR_LEN};
use crate::types::{LobError, Lsn, PageNo, Result, SpaceId};

/// Pages of the LOB under construction, addressed by page number.
pub struct BulkPageCache<'a> {
    store: &'a dyn PageStore,
    page_size: usize,
    pages: Vec<(PageNo, Box<[u8]>)>,
    slots: FxHashMap<PageNo, usize>,
    allocated: u32,
}

impl<'a> BulkPageCache<'a> {
    /// Empty cache in front of `store`.
    pub fn new(store: &'a dyn PageStore) -> Self {
        Self {
            store,
            page_size: store.page_size() as usize,
            pages: Vec::new(),
            slots: FxHashMap::default(),
            allocated: 0,
        }
    }

    /// Pages currently cached.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    fn buf(&self, page: PageNo) -> Result<&[u8]> {
        let slot = *self
            .slots
            .get(&page)
            .ok_or(LobError::Invalid("page not in bulk cache"))?;
        Ok(&self.pages[slot].1)
    }

    fn buf_mut(&mut self, page: PageNo) -> Result<&mut [u8]> {
        let slot = *self
            .slots
            .get(&page)
            .ok_or(LobError::Invalid("page not in bulk cache"))?;
        Ok(&mut self.pages[slot].1)
    }

    /// Copies every cached page to the page store, stamping its checksum.
    pub fn publish(&mut self) -> Result<usize> {
        let space = self.store.space_id();
        let published = self.pages.len();
        for (page, image) in self.pages.drain(..) {
            let frame = self.store.frame(page)?;
            let mut guard = frame.write();
            guard.copy_from_slice(&image);
            stamp_page(&mut guard[..], page, space, Lsn(0))?;
        }
        self.slots.clear();
        self.allocated = 0;
        Ok(published)
    }

    /// Returns every cached page to the page store unwritten.
    pub fn discard(&mut self) -> Result<()> {
        for (page, _) in self.pages.drain(..) {
            self.store.free_page(page)?;
        }
        self.slots.clear();
        self.allocated = 0;
        Ok(())
    }
}

impl PageAccess for BulkPageCache<'_> {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn space_id(&self) -> SpaceId {
        self.store.space_id()
    }

    fn read_into(&mut self, page: PageNo, offset: usize, dst: &mut [u8]) -> Result<()> {
        let bytes = self.buf(page)?;
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
        let bytes = self.buf_mut(page)?;
        let end = offset
            .checked_add(src.len())
            .filter(|end| *end <= bytes.len())
            .ok_or(LobError::Invalid("write past end of page"))?;
        bytes[offset..end].copy_from_slice(src);
        Ok(())
    }
}

impl PageAlloc for BulkPageCache<'_> {
    fn alloc_page(&mut self, hint: Option<PageNo>, kind: PageKind) -> Result<PageNo> {
        let page = self.store.alloc_page(hint)?;
        let mut image = vec![0u8; self.page_size].into_boxed_slice();
        PageHeader::new(page, kind, self.page_size as u32, self.store.space_id())?.encode(&mut image)?;
        self.slots.insert(page, self.pages.len());
        self.pages.push((page, image));
        self.allocated += 1;
        Ok(page)
    }

    fn free_page(&mut self, page: PageNo) -> Result<()> {
        let slot = self
            .slots
            .remove(&page)
            .ok_or(LobError::Invalid("page not in bulk cache"))?;
        self.pages.swap_remove(slot);
        if let Some((moved, _)) = self.pages.get(slot) {
            self.slots.insert(*moved, slot);
        }
        self.store.free_page(page)
    }

    fn pages_allocated(&self) -> u32 {
        self.allocated
    }
}

impl WriteScope for BulkPageCache<'_> {
    fn page_allocated(&mut self, _first: PageNo, _commit_frequency: u32) -> Result<()> {
        Ok(())
    }
}

/// Aggregate statistics captured by [`BulkLoader`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BulkLoaderStats {
    /// LOBs written and published.
    pub lobs: u64,
    /// Pages copied to the page store.
    pub pages_published: u64,
    /// Value bytes written.
    pub bytes: u64,
}

/// Writes fresh uncompressed LOBs without redo or versioning.
pub struct BulkLoader<'a> {
    cache: BulkPageCache<'a>,
    options: &'a LobOptions,
    metrics: &'a LobMetrics,
    stats: BulkLoaderStats,
}

impl<'a> BulkLoader<'a> {
    pub(crate) fn new(store: &'a dyn PageStore, options: &'a LobOptions, metrics: &'a LobMetrics) -> Self {
        Self {
            cache: BulkPageCache::new(store),
            options,
            metrics,
            stats: BulkLoaderStats::default(),
        }
    }

    /// Totals for the values loaded so far.
    pub fn stats(&self) -> BulkLoaderStats {
        self.stats
    }

    /// Writes `bytes` as a new LOB created by `stamp` and publishes it.
    pub fn insert(&mut self, stamp: Stamp, bytes: &[u8]) -> Result<LobRef> {
        let ctx = OpCtx {
            options: self.options,
            metrics: self.metrics,
        };
        let first = match insert::write_new(&mut self.cache, ctx, stamp, bytes) {
            Ok(first) => first,
            Err(err) => {
                warn!(error = %err, pages = self.cache.len(), "lob.bulk.insert_failed");
                self.cache.discard()?;
                return Err(err);
            }
        };
        self.finish_lob()?;
        self.stats.lobs += 1;
        self.stats.bytes += bytes.len() as u64;
        Ok(LobRef::new(self.cache.space_id(), first.0, bytes.len() as u32))
    }

    /// Publishes the pages of the LOB under construction.
    pub fn finish_lob(&mut self) -> Result<usize> {
        let published = self.cache.publish()?;
        self.stats.pages_published += published as u64;
        debug!(pages = published, "lob.bulk.finish");
        Ok(published)
    }
}

impl Drop for BulkLoader<'_> {
    fn drop(&mut self) {
        if self.cache.is_empty() {
            return;
        }
        warn!(pages = self.cache.len(), "lob.bulk.unfinished_lob_discarded");
        if let Err(err) = self.cache.discard() {
            warn!(error = %err, "lob.bulk.discard_failed");
        }
    }
}
