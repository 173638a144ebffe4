use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use super::frame::{Frame, FrameBuf, FrameState};
use super::freelist::FreeCache;
use crate::primitives::wal::{RedoLog, RedoOptions};
use crate::types::page::{self, PageHeader};
use crate::types::{page_crc32, LobError, PageNo, Result, SpaceId, FIL_NULL};

/// Configuration for the in-memory [`Pager`].
#[derive(Clone, Debug)]
pub struct PagerOptions {
    /// Size of each page in bytes.
    pub page_size: u32,
    /// Tablespace identifier stamped into page headers and LOB references.
    pub space_id: SpaceId,
    /// Upper bound on pages ever handed out; `None` means unbounded.
    pub max_pages: Option<u32>,
    /// Redo log sizing.
    pub redo: RedoOptions,
}

impl Default for PagerOptions {
    fn default() -> Self {
        Self {
            page_size: page::DEFAULT_PAGE_SIZE,
            space_id: SpaceId(0),
            max_pages: None,
            redo: RedoOptions::default(),
        }
    }
}

impl PagerOptions {
    /// Sets the page size in bytes.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Caps the number of pages the store will hand out.
    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    /// Sets the tablespace identifier.
    pub fn with_space_id(mut self, space_id: SpaceId) -> Self {
        self.space_id = space_id;
        self
    }

    /// Sets the buffered redo size at which long writes restart their
    /// mini-transaction.
    pub fn with_log_margin(mut self, bytes: usize) -> Self {
        self.redo.log_margin_bytes = bytes;
        self
    }
}

/// Allocation counters reported by a [`PageStore`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PagerStats {
    /// Pages handed out by `alloc_page`, including reuse.
    pub pages_allocated: u64,
    /// Pages returned through `free_page`.
    pub pages_freed: u64,
    /// Pages currently allocated.
    pub live_pages: u64,
    /// One past the highest page number ever allocated.
    pub high_water: u32,
}

/// Page-cache collaborator: resolves page numbers to shared byte buffers and
/// owns page allocation.
pub trait PageStore: Send + Sync + 'static {
    /// Returns the page size in bytes.
    fn page_size(&self) -> u32;
    /// Returns the tablespace this store serves.
    fn space_id(&self) -> SpaceId;
    /// Returns the frame backing an allocated page.
    fn frame(&self, page: PageNo) -> Result<FrameBuf>;
    /// Allocates a zeroed page, preferring `hint + 1` when it is free.
    fn alloc_page(&self, hint: Option<PageNo>) -> Result<PageNo>;
    /// Returns a page to the free pool.
    fn free_page(&self, page: PageNo) -> Result<()>;
    /// Redo sink for committed mini-transactions.
    fn redo(&self) -> &RedoLog;
    /// Returns a snapshot of allocation statistics.
    fn stats(&self) -> PagerStats;
}

struct PagerInner {
    frames: Vec<Frame>,
    free_cache: FreeCache,
    stats: PagerStats,
}

/// Page store holding every page in memory.
pub struct Pager {
    options: PagerOptions,
    inner: RwLock<PagerInner>,
    redo: RedoLog,
}

impl Pager {
    /// Empty store. Fails unless the page size is a power of two in 4 KiB..=32 KiB.
    pub fn new(options: PagerOptions) -> Result<Self> {
        if !(page::MIN_PAGE_SIZE..=page::MAX_PAGE_SIZE).contains(&options.page_size)
            || !options.page_size.is_power_of_two()
        {
            return Err(LobError::Invalid("page size must be a power of two in 4KiB..=32KiB"));
        }
        let redo = RedoLog::new(options.redo.clone());
        Ok(Self {
            options,
            inner: RwLock::new(PagerInner {
                frames: Vec::new(),
                free_cache: FreeCache::default(),
                stats: PagerStats::default(),
            }),
            redo,
        })
    }

    /// Options the store was opened with.
    pub fn options(&self) -> &PagerOptions {
        &self.options
    }

    /// Number of pages currently allocated.
    pub fn live_pages(&self) -> u64 {
        self.inner.read().stats.live_pages
    }

    /// Whether `page` is currently allocated.
    pub fn is_allocated(&self, page: PageNo) -> bool {
        let inner = self.inner.read();
        matches!(inner.frames.get(page.0 as usize), Some(f) if f.state == FrameState::Live)
    }

    /// Copies the current image of a page.
    pub fn page_image(&self, page: PageNo) -> Result<Vec<u8>> {
        let frame = self.frame(page)?;
        let buf = frame.read();
        Ok(buf.to_vec())
    }

    /// Recomputes the page CRC and compares it with the stamped header value.
    pub fn verify_page(&self, page: PageNo) -> Result<()> {
        let mut image = self.page_image(page)?;
        let header = PageHeader::decode(&image)?;
        if header.page_no != page {
            return Err(LobError::Corruption("page header names a different page"));
        }
        if header.page_size != self.options.page_size {
            return Err(LobError::Corruption("page header size mismatch"));
        }
        page::clear_crc32(&mut image)?;
        let crc = page_crc32(page.0, header.space_id.0, &image);
        if crc != header.crc32 {
            warn!(page = page.0, stored = header.crc32, computed = crc, "pager.crc_mismatch");
            return Err(LobError::Corruption("page crc mismatch"));
        }
        Ok(())
    }
}

impl PageStore for Pager {
    fn page_size(&self) -> u32 {
        self.options.page_size
    }

    fn space_id(&self) -> SpaceId {
        self.options.space_id
    }

    fn frame(&self, page: PageNo) -> Result<FrameBuf> {
        let inner = self.inner.read();
        match inner.frames.get(page.0 as usize) {
            Some(frame) if frame.state == FrameState::Live => Ok(frame.buf.clone()),
            Some(_) => Err(LobError::Corruption("access to freed page")),
            None => Err(LobError::Corruption("page number beyond allocated range")),
        }
    }

    fn alloc_page(&self, hint: Option<PageNo>) -> Result<PageNo> {
        let mut inner = self.inner.write();
        let preferred = hint
            .filter(|h| !h.is_null())
            .map(|h| PageNo(h.0.wrapping_add(1)));
        let reused = match preferred {
            Some(next) if inner.free_cache.take(next) => Some(next),
            _ => inner.free_cache.pop(),
        };
        let page = match reused {
            Some(page) => {
                inner.frames[page.0 as usize].recycle(self.options.page_size as usize);
                page
            }
            None => {
                let next = inner.frames.len() as u32;
                let limit = self.options.max_pages.unwrap_or(FIL_NULL);
                if next >= limit {
                    debug!(next, limit, "pager.out_of_space");
                    return Err(LobError::OutOfSpace);
                }
                inner.frames.push(Frame::new(self.options.page_size as usize));
                inner.stats.high_water = next + 1;
                PageNo(next)
            }
        };
        inner.stats.pages_allocated += 1;
        inner.stats.live_pages += 1;
        trace!(page = page.0, reused = reused.is_some(), "pager.alloc");
        Ok(page)
    }

    fn free_page(&self, page: PageNo) -> Result<()> {
        let mut inner = self.inner.write();
        let frame = inner
            .frames
            .get_mut(page.0 as usize)
            .ok_or(LobError::Corruption("free of page beyond allocated range"))?;
        if frame.state == FrameState::Free {
            return Err(LobError::Corruption("double free of page"));
        }
        frame.state = FrameState::Free;
        inner.free_cache.push(page);
        inner.stats.pages_freed += 1;
        inner.stats.live_pages -= 1;
        trace!(page = page.0, "pager.free");
        Ok(())
    }

    fn redo(&self) -> &RedoLog {
        &self.redo
    }

    fn stats(&self) -> PagerStats {
        self.inner.read().stats.clone()
    }
}
