//! First page of an uncompressed LOB.

use tracing::trace;

use super::addr::FilAddr;
use super::entry::{IndexEntry, LobFirstPage, OpCtx, Stamp};
use super::flst;
use super::index_entry::LobEntry;
use super::index_page;
use super::options::LobFormat;
use crate::primitives::mtr::{PageAccess, PageAlloc};
use crate::types::page::PageKind;
use crate::types::{LobError, PageNo, Result};

/// Offsets specific to the uncompressed first page.
pub mod layout {
    /// Base node of the live index list.
    pub const INDEX_LIST: usize = 58;
    /// Base node of the free entry list.
    pub const FREE_LIST: usize = 74;
    /// Head of the index page chain.
    pub const FIRST_INDEX_PAGE: usize = 90;
    /// First embedded index entry.
    pub const ENTRIES: usize = 94;
    /// Index entries embedded in the first page.
    pub const ENTRY_COUNT: usize = 10;
    /// First inline data byte.
    pub const DATA: usize = ENTRIES + ENTRY_COUNT * 60;
}

/// First page of an uncompressed LOB.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FirstPage(pub PageNo);

impl FirstPage {
    /// Inline data bytes available on the first page.
    pub fn data_capacity(page_size: usize) -> usize {
        page_size - layout::DATA
    }

    /// Allocates and formats a first page.
    pub fn create<M: PageAlloc>(m: &mut M, hint: Option<PageNo>, stamp: Stamp) -> Result<Self> {
        let page = m.alloc_page(hint, PageKind::LobFirst)?;
        let first = FirstPage(page);
        first.init_common(m, stamp)?;
        flst::init(m, first.index_list())?;
        flst::init(m, first.free_list())?;
        m.write_u32(page, layout::FIRST_INDEX_PAGE, PageNo::NULL.0)?;
        first.push_embedded_entries(m)?;
        Ok(first)
    }

    fn push_embedded_entries<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<()> {
        for i in 0..layout::ENTRY_COUNT {
            let entry = LobEntry::at(FilAddr::new(self.0, layout::ENTRIES + i * LobEntry::SIZE)?);
            entry.reset(a)?;
            flst::add_last(a, self.free_list(), entry.addr())?;
        }
        Ok(())
    }

    /// Head of the index page chain, or `PageNo::NULL`.
    pub fn first_index_page<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<PageNo> {
        Ok(PageNo(a.read_u32(self.0, layout::FIRST_INDEX_PAGE)?))
    }

    /// Writes inline bytes at `offset`.
    pub fn write_data<A: PageAccess + ?Sized>(&self, a: &mut A, offset: usize, bytes: &[u8]) -> Result<()> {
        if offset + bytes.len() > Self::data_capacity(a.page_size()) {
            return Err(LobError::Invalid("write beyond first page capacity"));
        }
        a.write_bytes(self.0, layout::DATA + offset, bytes)
    }

    /// Reads inline bytes at `offset`.
    pub fn read_data<A: PageAccess + ?Sized>(&self, a: &mut A, offset: usize, dst: &mut [u8]) -> Result<()> {
        if offset + dst.len() > Self::data_capacity(a.page_size()) {
            return Err(LobError::Corruption("read beyond first page capacity"));
        }
        a.read_into(self.0, layout::DATA + offset, dst)
    }
}

impl LobFirstPage for FirstPage {
    type Entry = LobEntry;
    const KIND: PageKind = PageKind::LobFirst;
    const FORMAT: LobFormat = LobFormat::Uncompressed;

    fn at(page: PageNo) -> Self {
        FirstPage(page)
    }

    fn page(&self) -> PageNo {
        self.0
    }

    fn index_list(&self) -> FilAddr {
        FilAddr {
            page: self.0,
            boffset: layout::INDEX_LIST as u16,
        }
    }

    fn free_list(&self) -> FilAddr {
        FilAddr {
            page: self.0,
            boffset: layout::FREE_LIST as u16,
        }
    }

    fn grow_index<M: PageAlloc>(&self, m: &mut M, ctx: OpCtx<'_>) -> Result<()> {
        let head = self.first_index_page(m)?;
        let page = index_page::create(m, Some(self.0), PageKind::LobIndex, head)?;
        m.write_u32(self.0, layout::FIRST_INDEX_PAGE, page.0)?;
        let slots = index_page::slot_count(m.page_size(), LobEntry::SIZE);
        for i in 0..slots {
            let entry = LobEntry::at(index_page::slot_addr(page, i, LobEntry::SIZE)?);
            entry.reset(m)?;
            flst::add_last(m, self.free_list(), entry.addr())?;
        }
        ctx.metrics.add_pages_allocated(1);
        trace!(first = self.0 .0, page = page.0, slots, "lob.index.grow");
        Ok(())
    }

    fn owned_pages<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<Vec<PageNo>> {
        let mut pages = Vec::new();
        for entry in super::entry::live_entries(a, *self)? {
            for version in super::entry::versions_of(a, entry)? {
                pages.push(version.location(a)?);
            }
            pages.push(entry.location(a)?);
        }
        pages.retain(|p| !p.is_null() && *p != self.0);
        pages.sort_unstable();
        pages.dedup();
        let head = self.first_index_page(a)?;
        pages.extend(index_page::chain(a, head, PageKind::LobIndex)?);
        Ok(pages)
    }

    fn reset_lists<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<()> {
        flst::init(a, self.index_list())?;
        flst::init(a, self.free_list())?;
        a.write_u32(self.0, layout::FIRST_INDEX_PAGE, PageNo::NULL.0)?;
        self.push_embedded_entries(a)?;
        self.set_data_len(a, 0)
    }
}
