use tracing::trace;

use crate::lob::addr::FilAddr;
use crate::lob::entry::{versions_of, live_entries, IndexEntry, LobFirstPage, OpCtx, Stamp};
use crate::lob::flst;
use crate::lob::index_page;
use crate::lob::options::LobFormat;
use crate::primitives::mtr::{PageAccess, PageAlloc};
use crate::types::page::PageKind;
use crate::types::{LobError, PageNo, Result, FRAG_ID_NULL};

use super::data_page;
use super::frag_entry::FragEntry;
use super::index_entry::ZEntry;

/// Offsets specific to the compressed first page.
pub mod layout {
    /// Head of the index page chain.
    pub const FIRST_INDEX_PAGE: usize = 58;
    /// Head of the fragment-entry node page chain.
    pub const FIRST_FRAG_NODE_PAGE: usize = 62;
    /// Base node of the free entry list.
    pub const FREE_LIST: usize = 66;
    /// Base node of the live index list.
    pub const INDEX_LIST: usize = 82;
    /// Base node of the free fragment-entry list.
    pub const FREE_FRAG_LIST: usize = 98;
    /// Base node of the used fragment-entry list.
    pub const FRAG_LIST: usize = 114;
    /// Data page continuing the inline stream.
    pub const INLINE_NEXT: usize = 130;
    /// Inline stream length.
    pub const INLINE_LEN: usize = 134;
    /// First embedded index entry.
    pub const ENTRIES: usize = 138;
    /// Index entries embedded in the first page.
    pub const ENTRY_COUNT: usize = 10;
    /// First embedded fragment entry.
    pub const FRAG_ENTRIES: usize = ENTRIES + ENTRY_COUNT * 66;
    /// Fragment entries embedded in the first page.
    pub const FRAG_ENTRY_COUNT: usize = 5;
    /// First inline stream byte.
    pub const DATA: usize = FRAG_ENTRIES + FRAG_ENTRY_COUNT * 24;
}

/// First page of a compressed LOB.
///
/// Besides the index lists it anchors the fragment-entry lists and an
/// inline stream area. The inline area is written once, by the insert that
/// creates the LOB, for the stream of chunk 0.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ZFirstPage(pub PageNo);

impl ZFirstPage {
    /// Inline stream bytes available on the first page.
    pub fn data_capacity(page_size: usize) -> usize {
        page_size - layout::DATA
    }

    /// Allocates and formats a first page with every embedded entry free.
    pub fn create<M: PageAlloc>(m: &mut M, hint: Option<PageNo>, stamp: Stamp) -> Result<Self> {
        let page = m.alloc_page(hint, PageKind::ZlobFirst)?;
        let first = ZFirstPage(page);
        first.init_common(m, stamp)?;
        first.init_lists(m)?;
        Ok(first)
    }

    fn init_lists<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<()> {
        for base in [
            self.free_list(),
            self.index_list(),
            self.free_frag_list(),
            self.frag_list(),
        ] {
            flst::init(a, base)?;
        }
        a.write_u32(self.0, layout::FIRST_INDEX_PAGE, PageNo::NULL.0)?;
        a.write_u32(self.0, layout::FIRST_FRAG_NODE_PAGE, PageNo::NULL.0)?;
        self.set_inline_stream(a, 0, PageNo::NULL)?;
        for i in 0..layout::ENTRY_COUNT {
            let entry = ZEntry::at(FilAddr::new(self.0, layout::ENTRIES + i * ZEntry::SIZE)?);
            entry.reset(a)?;
            flst::add_last(a, self.free_list(), entry.addr())?;
        }
        for i in 0..layout::FRAG_ENTRY_COUNT {
            let fe = FragEntry(FilAddr::new(self.0, layout::FRAG_ENTRIES + i * FragEntry::SIZE)?);
            fe.reset(a)?;
            flst::add_last(a, self.free_frag_list(), fe.0)?;
        }
        Ok(())
    }

    fn base(&self, off: usize) -> FilAddr {
        FilAddr {
            page: self.0,
            boffset: off as u16,
        }
    }

    /// Unused fragment entries.
    pub fn free_frag_list(&self) -> FilAddr {
        self.base(layout::FREE_FRAG_LIST)
    }

    /// Fragment entries describing live fragment pages.
    pub fn frag_list(&self) -> FilAddr {
        self.base(layout::FRAG_LIST)
    }

    /// Head of the index page chain.
    pub fn first_index_page<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<PageNo> {
        Ok(PageNo(a.read_u32(self.0, layout::FIRST_INDEX_PAGE)?))
    }

    /// Head of the fragment-entry node page chain.
    pub fn first_frag_node_page<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<PageNo> {
        Ok(PageNo(a.read_u32(self.0, layout::FIRST_FRAG_NODE_PAGE)?))
    }

    /// Replaces the head of the fragment-entry node page chain.
    pub fn set_first_frag_node_page<A: PageAccess + ?Sized>(&self, a: &mut A, page: PageNo) -> Result<()> {
        a.write_u32(self.0, layout::FIRST_FRAG_NODE_PAGE, page.0)
    }

    /// Data page continuing the inline stream.
    pub fn inline_next<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<PageNo> {
        Ok(PageNo(a.read_u32(self.0, layout::INLINE_NEXT)?))
    }

    /// Stream bytes stored inline.
    pub fn inline_len<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<u32> {
        a.read_u32(self.0, layout::INLINE_LEN)
    }

    /// Records the inline stream length and its continuation page.
    pub fn set_inline_stream<A: PageAccess + ?Sized>(&self, a: &mut A, len: u32, next: PageNo) -> Result<()> {
        a.write_u32(self.0, layout::INLINE_LEN, len)?;
        a.write_u32(self.0, layout::INLINE_NEXT, next.0)
    }

    /// Writes the inline part of chunk 0's stream.
    pub fn write_inline<A: PageAccess + ?Sized>(&self, a: &mut A, bytes: &[u8]) -> Result<()> {
        if bytes.len() > Self::data_capacity(a.page_size()) {
            return Err(LobError::Invalid("write beyond first page capacity"));
        }
        a.write_bytes(self.0, layout::DATA, bytes)
    }

    /// Appends the inline part of the stream to `out`.
    pub fn read_inline<A: PageAccess + ?Sized>(&self, a: &mut A, out: &mut Vec<u8>) -> Result<()> {
        let len = self.inline_len(a)? as usize;
        if len > Self::data_capacity(a.page_size()) {
            return Err(LobError::Corruption("inline stream exceeds first page"));
        }
        let start = out.len();
        out.resize(start + len, 0);
        a.read_into(self.0, layout::DATA, &mut out[start..])
    }

    /// Data pages holding the stream of `entry`.
    pub fn stream_pages<A: PageAccess + ?Sized>(&self, a: &mut A, entry: ZEntry) -> Result<Vec<PageNo>> {
        let page = entry.location(a)?;
        if page.is_null() || entry.frag_id(a)? != FRAG_ID_NULL {
            return Ok(Vec::new());
        }
        let head = if page == self.0 {
            self.inline_next(a)?
        } else {
            page
        };
        data_page::chain(a, head)
    }

    /// Fragment entries of live fragment pages.
    pub fn frag_entries<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<Vec<FragEntry>> {
        Ok(flst::collect(a, self.frag_list())?
            .into_iter()
            .map(FragEntry)
            .collect())
    }
}

impl LobFirstPage for ZFirstPage {
    type Entry = ZEntry;
    const KIND: PageKind = PageKind::ZlobFirst;
    const FORMAT: LobFormat = LobFormat::Compressed;

    fn at(page: PageNo) -> Self {
        ZFirstPage(page)
    }

    fn page(&self) -> PageNo {
        self.0
    }

    fn index_list(&self) -> FilAddr {
        self.base(layout::INDEX_LIST)
    }

    fn free_list(&self) -> FilAddr {
        self.base(layout::FREE_LIST)
    }

    fn grow_index<M: PageAlloc>(&self, m: &mut M, ctx: OpCtx<'_>) -> Result<()> {
        let head = self.first_index_page(m)?;
        let page = index_page::create(m, Some(self.0), PageKind::ZlobIndex, head)?;
        m.write_u32(self.0, layout::FIRST_INDEX_PAGE, page.0)?;
        let slots = index_page::slot_count(m.page_size(), ZEntry::SIZE);
        for i in 0..slots {
            let entry = ZEntry::at(index_page::slot_addr(page, i, ZEntry::SIZE)?);
            entry.reset(m)?;
            flst::add_last(m, self.free_list(), entry.addr())?;
        }
        ctx.metrics.add_pages_allocated(1);
        trace!(first = self.0 .0, page = page.0, slots, "lob.zlob.index.grow");
        Ok(())
    }

    fn owned_pages<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<Vec<PageNo>> {
        let mut pages = Vec::new();
        for entry in live_entries(a, *self)? {
            for version in versions_of(a, entry)? {
                pages.extend(self.stream_pages(a, version)?);
            }
            pages.extend(self.stream_pages(a, entry)?);
        }
        for fe in self.frag_entries(a)? {
            pages.push(fe.page_no(a)?);
        }
        pages.retain(|p| !p.is_null() && *p != self.0);
        pages.sort_unstable();
        pages.dedup();
        let head = self.first_index_page(a)?;
        pages.extend(index_page::chain(a, head, PageKind::ZlobIndex)?);
        let head = self.first_frag_node_page(a)?;
        pages.extend(index_page::chain(a, head, PageKind::ZlobFragEntry)?);
        Ok(pages)
    }

    fn reset_lists<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<()> {
        self.init_lists(a)?;
        self.set_data_len(a, 0)
    }
}
