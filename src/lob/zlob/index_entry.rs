use crate::lob::addr::FilAddr;
use crate::lob::entry::{entry_layout, IndexEntry, LobFirstPage, OpCtx};
use crate::primitives::mtr::{PageAccess, PageAlloc};
use crate::types::{FragId, PageNo, Result, FRAG_ID_NULL};

use super::first_page::ZFirstPage;
use super::{frag, stream};

const Z_PAGE_NO: usize = entry_layout::TAIL;
const FRAG_ID: usize = entry_layout::TAIL + 4;
const DATA_LEN: usize = entry_layout::TAIL + 6;
const ZDATA_LEN: usize = entry_layout::TAIL + 10;

/// Index entry of a compressed LOB: one zlib stream holding one chunk.
///
/// The stream lives in a fragment when `frag_id` is set, otherwise it starts
/// on `z_page_no` (possibly the first page) and continues through data pages.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ZEntry(FilAddr);

impl ZEntry {
    /// Points the entry at its stream's start page and fragment.
    pub fn set_location<A: PageAccess + ?Sized>(&self, a: &mut A, page: PageNo, frag: FragId) -> Result<()> {
        let (p, off) = self.field(Z_PAGE_NO);
        a.write_u32(p, off, page.0)?;
        let (p, off) = self.field(FRAG_ID);
        a.write_u16(p, off, frag)
    }

    /// Fragment holding the stream, or `FRAG_ID_NULL`.
    pub fn frag_id<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<FragId> {
        let (p, off) = self.field(FRAG_ID);
        a.read_u16(p, off)
    }

    /// Records the uncompressed chunk length.
    pub fn set_data_len<A: PageAccess + ?Sized>(&self, a: &mut A, len: u32) -> Result<()> {
        let (p, off) = self.field(DATA_LEN);
        a.write_u32(p, off, len)
    }

    /// Compressed stream length.
    pub fn zdata_len<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<u32> {
        let (p, off) = self.field(ZDATA_LEN);
        a.read_u32(p, off)
    }

    /// Records the compressed stream length.
    pub fn set_zdata_len<A: PageAccess + ?Sized>(&self, a: &mut A, len: u32) -> Result<()> {
        let (p, off) = self.field(ZDATA_LEN);
        a.write_u32(p, off, len)
    }
}

impl IndexEntry for ZEntry {
    const SIZE: usize = 66;

    fn at(addr: FilAddr) -> Self {
        ZEntry(addr)
    }

    fn addr(&self) -> FilAddr {
        self.0
    }

    fn data_len<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<u32> {
        let (p, off) = self.field(DATA_LEN);
        a.read_u32(p, off)
    }

    fn location<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<PageNo> {
        let (p, off) = self.field(Z_PAGE_NO);
        Ok(PageNo(a.read_u32(p, off)?))
    }

    fn clear_location<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<()> {
        self.set_location(a, PageNo::NULL, FRAG_ID_NULL)?;
        self.set_data_len(a, 0)?;
        self.set_zdata_len(a, 0)
    }

    fn free_storage<M: PageAlloc>(&self, m: &mut M, first: PageNo, ctx: OpCtx<'_>) -> Result<()> {
        let page = self.location(m)?;
        if page.is_null() {
            return Ok(());
        }
        let first = ZFirstPage::at(first);
        let frag_id = self.frag_id(m)?;
        if frag_id != FRAG_ID_NULL {
            frag::free_fragment(m, ctx, first, page, frag_id)?;
        } else if page == first.0 {
            let rest = first.inline_next(m)?;
            first.set_inline_stream(m, 0, PageNo::NULL)?;
            stream::free_chain(m, ctx, rest)?;
        } else {
            stream::free_chain(m, ctx, page)?;
        }
        self.clear_location(m)
    }
}
