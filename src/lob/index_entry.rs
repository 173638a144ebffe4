//! Index entries of uncompressed LOBs.

use super::addr::FilAddr;
use super::data_page::DataPage;
use super::entry::{entry_layout, IndexEntry, OpCtx};
use crate::primitives::mtr::{PageAccess, PageAlloc};
use crate::types::{PageNo, Result};

const PAGE_NO: usize = entry_layout::TAIL;
const DATA_LEN: usize = entry_layout::TAIL + 4;

/// Index entry of an uncompressed LOB: one chunk stored on one page.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LobEntry(FilAddr);

impl LobEntry {
    /// Points the entry at the page holding its chunk.
    pub fn set_location<A: PageAccess + ?Sized>(&self, a: &mut A, page: PageNo) -> Result<()> {
        let (p, off) = self.field(PAGE_NO);
        a.write_u32(p, off, page.0)
    }

    /// Records the chunk length.
    pub fn set_data_len<A: PageAccess + ?Sized>(&self, a: &mut A, len: u32) -> Result<()> {
        let (p, off) = self.field(DATA_LEN);
        a.write_u32(p, off, len)
    }
}

impl IndexEntry for LobEntry {
    const SIZE: usize = 60;

    fn at(addr: FilAddr) -> Self {
        LobEntry(addr)
    }

    fn addr(&self) -> FilAddr {
        self.0
    }

    fn data_len<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<u32> {
        let (p, off) = self.field(DATA_LEN);
        a.read_u32(p, off)
    }

    fn location<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<PageNo> {
        let (p, off) = self.field(PAGE_NO);
        Ok(PageNo(a.read_u32(p, off)?))
    }

    fn clear_location<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<()> {
        self.set_location(a, PageNo::NULL)?;
        self.set_data_len(a, 0)
    }

    fn free_storage<M: PageAlloc>(&self, m: &mut M, first: PageNo, ctx: OpCtx<'_>) -> Result<()> {
        let page = self.location(m)?;
        if page.is_null() || page == first {
            return Ok(());
        }
        DataPage(page).free(m)?;
        ctx.metrics.add_pages_freed(1);
        self.clear_location(m)
    }
}
