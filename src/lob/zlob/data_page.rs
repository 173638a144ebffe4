//! Data pages of compressed streams.

use crate::primitives::mtr::{PageAccess, PageAlloc};
use crate::types::page::PageKind;
use crate::types::{LobError, PageNo, Result, TrxId};

/// Format version byte.
pub const VERSION: usize = 32;
/// Stream bytes on this page.
pub const DATA_LEN: usize = 33;
/// Transaction that wrote the page.
pub const CREATOR_TRX: usize = 37;
/// Next page of the same stream, or null.
pub const NEXT_PAGE: usize = 43;
/// First stream byte.
pub const DATA: usize = 47;

/// Format version written by [`ZDataPage::create`].
pub const ZDATA_PAGE_FORMAT_VERSION: u8 = 1;

/// Page holding part of one compressed stream. Streams longer than a page
/// continue on the page named by the next-page field.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ZDataPage(pub PageNo);

impl ZDataPage {
    /// Stream bytes one page holds.
    pub fn capacity(page_size: usize) -> usize {
        page_size - DATA
    }

    /// Allocates an empty page with no successor.
    pub fn create<M: PageAlloc>(m: &mut M, hint: Option<PageNo>, creator: TrxId) -> Result<Self> {
        let page = m.alloc_page(hint, PageKind::ZlobData)?;
        m.write_u8(page, VERSION, ZDATA_PAGE_FORMAT_VERSION)?;
        m.write_u32(page, DATA_LEN, 0)?;
        m.write_u48(page, CREATOR_TRX, creator.0)?;
        m.write_u32(page, NEXT_PAGE, PageNo::NULL.0)?;
        Ok(ZDataPage(page))
    }

    /// Stream bytes stored on this page.
    pub fn data_len<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<u32> {
        a.read_u32(self.0, DATA_LEN)
    }

    /// Next page of the stream.
    pub fn next<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<PageNo> {
        Ok(PageNo(a.read_u32(self.0, NEXT_PAGE)?))
    }

    /// Continues the stream on `next`.
    pub fn set_next<A: PageAccess + ?Sized>(&self, a: &mut A, next: PageNo) -> Result<()> {
        a.write_u32(self.0, NEXT_PAGE, next.0)
    }

    /// Stores `bytes` as this page's share of the stream.
    pub fn fill<A: PageAccess + ?Sized>(&self, a: &mut A, bytes: &[u8]) -> Result<()> {
        if bytes.len() > Self::capacity(a.page_size()) {
            return Err(LobError::Invalid("write beyond data page capacity"));
        }
        a.write_bytes(self.0, DATA, bytes)?;
        a.write_u32(self.0, DATA_LEN, bytes.len() as u32)
    }

    /// Appends this page's share of the stream to `out`.
    pub fn read_into_vec<A: PageAccess + ?Sized>(&self, a: &mut A, out: &mut Vec<u8>) -> Result<()> {
        a.expect_kind(self.0, PageKind::ZlobData)?;
        let len = self.data_len(a)? as usize;
        if len > Self::capacity(a.page_size()) {
            return Err(LobError::Corruption("data page length exceeds capacity"));
        }
        let start = out.len();
        out.resize(start + len, 0);
        a.read_into(self.0, DATA, &mut out[start..])
    }
}

/// Pages of the chain starting at `head`.
pub fn chain<A: PageAccess + ?Sized>(a: &mut A, head: PageNo) -> Result<Vec<PageNo>> {
    let mut pages = Vec::new();
    let mut cur = head;
    while !cur.is_null() {
        a.expect_kind(cur, PageKind::ZlobData)?;
        pages.push(cur);
        cur = ZDataPage(cur).next(a)?;
    }
    Ok(pages)
}
