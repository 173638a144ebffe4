//! Data pages of an uncompressed LOB.

use crate::primitives::mtr::{PageAccess, PageAlloc};
use crate::types::page::PageKind;
use crate::types::{LobError, PageNo, Result, TrxId};

/// Format version byte.
pub const VERSION: usize = 32;
/// Chunk length on this page.
pub const DATA_LEN: usize = 33;
/// Transaction that wrote the page.
pub const CREATOR_TRX: usize = 37;
/// Data page of the next live entry, or null on the last page.
pub const NEXT_PAGE: usize = 43;
/// First byte of the chunk.
pub const DATA: usize = 47;

/// Format version written by [`DataPage::create`].
pub const DATA_PAGE_FORMAT_VERSION: u8 = 1;

/// Page holding one chunk of an uncompressed LOB.
///
/// Readers locate chunks through index entries. The next-page field chains
/// the live data pages in index order; pages that only older versions still
/// reference keep whatever link they had when they left the chain.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DataPage(pub PageNo);

impl DataPage {
    /// Chunk bytes one page holds.
    pub fn capacity(page_size: usize) -> usize {
        page_size - DATA
    }

    /// Allocates an empty data page with a null next-page link.
    pub fn create<M: PageAlloc>(m: &mut M, hint: Option<PageNo>, creator: TrxId) -> Result<Self> {
        let page = m.alloc_page(hint, PageKind::LobData)?;
        m.write_u8(page, VERSION, DATA_PAGE_FORMAT_VERSION)?;
        m.write_u32(page, DATA_LEN, 0)?;
        m.write_u48(page, CREATOR_TRX, creator.0)?;
        m.write_u32(page, NEXT_PAGE, PageNo::NULL.0)?;
        Ok(DataPage(page))
    }

    /// Chunk bytes stored on the page.
    pub fn data_len<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<u32> {
        a.read_u32(self.0, DATA_LEN)
    }

    /// Records the chunk length.
    pub fn set_data_len<A: PageAccess + ?Sized>(&self, a: &mut A, len: u32) -> Result<()> {
        a.write_u32(self.0, DATA_LEN, len)
    }

    /// Next live data page, or `PageNo::NULL`.
    pub fn next<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<PageNo> {
        Ok(PageNo(a.read_u32(self.0, NEXT_PAGE)?))
    }

    /// Points the page at the next live data page.
    pub fn set_next<A: PageAccess + ?Sized>(&self, a: &mut A, next: PageNo) -> Result<()> {
        a.write_u32(self.0, NEXT_PAGE, next.0)
    }

    /// Writes `bytes` at `offset` within the data area.
    pub fn write<A: PageAccess + ?Sized>(&self, a: &mut A, offset: usize, bytes: &[u8]) -> Result<()> {
        if offset + bytes.len() > Self::capacity(a.page_size()) {
            return Err(LobError::Invalid("write beyond data page capacity"));
        }
        a.write_bytes(self.0, DATA + offset, bytes)
    }

    /// Reads `dst.len()` bytes at `offset` within the data area.
    pub fn read<A: PageAccess + ?Sized>(&self, a: &mut A, offset: usize, dst: &mut [u8]) -> Result<()> {
        if offset + dst.len() > Self::capacity(a.page_size()) {
            return Err(LobError::Corruption("read beyond data page capacity"));
        }
        a.read_into(self.0, DATA + offset, dst)
    }

    /// Releases the page; fails unless it is a data page.
    pub fn free<M: PageAlloc>(&self, m: &mut M) -> Result<()> {
        m.expect_kind(self.0, PageKind::LobData)?;
        m.free_page(self.0)
    }
}
