//! Fragment entries: per fragment page counters cached on the first page
//! or on fragment-entry node pages, so page selection can skip full pages
//! without reading them.

use crate::lob::addr::FilAddr;
use crate::primitives::mtr::PageAccess;
use crate::types::{PageNo, Result};

use super::frag_page::FragStats;

const PAGE_NO: usize = 12;
const N_FRAGS: usize = 16;
const USED_LEN: usize = 18;
const TOTAL_FREE_LEN: usize = 20;
const BIG_FREE_LEN: usize = 22;

/// Fragment entry stored at the wrapped address.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FragEntry(pub FilAddr);

impl FragEntry {
    /// Encoded size.
    pub const SIZE: usize = 24;

    fn at(&self, off: usize) -> (PageNo, usize) {
        (self.0.page, self.0.offset() + off)
    }

    /// Zeroes the counters, unlinks the node and points at no page.
    pub fn reset<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<()> {
        FilAddr::NULL.write(a, self.0)?;
        FilAddr::NULL.write(a, self.0.at_offset(FilAddr::LEN)?)?;
        self.set_page_no(a, PageNo::NULL)?;
        self.set_stats(a, FragStats::default())
    }

    /// Fragment page the entry describes.
    pub fn page_no<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<PageNo> {
        let (page, off) = self.at(PAGE_NO);
        Ok(PageNo(a.read_u32(page, off)?))
    }

    /// Points the entry at fragment page `target`.
    pub fn set_page_no<A: PageAccess + ?Sized>(&self, a: &mut A, target: PageNo) -> Result<()> {
        let (page, off) = self.at(PAGE_NO);
        a.write_u32(page, off, target.0)
    }

    /// Cached counters.
    pub fn stats<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<FragStats> {
        let (page, off) = self.at(0);
        Ok(FragStats {
            n_frags: a.read_u16(page, off + N_FRAGS)?,
            used_len: a.read_u16(page, off + USED_LEN)?,
            total_free_len: a.read_u16(page, off + TOTAL_FREE_LEN)?,
            big_free_len: a.read_u16(page, off + BIG_FREE_LEN)?,
        })
    }

    /// Overwrites the cached counters.
    pub fn set_stats<A: PageAccess + ?Sized>(&self, a: &mut A, stats: FragStats) -> Result<()> {
        let (page, off) = self.at(0);
        a.write_u16(page, off + N_FRAGS, stats.n_frags)?;
        a.write_u16(page, off + USED_LEN, stats.used_len)?;
        a.write_u16(page, off + TOTAL_FREE_LEN, stats.total_free_len)?;
        a.write_u16(page, off + BIG_FREE_LEN, stats.big_free_len)
    }
}
