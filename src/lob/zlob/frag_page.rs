#![forbid(unsafe_code)]
//! Fragment pages: many small compressed streams sharing one page.
//!
//! The area between the fixed header and the slot directory at the end of
//! the page is tiled by fragments. Each fragment starts with an 8-byte header
//! (page-list links, total length, fragment id) and sits on either the free
//! or the used page list. The directory maps a fragment id (its slot index)
//! to the fragment's offset; slot value 0 marks an unused slot. The
//! directory grows downwards by taking two bytes from the free fragment that
//! touches it and shrinks again when its trailing slots are unused.
//!
//! At all times:
//! `used lengths + free lengths + 2 + 2 * slots == page_size - FRAGS`.

use tracing::trace;

use crate::lob::addr::FilAddr;
use crate::lob::plist::PageList;
use crate::primitives::mtr::{PageAccess, PageAlloc};
use crate::types::page::PageKind;
use crate::types::{FragId, LobError, PageNo, Result, FRAG_ID_NULL};

/// Offset of the page format version byte.
pub const VERSION: usize = 32;
/// Offset of the owning fragment entry's address.
pub const OWNER: usize = 33;
/// Base node of the free fragment list.
pub const FREE_LIST: usize = 39;
/// Base node of the used fragment list.
pub const USED_LIST: usize = 45;
/// First byte of the fragment area.
pub const FRAGS: usize = 51;

/// Header in front of every fragment's payload.
pub const FRAG_HDR: usize = 8;
const LEN: usize = 4;
const ID: usize = 6;

/// Bytes per directory slot.
pub const SLOT_LEN: usize = 2;

/// Format version written by [`FragPage::format`].
pub const FRAG_PAGE_FORMAT_VERSION: u8 = 1;

/// Counters describing a fragment page, cached in its fragment entry.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FragStats {
    /// Fragments in use.
    pub n_frags: u16,
    /// Bytes held by used fragments, headers included.
    pub used_len: u16,
    /// Bytes held by free fragments.
    pub total_free_len: u16,
    /// Length of the largest free fragment.
    pub big_free_len: u16,
}

/// One fragment found while walking the page.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Fragment {
    /// Offset of the fragment header within the page.
    pub offset: u16,
    /// Header plus payload.
    pub len: u16,
    /// Directory slot, or `FRAG_ID_NULL` when free.
    pub id: FragId,
}

impl Fragment {
    /// Whether the fragment sits on the free list.
    pub fn is_free(&self) -> bool {
        self.id == FRAG_ID_NULL
    }

    fn end(&self) -> usize {
        self.offset as usize + self.len as usize
    }
}

/// Handle to a fragment page.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FragPage(pub PageNo);

impl FragPage {
    /// Bytes shared by fragments and the directory.
    pub fn payload_capacity(page_size: usize) -> usize {
        page_size - FRAGS
    }

    /// Largest payload a single fragment on an empty page can hold.
    pub fn fragment_capacity(page_size: usize) -> usize {
        page_size - FRAGS - SLOT_LEN - SLOT_LEN - FRAG_HDR
    }

    /// Allocates and formats an empty fragment page owned by `owner`.
    pub fn create<M: PageAlloc>(m: &mut M, hint: Option<PageNo>, owner: FilAddr) -> Result<Self> {
        let page = m.alloc_page(hint, PageKind::ZlobFrag)?;
        let frag = FragPage(page);
        frag.format(m, owner)?;
        Ok(frag)
    }

    /// Writes an empty page: no slots and one free fragment spanning the
    /// whole payload.
    pub fn format<A: PageAccess + ?Sized>(&self, a: &mut A, owner: FilAddr) -> Result<()> {
        let page_size = a.page_size();
        a.write_u8(self.0, VERSION, FRAG_PAGE_FORMAT_VERSION)?;
        owner.write(a, FilAddr::new(self.0, OWNER)?)?;
        self.free_list().init(a)?;
        self.used_list().init(a)?;
        self.set_slot_count(a, 0)?;
        let len = Self::payload_capacity(page_size) - SLOT_LEN;
        self.write_frag_header(a, FRAGS as u16, len as u16, FRAG_ID_NULL)?;
        self.free_list().add_last(a, FRAGS as u16)
    }

    /// List of free fragments.
    pub fn free_list(&self) -> PageList {
        PageList::new(self.0, FREE_LIST)
    }

    /// List of fragments in use.
    pub fn used_list(&self) -> PageList {
        PageList::new(self.0, USED_LIST)
    }

    /// Address of the fragment entry caching this page's counters.
    pub fn owner<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<FilAddr> {
        FilAddr::read(a, FilAddr::new(self.0, OWNER)?)
    }

    /// Number of directory slots, used or not.
    pub fn slot_count<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<u16> {
        a.read_u16(self.0, a.page_size() - SLOT_LEN)
    }

    fn set_slot_count<A: PageAccess + ?Sized>(&self, a: &mut A, n: u16) -> Result<()> {
        let at = a.page_size() - SLOT_LEN;
        a.write_u16(self.0, at, n)
    }

    fn slot_pos(page_size: usize, slot: u16) -> usize {
        page_size - SLOT_LEN - SLOT_LEN * (slot as usize + 1)
    }

    fn slot<A: PageAccess + ?Sized>(&self, a: &mut A, slot: u16) -> Result<u16> {
        let at = Self::slot_pos(a.page_size(), slot);
        a.read_u16(self.0, at)
    }

    fn set_slot<A: PageAccess + ?Sized>(&self, a: &mut A, slot: u16, offset: u16) -> Result<()> {
        let at = Self::slot_pos(a.page_size(), slot);
        a.write_u16(self.0, at, offset)
    }

    /// First byte of the directory; fragments end here.
    fn directory_start<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<usize> {
        let slots = self.slot_count(a)? as usize;
        Ok(a.page_size() - SLOT_LEN - SLOT_LEN * slots)
    }

    fn write_frag_header<A: PageAccess + ?Sized>(
        &self,
        a: &mut A,
        offset: u16,
        len: u16,
        id: FragId,
    ) -> Result<()> {
        let at = offset as usize;
        a.write_u16(self.0, at + LEN, len)?;
        a.write_u16(self.0, at + ID, id)
    }

    fn fragment_at<A: PageAccess + ?Sized>(&self, a: &mut A, offset: u16) -> Result<Fragment> {
        let at = offset as usize;
        let len = a.read_u16(self.0, at + LEN)?;
        if (len as usize) < FRAG_HDR {
            return Err(LobError::Corruption("fragment shorter than its header"));
        }
        Ok(Fragment {
            offset,
            len,
            id: a.read_u16(self.0, at + ID)?,
        })
    }

    fn free_fragments<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<Vec<Fragment>> {
        let list = self.free_list();
        list.collect(a)?
            .into_iter()
            .map(|off| self.fragment_at(a, off))
            .collect()
    }

    /// Every fragment in address order, found by walking the tiling.
    pub fn fragments<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<Vec<Fragment>> {
        let end = self.directory_start(a)?;
        let mut out = Vec::new();
        let mut at = FRAGS;
        while at < end {
            let frag = self.fragment_at(a, at as u16)?;
            at = frag.end();
            out.push(frag);
        }
        if at != end {
            return Err(LobError::Corruption("fragments overlap the directory"));
        }
        Ok(out)
    }

    /// Offset of the fragment with id `id`.
    pub fn offset_of<A: PageAccess + ?Sized>(&self, a: &mut A, id: FragId) -> Result<u16> {
        if id == FRAG_ID_NULL || id >= self.slot_count(a)? {
            return Err(LobError::Corruption("fragment id outside directory"));
        }
        match self.slot(a, id)? {
            0 => Err(LobError::Corruption("fragment id not in use")),
            off => Ok(off),
        }
    }

    /// Payload length of fragment `id`.
    pub fn payload_len<A: PageAccess + ?Sized>(&self, a: &mut A, id: FragId) -> Result<usize> {
        let off = self.offset_of(a, id)?;
        Ok(self.fragment_at(a, off)?.len as usize - FRAG_HDR)
    }

    /// Overwrites the start of fragment `id`'s payload.
    pub fn write<A: PageAccess + ?Sized>(&self, a: &mut A, id: FragId, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.payload_len(a, id)? {
            return Err(LobError::Invalid("write beyond fragment"));
        }
        let off = self.offset_of(a, id)? as usize;
        a.write_bytes(self.0, off + FRAG_HDR, bytes)
    }

    /// Fills `dst` from the start of fragment `id`'s payload.
    pub fn read<A: PageAccess + ?Sized>(&self, a: &mut A, id: FragId, dst: &mut [u8]) -> Result<()> {
        if dst.len() > self.payload_len(a, id)? {
            return Err(LobError::Corruption("read beyond fragment"));
        }
        let off = self.offset_of(a, id)? as usize;
        a.read_into(self.0, off + FRAG_HDR, dst)
    }

    /// Recomputes the counters cached in the fragment entry.
    pub fn stats<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<FragStats> {
        let mut stats = FragStats {
            n_frags: self.used_list().len(a)?,
            ..FragStats::default()
        };
        for off in self.used_list().collect(a)? {
            stats.used_len += self.fragment_at(a, off)?.len;
        }
        for frag in self.free_fragments(a)? {
            stats.total_free_len += frag.len;
            stats.big_free_len = stats.big_free_len.max(frag.len);
        }
        Ok(stats)
    }

    fn unused_slot<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<Option<u16>> {
        for slot in 0..self.slot_count(a)? {
            if self.slot(a, slot)? == 0 {
                return Ok(Some(slot));
            }
        }
        Ok(None)
    }

    /// Carves a fragment with `size` payload bytes. Returns `None` when the
    /// page cannot hold it.
    pub fn alloc<A: PageAccess + ?Sized>(&self, a: &mut A, size: usize) -> Result<Option<FragId>> {
        let total = size + FRAG_HDR;
        if total > u16::MAX as usize {
            return Ok(None);
        }
        let mut frees = self.free_fragments(a)?;
        let dir = self.directory_start(a)?;
        let slot = match self.unused_slot(a)? {
            Some(slot) => slot,
            None => {
                let Some(adj) = frees.iter().position(|f| f.end() == dir) else {
                    return Ok(None);
                };
                let usable = |i: usize, f: &Fragment| {
                    if i == adj {
                        (f.len as usize).saturating_sub(SLOT_LEN)
                    } else {
                        f.len as usize
                    }
                };
                let best = frees.iter().enumerate().map(|(i, f)| usable(i, f)).max();
                if frees[adj].len as usize - SLOT_LEN < FRAG_HDR || best < Some(total) {
                    return Ok(None);
                }
                let slots = self.slot_count(a)?;
                if slots == FRAG_ID_NULL {
                    return Ok(None);
                }
                frees[adj].len -= SLOT_LEN as u16;
                self.write_frag_header(a, frees[adj].offset, frees[adj].len, FRAG_ID_NULL)?;
                self.set_slot_count(a, slots + 1)?;
                self.set_slot(a, slots, 0)?;
                slots
            }
        };

        let pick = frees
            .iter()
            .find(|f| f.len as usize == total)
            .or_else(|| frees.iter().max_by_key(|f| f.len))
            .copied();
        let Some(frag) = pick.filter(|f| f.len as usize >= total) else {
            return Ok(None);
        };
        self.free_list().remove(a, frag.offset)?;
        let leftover = frag.len as usize - total;
        let len = if leftover >= FRAG_HDR {
            let rest = frag.offset + total as u16;
            self.write_frag_header(a, rest, leftover as u16, FRAG_ID_NULL)?;
            self.free_list().add_last(a, rest)?;
            total as u16
        } else {
            frag.len
        };
        self.write_frag_header(a, frag.offset, len, slot)?;
        self.used_list().add_last(a, frag.offset)?;
        self.set_slot(a, slot, frag.offset)?;
        trace!(page = self.0 .0, id = slot, len, "lob.frag.alloc");
        Ok(Some(slot))
    }

    /// Returns fragment `id` to the free list, merging it with free
    /// neighbours, and trims unused trailing directory slots.
    pub fn free<A: PageAccess + ?Sized>(&self, a: &mut A, id: FragId) -> Result<()> {
        let off = self.offset_of(a, id)?;
        let mut frag = self.fragment_at(a, off)?;
        self.used_list().remove(a, off)?;
        self.set_slot(a, id, 0)?;

        let dir = self.directory_start(a)?;
        if frag.end() < dir {
            let after = self.fragment_at(a, frag.end() as u16)?;
            if after.is_free() {
                self.free_list().remove(a, after.offset)?;
                frag.len += after.len;
            }
        }
        if let Some(before) = self
            .free_fragments(a)?
            .into_iter()
            .find(|f| f.end() == frag.offset as usize)
        {
            self.free_list().remove(a, before.offset)?;
            frag.len += before.len;
            frag.offset = before.offset;
        }
        frag.id = FRAG_ID_NULL;
        self.write_frag_header(a, frag.offset, frag.len, FRAG_ID_NULL)?;
        self.free_list().add_last(a, frag.offset)?;
        self.shrink_directory(a)?;
        trace!(page = self.0 .0, id, "lob.frag.free");
        Ok(())
    }

    fn shrink_directory<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<()> {
        loop {
            let slots = self.slot_count(a)?;
            if slots == 0 || self.slot(a, slots - 1)? != 0 {
                return Ok(());
            }
            let dir = self.directory_start(a)?;
            let Some(adj) = self.free_fragments(a)?.into_iter().find(|f| f.end() == dir) else {
                return Ok(());
            };
            self.set_slot_count(a, slots - 1)?;
            self.write_frag_header(a, adj.offset, adj.len + SLOT_LEN as u16, FRAG_ID_NULL)?;
        }
    }

    /// Checks the tiling, the lists and the conservation identity.
    pub fn check<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<FragStats> {
        self.free_list().validate(a)?;
        self.used_list().validate(a)?;
        let frags = self.fragments(a)?;
        let slots = self.slot_count(a)?;
        let mut free_seen = 0u16;
        let mut used_seen = 0u16;
        for pair in frags.windows(2) {
            if pair[0].is_free() && pair[1].is_free() {
                return Err(LobError::Corruption("adjacent free fragments not merged"));
            }
        }
        for frag in &frags {
            if frag.is_free() {
                free_seen += 1;
            } else {
                used_seen += 1;
                if self.offset_of(a, frag.id)? != frag.offset {
                    return Err(LobError::Corruption("directory slot points elsewhere"));
                }
            }
        }
        if free_seen != self.free_list().len(a)? || used_seen != self.used_list().len(a)? {
            return Err(LobError::Corruption("fragment lists disagree with page"));
        }
        let stats = self.stats(a)?;
        let accounted = stats.used_len as usize
            + stats.total_free_len as usize
            + SLOT_LEN
            + SLOT_LEN * slots as usize;
        if accounted != Self::payload_capacity(a.page_size()) {
            return Err(LobError::Corruption("fragment page space not conserved"));
        }
        Ok(stats)
    }
}
