#![forbid(unsafe_code)]
//! Capabilities shared by the uncompressed and compressed representations.
//!
//! Both formats lay out the first-page header and the leading 52 bytes of an
//! index entry identically, so list maintenance, visibility, rollback and
//! purge are written once against [`IndexEntry`] and [`LobFirstPage`].

use std::fmt;

use super::addr::FilAddr;
use super::flst;
use super::metrics::LobMetrics;
use super::options::{LobFormat, LobOptions};
use crate::primitives::mtr::{PageAccess, PageAlloc};
use crate::types::page::PageKind;
use crate::types::{LobVersion, PageNo, Result, TrxId, UndoNo};

/// Transaction id plus undo number identifying one modification.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct Stamp {
    /// Modifying transaction.
    pub trx: TrxId,
    /// Undo record of the modification within `trx`.
    pub undo: UndoNo,
}

impl Stamp {
    /// Stamp of an entry nobody has modified.
    pub const NONE: Stamp = Stamp {
        trx: TrxId(0),
        undo: 0,
    };

    /// Stamp for undo record `undo` of `trx`.
    pub fn new(trx: TrxId, undo: UndoNo) -> Self {
        Self { trx, undo }
    }
}

/// Options and counters threaded through engine operations.
#[derive(Clone, Copy)]
pub(crate) struct OpCtx<'a> {
    pub options: &'a LobOptions,
    pub metrics: &'a LobMetrics,
}

/// Offsets inside an index entry common to both formats.
pub mod entry_layout {
    /// Previous entry on the index or free list.
    pub const PREV: usize = 0;
    /// Next entry on the index or free list.
    pub const NEXT: usize = 6;
    /// Base node of the entry's versions list.
    pub const VERSIONS: usize = 12;
    /// Transaction that created the entry.
    pub const CREATOR_TRX: usize = 28;
    /// Transaction that last modified the entry.
    pub const MODIFIER_TRX: usize = 34;
    /// Undo record of the creating modification.
    pub const CREATOR_UNDO: usize = 40;
    /// Undo record of the last modification.
    pub const MODIFIER_UNDO: usize = 44;
    /// LOB version the entry was created at.
    pub const LOB_VERSION: usize = 48;
    /// First byte of the format-specific tail.
    pub const TAIL: usize = 52;
}

/// Offsets inside the first page common to both formats.
pub mod first_layout {
    /// Format version byte.
    pub const VERSION: usize = 32;
    /// Flag byte; bit 0 marks a LOB that cannot be partially updated.
    pub const FLAGS: usize = 33;
    /// Current LOB version.
    pub const LOB_VERSION: usize = 34;
    /// Last modifying transaction.
    pub const LAST_TRX: usize = 38;
    /// Undo record of the last modification.
    pub const LAST_UNDO: usize = 44;
    /// Bytes stored inline in the first page.
    pub const DATA_LEN: usize = 48;
    /// Transaction that created the LOB.
    pub const CREATOR_TRX: usize = 52;
}

/// Format version written into every first page.
pub const FIRST_PAGE_FORMAT_VERSION: u8 = 1;

/// First-page flag: the LOB may no longer be partially updated.
pub const FLAG_NOT_PARTIALLY_UPDATABLE: u8 = 0x01;

/// One index entry of either representation.
pub trait IndexEntry: Copy + Eq + fmt::Debug {
    /// Encoded size of the entry.
    const SIZE: usize;

    /// Handle to the entry stored at `addr`.
    fn at(addr: FilAddr) -> Self;
    /// Where the entry is stored.
    fn addr(&self) -> FilAddr;

    /// Base node of the entry's versions list.
    fn versions(&self) -> Result<FilAddr> {
        self.addr().at_offset(entry_layout::VERSIONS)
    }

    /// Page and absolute offset of the field at `off` within the entry.
    fn field(&self, off: usize) -> (PageNo, usize) {
        let addr = self.addr();
        (addr.page, addr.offset() + off)
    }

    /// Stamp of the modification that created the entry.
    fn creator<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<Stamp> {
        let (page, trx) = self.field(entry_layout::CREATOR_TRX);
        let (_, undo) = self.field(entry_layout::CREATOR_UNDO);
        Ok(Stamp::new(TrxId(a.read_u48(page, trx)?), a.read_u32(page, undo)?))
    }

    /// Overwrites the creator stamp.
    fn set_creator<A: PageAccess + ?Sized>(&self, a: &mut A, stamp: Stamp) -> Result<()> {
        let (page, trx) = self.field(entry_layout::CREATOR_TRX);
        let (_, undo) = self.field(entry_layout::CREATOR_UNDO);
        a.write_u48(page, trx, stamp.trx.0)?;
        a.write_u32(page, undo, stamp.undo)
    }

    /// Stamp of the modification that last touched the entry.
    fn modifier<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<Stamp> {
        let (page, trx) = self.field(entry_layout::MODIFIER_TRX);
        let (_, undo) = self.field(entry_layout::MODIFIER_UNDO);
        Ok(Stamp::new(TrxId(a.read_u48(page, trx)?), a.read_u32(page, undo)?))
    }

    /// Overwrites the modifier stamp.
    fn set_modifier<A: PageAccess + ?Sized>(&self, a: &mut A, stamp: Stamp) -> Result<()> {
        let (page, trx) = self.field(entry_layout::MODIFIER_TRX);
        let (_, undo) = self.field(entry_layout::MODIFIER_UNDO);
        a.write_u48(page, trx, stamp.trx.0)?;
        a.write_u32(page, undo, stamp.undo)
    }

    /// LOB version the entry was created at.
    fn lob_version<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<LobVersion> {
        let (page, off) = self.field(entry_layout::LOB_VERSION);
        a.read_u32(page, off)
    }

    /// Overwrites the entry's LOB version.
    fn set_lob_version<A: PageAccess + ?Sized>(&self, a: &mut A, v: LobVersion) -> Result<()> {
        let (page, off) = self.field(entry_layout::LOB_VERSION);
        a.write_u32(page, off, v)
    }

    /// Zeroes the entry and leaves it unlinked with an empty versions list.
    fn reset<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<()> {
        let addr = self.addr();
        a.fill(addr.page, addr.offset(), Self::SIZE, 0)?;
        FilAddr::NULL.write(a, addr.at_offset(entry_layout::PREV)?)?;
        FilAddr::NULL.write(a, addr.at_offset(entry_layout::NEXT)?)?;
        flst::init(a, self.versions()?)?;
        self.clear_location(a)
    }

    /// Uncompressed bytes described by this entry.
    fn data_len<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<u32>;

    /// Page holding the start of the entry's data.
    fn location<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<PageNo>;

    /// Points the entry at nothing.
    fn clear_location<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<()>;

    /// Releases the storage the entry points at. Storage on the first page
    /// itself is never freed here.
    fn free_storage<M: PageAlloc>(&self, m: &mut M, first: PageNo, ctx: OpCtx<'_>) -> Result<()>;
}

/// The first page of either representation.
pub trait LobFirstPage: Copy + fmt::Debug {
    /// Index entry type of this representation.
    type Entry: IndexEntry;
    /// Page kind stamped on the first page.
    const KIND: PageKind;
    /// Representation this first page belongs to.
    const FORMAT: LobFormat;

    /// Handle to the first page `page`.
    fn at(page: PageNo) -> Self;
    /// Page number of the first page.
    fn page(&self) -> PageNo;
    /// Base node of the live index list.
    fn index_list(&self) -> FilAddr;
    /// Base node of the free entry list.
    fn free_list(&self) -> FilAddr;

    /// Format version byte written at creation.
    fn format_version<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<u8> {
        a.read_u8(self.page(), first_layout::VERSION)
    }

    /// Raw flag byte.
    fn flags<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<u8> {
        a.read_u8(self.page(), first_layout::FLAGS)
    }

    /// Whether small changes may still be applied in place.
    fn can_be_partially_updated<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<bool> {
        Ok(self.flags(a)? & FLAG_NOT_PARTIALLY_UPDATABLE == 0)
    }

    /// Clears the partial-update capability. Never reversed.
    fn mark_not_partially_updatable<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<()> {
        let flags = self.flags(a)?;
        if flags & FLAG_NOT_PARTIALLY_UPDATABLE == 0 {
            a.write_u8(
                self.page(),
                first_layout::FLAGS,
                flags | FLAG_NOT_PARTIALLY_UPDATABLE,
            )?;
        }
        Ok(())
    }

    /// Current LOB version.
    fn lob_version<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<LobVersion> {
        a.read_u32(self.page(), first_layout::LOB_VERSION)
    }

    /// Bumps or restores the LOB version.
    fn set_lob_version<A: PageAccess + ?Sized>(&self, a: &mut A, v: LobVersion) -> Result<()> {
        a.write_u32(self.page(), first_layout::LOB_VERSION, v)
    }

    /// Stamp of the last modification to any part of the LOB.
    fn last_modifier<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<Stamp> {
        Ok(Stamp::new(
            TrxId(a.read_u48(self.page(), first_layout::LAST_TRX)?),
            a.read_u32(self.page(), first_layout::LAST_UNDO)?,
        ))
    }

    /// Records `stamp` as the last modification.
    fn set_last_modifier<A: PageAccess + ?Sized>(&self, a: &mut A, stamp: Stamp) -> Result<()> {
        a.write_u48(self.page(), first_layout::LAST_TRX, stamp.trx.0)?;
        a.write_u32(self.page(), first_layout::LAST_UNDO, stamp.undo)
    }

    /// Total uncompressed length of the value.
    fn data_len<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<u32> {
        a.read_u32(self.page(), first_layout::DATA_LEN)
    }

    /// Overwrites the total uncompressed length.
    fn set_data_len<A: PageAccess + ?Sized>(&self, a: &mut A, len: u32) -> Result<()> {
        a.write_u32(self.page(), first_layout::DATA_LEN, len)
    }

    /// Transaction that inserted the LOB.
    fn creator_trx<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<TrxId> {
        Ok(TrxId(a.read_u48(self.page(), first_layout::CREATOR_TRX)?))
    }

    /// Writes the header fields shared by both formats on a fresh page.
    fn init_common<A: PageAccess + ?Sized>(&self, a: &mut A, stamp: Stamp) -> Result<()> {
        let page = self.page();
        a.write_u8(page, first_layout::VERSION, FIRST_PAGE_FORMAT_VERSION)?;
        a.write_u8(page, first_layout::FLAGS, 0)?;
        a.write_u32(page, first_layout::LOB_VERSION, 1)?;
        self.set_last_modifier(a, stamp)?;
        a.write_u32(page, first_layout::DATA_LEN, 0)?;
        a.write_u48(page, first_layout::CREATOR_TRX, stamp.trx.0)
    }

    /// Takes an entry from the free list, growing the index when empty.
    fn alloc_entry<M: PageAlloc>(&self, m: &mut M, ctx: OpCtx<'_>) -> Result<Self::Entry> {
        let node = match flst::pop_first(m, self.free_list())? {
            Some(node) => node,
            None => {
                self.grow_index(m, ctx)?;
                flst::pop_first(m, self.free_list())?
                    .ok_or(crate::types::LobError::Corruption("index page added no entries"))?
            }
        };
        let entry = Self::Entry::at(node);
        entry.reset(m)?;
        Ok(entry)
    }

    /// Resets `entry` and returns it to the free list.
    fn retire_entry<A: PageAccess + ?Sized>(&self, a: &mut A, entry: Self::Entry) -> Result<()> {
        entry.reset(a)?;
        flst::add_last(a, self.free_list(), entry.addr())
    }

    /// Allocates an overflow index page and pushes its slots on the free list.
    fn grow_index<M: PageAlloc>(&self, m: &mut M, ctx: OpCtx<'_>) -> Result<()>;

    /// Every page owned by the LOB except the first page.
    fn owned_pages<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<Vec<PageNo>>;

    /// Returns the first page to the state of an empty LOB, dropping every
    /// reference to other pages. The pages themselves are not freed.
    fn reset_lists<A: PageAccess + ?Sized>(&self, a: &mut A) -> Result<()>;
}

/// Live entries, first to last.
pub fn live_entries<F: LobFirstPage, A: PageAccess + ?Sized>(
    a: &mut A,
    first: F,
) -> Result<Vec<F::Entry>> {
    Ok(flst::collect(a, first.index_list())?
        .into_iter()
        .map(F::Entry::at)
        .collect())
}

/// Older versions of `entry`, newest first.
pub fn versions_of<E: IndexEntry, A: PageAccess + ?Sized>(a: &mut A, entry: E) -> Result<Vec<E>> {
    Ok(flst::collect(a, entry.versions()?)?
        .into_iter()
        .map(E::at)
        .collect())
}

/// Sum of live entry lengths.
pub fn live_data_len<F: LobFirstPage, A: PageAccess + ?Sized>(a: &mut A, first: F) -> Result<u64> {
    let mut total = 0u64;
    for entry in live_entries(a, first)? {
        total += entry.data_len(a)? as u64;
    }
    Ok(total)
}
