#![forbid(unsafe_code)]
//! The 20-byte LOB reference stored in the owning row.

use std::ops::Range;

use crate::primitives::bytes::be;
use crate::types::page::PAGE_HDR_LEN;
use crate::types::{LobError, PageNo, Result, SpaceId};

/// Encoded size of a reference.
pub const LOB_REF_LEN: usize = 20;
/// Version byte written by [`LobRef::encode`].
pub const LOB_REF_FORMAT_VERSION: u8 = 1;

/// Offset of the LOB header inside the first page.
pub const LOB_HDR_OFFSET: u32 = PAGE_HDR_LEN as u32;

/// Byte positions inside an encoded reference.
pub mod layout {
    use super::Range;

    /// Tablespace of the first page.
    pub const SPACE_ID: Range<usize> = 0..4;
    /// First page number.
    pub const PAGE_NO: Range<usize> = 4..8;
    /// Offset of the LOB header in the first page.
    pub const OFFSET: Range<usize> = 8..12;
    /// Value length in bytes.
    pub const LENGTH: Range<usize> = 12..16;
    /// Flag byte.
    pub const FLAGS: usize = 16;
    /// Format version byte.
    pub const VERSION: usize = 17;
    /// Zero, preserved verbatim.
    pub const RESERVED: Range<usize> = 18..20;
}

/// The record owns the LOB and may free it.
pub const FLAG_OWNER: u8 = 0x80;
/// The reference was copied from an older record version.
pub const FLAG_INHERITED: u8 = 0x40;
/// An update of the LOB is in progress.
pub const FLAG_BEING_MODIFIED: u8 = 0x20;

/// Reference from a row to its externally stored value.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LobRef {
    /// Tablespace holding the LOB.
    pub space_id: SpaceId,
    /// First page, or `PageNo::NULL` once purged.
    pub page_no: PageNo,
    /// Always [`LOB_HDR_OFFSET`] for references this crate writes.
    pub offset: u32,
    /// Value length; 0 marks a partially deleted LOB.
    pub length: u32,
    /// `FLAG_*` bits.
    pub flags: u8,
    /// Reference format version.
    pub version: u8,
    reserved: [u8; 2],
}

impl LobRef {
    /// A freshly owned reference to the LOB whose first page is `page_no`.
    pub fn new(space_id: SpaceId, page_no: PageNo, length: u32) -> Self {
        Self {
            space_id,
            page_no,
            offset: LOB_HDR_OFFSET,
            length,
            flags: FLAG_OWNER,
            version: LOB_REF_FORMAT_VERSION,
            reserved: [0; 2],
        }
    }

    /// The 20-byte on-record form.
    pub fn encode(&self) -> [u8; LOB_REF_LEN] {
        let mut out = [0u8; LOB_REF_LEN];
        out[layout::SPACE_ID].copy_from_slice(&self.space_id.0.to_be_bytes());
        out[layout::PAGE_NO].copy_from_slice(&self.page_no.0.to_be_bytes());
        out[layout::OFFSET].copy_from_slice(&self.offset.to_be_bytes());
        out[layout::LENGTH].copy_from_slice(&self.length.to_be_bytes());
        out[layout::FLAGS] = self.flags;
        out[layout::VERSION] = self.version;
        out[layout::RESERVED].copy_from_slice(&self.reserved);
        out
    }

    /// Rejects a wrong length or an unknown format version.
    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() != LOB_REF_LEN {
            return Err(LobError::Corruption("lob reference has wrong length"));
        }
        let version = src[layout::VERSION];
        if version != LOB_REF_FORMAT_VERSION {
            return Err(LobError::Corruption("unsupported lob reference version"));
        }
        let mut reserved = [0u8; 2];
        reserved.copy_from_slice(&src[layout::RESERVED]);
        Ok(Self {
            space_id: SpaceId(be::get_u32(src, layout::SPACE_ID.start)?),
            page_no: PageNo(be::get_u32(src, layout::PAGE_NO.start)?),
            offset: be::get_u32(src, layout::OFFSET.start)?,
            length: be::get_u32(src, layout::LENGTH.start)?,
            flags: src[layout::FLAGS],
            version,
            reserved,
        })
    }

    /// Fully purged: the first page has been released.
    pub fn is_null(&self) -> bool {
        self.page_no.is_null()
    }

    /// See [`FLAG_OWNER`].
    pub fn is_owner(&self) -> bool {
        self.flags & FLAG_OWNER != 0
    }

    /// See [`FLAG_INHERITED`].
    pub fn is_inherited(&self) -> bool {
        self.flags & FLAG_INHERITED != 0
    }

    /// See [`FLAG_BEING_MODIFIED`].
    pub fn is_being_modified(&self) -> bool {
        self.flags & FLAG_BEING_MODIFIED != 0
    }

    fn set_flag(&mut self, flag: u8, on: bool) {
        if on {
            self.flags |= flag;
        } else {
            self.flags &= !flag;
        }
    }

    /// Sets or clears [`FLAG_OWNER`].
    pub fn set_owner(&mut self, on: bool) {
        self.set_flag(FLAG_OWNER, on);
    }

    /// Sets or clears [`FLAG_INHERITED`].
    pub fn set_inherited(&mut self, on: bool) {
        self.set_flag(FLAG_INHERITED, on);
    }

    /// Sets or clears [`FLAG_BEING_MODIFIED`].
    pub fn set_being_modified(&mut self, on: bool) {
        self.set_flag(FLAG_BEING_MODIFIED, on);
    }

    /// Length 0 on a non-null reference marks a partially deleted LOB.
    pub fn is_partially_deleted(&self) -> bool {
        !self.is_null() && self.length == 0
    }

    /// A non-owning copy of this reference, as handed to a row version that
    /// shares the stored value.
    pub fn inherited_copy(&self) -> Self {
        let mut copy = *self;
        copy.set_owner(false);
        copy.set_inherited(true);
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_bit_exact() {
        let mut r = LobRef::new(SpaceId(0x0102_0304), PageNo(0x0A0B_0C0D), 50_000);
        r.set_being_modified(true);
        let raw = r.encode();
        assert_eq!(&raw[0..4], &[1, 2, 3, 4]);
        assert_eq!(&raw[4..8], &[0x0A, 0x0B, 0x0C, 0x0D]);
        assert_eq!(&raw[8..12], &32u32.to_be_bytes());
        assert_eq!(&raw[12..16], &50_000u32.to_be_bytes());
        assert_eq!(raw[16], FLAG_OWNER | FLAG_BEING_MODIFIED);
        assert_eq!(raw[17], LOB_REF_FORMAT_VERSION);
        assert_eq!(&raw[18..20], &[0, 0]);
    }

    #[test]
    fn reserved_bytes_survive_roundtrip() {
        let mut raw = LobRef::new(SpaceId(9), PageNo(4), 7).encode();
        raw[18] = 0xAA;
        raw[19] = 0x55;
        let decoded = LobRef::decode(&raw).unwrap();
        assert_eq!(decoded.encode(), raw);
    }

    #[test]
    fn flags_and_markers() {
        let r = LobRef::new(SpaceId(0), PageNo(1), 10);
        assert!(r.is_owner());
        let copy = r.inherited_copy();
        assert!(!copy.is_owner());
        assert!(copy.is_inherited());
        let mut gone = r;
        gone.length = 0;
        assert!(gone.is_partially_deleted());
        gone.page_no = PageNo::NULL;
        assert!(gone.is_null());
        assert!(!gone.is_partially_deleted());
    }

    #[test]
    fn rejects_unknown_version() {
        let mut raw = LobRef::new(SpaceId(0), PageNo(1), 10).encode();
        raw[17] = 2;
        assert!(LobRef::decode(&raw).is_err());
    }
}
