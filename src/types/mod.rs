#![forbid(unsafe_code)]
//! Identifiers, errors and on-page metadata shared by every layer.

use std::fmt;

mod checksum;

pub use checksum::{page_crc32, Checksum, Crc32Fast};

/// Sentinel page number meaning "no page".
pub const FIL_NULL: u32 = 0xFFFF_FFFF;

/// Page number within a tablespace.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PageNo(pub u32);

impl PageNo {
    /// The null page number.
    pub const NULL: PageNo = PageNo(FIL_NULL);

    /// Returns `true` for [`PageNo::NULL`].
    pub const fn is_null(self) -> bool {
        self.0 == FIL_NULL
    }
}

impl Default for PageNo {
    fn default() -> Self {
        PageNo::NULL
    }
}

impl fmt::Display for PageNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("null")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Tablespace identifier carried by LOB references.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct SpaceId(pub u32);

/// Log sequence number assigned to committed redo batches.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct Lsn(pub u64);

/// Transaction identifier. Persisted as 6 bytes on page.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct TrxId(pub u64);

impl TrxId {
    /// Largest transaction id representable in the 6-byte on-page field.
    pub const MAX: TrxId = TrxId((1 << 48) - 1);
}

impl fmt::Display for TrxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-transaction undo sequence number.
pub type UndoNo = u32;

/// LOB version stamp. Incremented by every copy-on-write modification.
pub type LobVersion = u32;

/// Fragment identifier inside a fragment page (directory slot index).
pub type FragId = u16;

/// Fragment id meaning "not stored in a fragment".
pub const FRAG_ID_NULL: FragId = 0xFFFF;

/// Errors surfaced by the LOB engine and its collaborators.
#[derive(thiserror::Error, Debug)]
pub enum LobError {
    /// I/O failure reported by a codec or collaborator.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// A page or extent could not be allocated.
    #[error("out of space")]
    OutOfSpace,
    /// On-page data violates a format or consistency invariant.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// The caller passed arguments the engine cannot act on.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// The zlib codec rejected a stream.
    #[error("codec: {0}")]
    Codec(String),
    /// Configuration could not be parsed or is out of range.
    #[error("config: {0}")]
    Config(String),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, LobError>;

pub mod page {
    //! Fixed page header shared by every page the engine writes.

    use core::convert::TryFrom;

    use super::{LobError, Lsn, PageNo, Result, SpaceId};
    use crate::primitives::bytes::be;

    /// Magic at the start of every page.
    pub const PAGE_MAGIC: [u8; 4] = *b"SLOB";
    /// Header format version.
    pub const PAGE_FORMAT_VERSION: u16 = 1;
    /// Page size used when none is configured.
    pub const DEFAULT_PAGE_SIZE: u32 = 16384;
    /// Smallest supported page size.
    pub const MIN_PAGE_SIZE: u32 = 4096;
    /// Largest supported page size.
    pub const MAX_PAGE_SIZE: u32 = 32768;
    /// Bytes taken by the header; page structures start here.
    pub const PAGE_HDR_LEN: usize = 32;

    pub mod header {
        //! Byte offsets for fixed header fields.
        use core::ops::Range;

        /// [`PAGE_MAGIC`](super::PAGE_MAGIC).
        pub const MAGIC: Range<usize> = 0..4;
        /// Header format version.
        pub const FORMAT_VERSION: Range<usize> = 4..6;
        /// [`PageKind`](super::PageKind) byte.
        pub const PAGE_KIND: usize = 6;
        /// Always zero.
        pub const RESERVED: usize = 7;
        /// Page size the page was written with.
        pub const PAGE_SIZE: Range<usize> = 8..12;
        /// The page's own number.
        pub const PAGE_NO: Range<usize> = 12..16;
        /// Tablespace id.
        pub const SPACE_ID: Range<usize> = 16..20;
        /// LSN of the last commit that modified the page.
        pub const LSN: Range<usize> = 20..28;
        /// CRC-32 over the page with this field zeroed.
        pub const CRC32: Range<usize> = 28..32;
    }

    /// Kind of page, stored in the header.
    #[repr(u8)]
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
    pub enum PageKind {
        /// Uncompressed LOB first page.
        LobFirst = 1,
        /// Uncompressed LOB data page.
        LobData = 2,
        /// Overflow page of uncompressed index entries.
        LobIndex = 3,
        /// Compressed LOB first page.
        ZlobFirst = 4,
        /// Compressed LOB data page.
        ZlobData = 5,
        /// Overflow page of compressed index entries.
        ZlobIndex = 6,
        /// Fragment page holding small compressed streams.
        ZlobFrag = 7,
        /// Overflow page of fragment entries.
        ZlobFragEntry = 8,
    }

    impl PageKind {
        /// Byte stored in the header.
        pub const fn as_u8(self) -> u8 {
            self as u8
        }
    }

    impl TryFrom<u8> for PageKind {
        type Error = LobError;

        fn try_from(value: u8) -> Result<Self> {
            match value {
                1 => Ok(PageKind::LobFirst),
                2 => Ok(PageKind::LobData),
                3 => Ok(PageKind::LobIndex),
                4 => Ok(PageKind::ZlobFirst),
                5 => Ok(PageKind::ZlobData),
                6 => Ok(PageKind::ZlobIndex),
                7 => Ok(PageKind::ZlobFrag),
                8 => Ok(PageKind::ZlobFragEntry),
                _ => Err(LobError::Corruption("unknown page kind")),
            }
        }
    }

    /// Decoded page header.
    #[derive(Clone, Debug, Eq, PartialEq)]
    pub struct PageHeader {
        /// Header format version.
        pub format_version: u16,
        /// What the page holds.
        pub kind: PageKind,
        /// Page size in bytes.
        pub page_size: u32,
        /// Page number.
        pub page_no: PageNo,
        /// Tablespace id.
        pub space_id: SpaceId,
        /// LSN of the last modifying commit.
        pub lsn: Lsn,
        /// Stored checksum.
        pub crc32: u32,
    }

    impl PageHeader {
        /// Header for a freshly allocated page, LSN and checksum zero.
        pub fn new(page_no: PageNo, kind: PageKind, page_size: u32, space_id: SpaceId) -> Result<Self> {
            if (page_size as usize) < PAGE_HDR_LEN {
                return Err(LobError::Invalid("page size smaller than header"));
            }
            Ok(Self {
                format_version: PAGE_FORMAT_VERSION,
                kind,
                page_size,
                page_no,
                space_id,
                lsn: Lsn(0),
                crc32: 0,
            })
        }

        /// Writes the header into the first [`PAGE_HDR_LEN`] bytes of `dst`.
        pub fn encode(&self, dst: &mut [u8]) -> Result<()> {
            if dst.len() < PAGE_HDR_LEN {
                return Err(LobError::Invalid("page header buffer too small"));
            }
            let hdr = &mut dst[..PAGE_HDR_LEN];
            hdr[header::MAGIC].copy_from_slice(&PAGE_MAGIC);
            hdr[header::FORMAT_VERSION].copy_from_slice(&self.format_version.to_be_bytes());
            hdr[header::PAGE_KIND] = self.kind.as_u8();
            hdr[header::RESERVED] = 0;
            hdr[header::PAGE_SIZE].copy_from_slice(&self.page_size.to_be_bytes());
            hdr[header::PAGE_NO].copy_from_slice(&self.page_no.0.to_be_bytes());
            hdr[header::SPACE_ID].copy_from_slice(&self.space_id.0.to_be_bytes());
            hdr[header::LSN].copy_from_slice(&self.lsn.0.to_be_bytes());
            hdr[header::CRC32].copy_from_slice(&self.crc32.to_be_bytes());
            Ok(())
        }

        /// Parses and checks magic, version, reserved byte and kind.
        pub fn decode(src: &[u8]) -> Result<Self> {
            if src.len() < PAGE_HDR_LEN {
                return Err(LobError::Corruption("page header truncated"));
            }
            let hdr = &src[..PAGE_HDR_LEN];
            if hdr[header::MAGIC] != PAGE_MAGIC {
                return Err(LobError::Corruption("invalid page magic"));
            }
            let format_version = be::get_u16(hdr, header::FORMAT_VERSION.start)?;
            if format_version != PAGE_FORMAT_VERSION {
                return Err(LobError::Corruption("unsupported page format version"));
            }
            if hdr[header::RESERVED] != 0 {
                return Err(LobError::Corruption("page header reserved byte not zero"));
            }
            let kind = PageKind::try_from(hdr[header::PAGE_KIND])?;
            let page_size = be::get_u32(hdr, header::PAGE_SIZE.start)?;
            if (page_size as usize) < PAGE_HDR_LEN {
                return Err(LobError::Corruption("page size smaller than header"));
            }
            Ok(Self {
                format_version,
                kind,
                page_size,
                page_no: PageNo(be::get_u32(hdr, header::PAGE_NO.start)?),
                space_id: SpaceId(be::get_u32(hdr, header::SPACE_ID.start)?),
                lsn: Lsn(be::get_u64(hdr, header::LSN.start)?),
                crc32: be::get_u32(hdr, header::CRC32.start)?,
            })
        }
    }

    /// Reads only the page kind byte, validating the magic first.
    pub fn peek_kind(src: &[u8]) -> Result<PageKind> {
        if src.len() < PAGE_HDR_LEN || src[header::MAGIC] != PAGE_MAGIC {
            return Err(LobError::Corruption("invalid page magic"));
        }
        PageKind::try_from(src[header::PAGE_KIND])
    }

    /// Zeroes the checksum field before the checksum is computed.
    pub fn clear_crc32(buf: &mut [u8]) -> Result<()> {
        if buf.len() < header::CRC32.end {
            return Err(LobError::Invalid("page header buffer too small"));
        }
        buf[header::CRC32].fill(0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{page, page::PageHeader, page::PageKind, Lsn, PageNo, SpaceId};
    use std::convert::TryFrom;

    #[test]
    fn page_header_roundtrip() {
        let mut buf = [0u8; page::PAGE_HDR_LEN];
        let mut header = PageHeader::new(
            PageNo(42),
            PageKind::ZlobFrag,
            page::DEFAULT_PAGE_SIZE,
            SpaceId(7),
        )
        .unwrap();
        header.lsn = Lsn(99);
        header.crc32 = 0xDEADBEEF;
        header.encode(&mut buf).unwrap();
        let decoded = PageHeader::decode(&buf).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(page::peek_kind(&buf).unwrap(), PageKind::ZlobFrag);
    }

    #[test]
    fn clear_crc32_zeroes_field() {
        let mut buf = [0xFFu8; page::PAGE_HDR_LEN];
        page::clear_crc32(&mut buf).unwrap();
        assert!(buf[page::header::CRC32].iter().all(|&b| b == 0));
    }

    #[test]
    fn page_kind_from_u8_rejects_unknown() {
        assert!(PageKind::try_from(0).is_err());
        assert!(PageKind::try_from(9).is_err());
    }

    #[test]
    fn null_page_no_displays_as_null() {
        assert!(PageNo::NULL.is_null());
        assert!(!PageNo(0).is_null());
        assert_eq!(PageNo::NULL.to_string(), "null");
    }
}
