use std::fmt;

use crate::primitives::bytes::be;
use crate::primitives::mtr::PageAccess;
use crate::types::page::PAGE_HDR_LEN;
use crate::types::{LobError, PageNo, Result};

/// Location of a list node or index entry: page number plus byte offset.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct FilAddr {
    /// Page holding the addressed bytes; `PageNo::NULL` for no address.
    pub page: PageNo,
    /// Byte offset within the page.
    pub boffset: u16,
}

impl FilAddr {
    /// Points nowhere.
    pub const NULL: FilAddr = FilAddr {
        page: PageNo::NULL,
        boffset: 0,
    };

    /// Encoded size in bytes.
    pub const LEN: usize = 6;

    /// Fails if the offset does not fit or lands in the page header.
    pub fn new(page: PageNo, boffset: usize) -> Result<Self> {
        let boffset =
            u16::try_from(boffset).map_err(|_| LobError::Invalid("file address offset overflow"))?;
        let addr = FilAddr { page, boffset };
        addr.check()?;
        Ok(addr)
    }

    /// Whether this is [`FilAddr::NULL`].
    pub const fn is_null(self) -> bool {
        self.page.is_null()
    }

    /// The same page at a different byte offset.
    pub fn at_offset(self, delta: usize) -> Result<Self> {
        FilAddr::new(self.page, self.boffset as usize + delta)
    }

    /// Byte offset as a `usize`.
    pub fn offset(self) -> usize {
        self.boffset as usize
    }

    fn check(self) -> Result<()> {
        if !self.is_null() && (self.boffset as usize) < PAGE_HDR_LEN {
            return Err(LobError::Corruption("file address points into page header"));
        }
        Ok(())
    }

    /// Big-endian page number followed by the offset.
    pub fn encode(self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[..4].copy_from_slice(&self.page.0.to_be_bytes());
        out[4..].copy_from_slice(&self.boffset.to_be_bytes());
        out
    }

    /// Decodes six bytes. A null page decodes to [`FilAddr::NULL`] whatever the offset.
    pub fn decode(src: &[u8]) -> Result<Self> {
        let page = PageNo(be::get_u32(src, 0)?);
        if page.is_null() {
            return Ok(FilAddr::NULL);
        }
        let addr = FilAddr {
            page,
            boffset: be::get_u16(src, 4)?,
        };
        addr.check()?;
        Ok(addr)
    }

    /// Reads an address stored at `field`.
    pub fn read<A: PageAccess + ?Sized>(a: &mut A, field: FilAddr) -> Result<Self> {
        let mut raw = [0u8; Self::LEN];
        a.read_into(field.page, field.offset(), &mut raw)?;
        Self::decode(&raw)
    }

    /// Stores `self` at `field`.
    pub fn write<A: PageAccess + ?Sized>(self, a: &mut A, field: FilAddr) -> Result<()> {
        a.write_bytes(field.page, field.offset(), &self.encode())
    }
}

impl Default for FilAddr {
    fn default() -> Self {
        FilAddr::NULL
    }
}

impl fmt::Debug for FilAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("FilAddr(null)")
        } else {
            write!(f, "FilAddr({}:{})", self.page.0, self.boffset)
        }
    }
}
