#![forbid(unsafe_code)]
//! Bounds-checked big-endian accessors, varints and a parsing cursor.

pub mod be {
    //! Fixed-width big-endian integers read from and written to byte slices.
    //!
    //! Every accessor checks bounds and reports [`LobError::Corruption`] on
    //! reads or [`LobError::Invalid`] on writes that fall outside the slice.

    use crate::types::{LobError, Result};

    fn span(len: usize, off: usize, width: usize) -> Option<core::ops::Range<usize>> {
        let end = off.checked_add(width)?;
        (end <= len).then_some(off..end)
    }

    fn read<const N: usize>(src: &[u8], off: usize) -> Result<[u8; N]> {
        let range = span(src.len(), off, N).ok_or(LobError::Corruption("read past end of page"))?;
        let mut out = [0u8; N];
        out.copy_from_slice(&src[range]);
        Ok(out)
    }

    fn write(dst: &mut [u8], off: usize, bytes: &[u8]) -> Result<()> {
        let range = span(dst.len(), off, bytes.len())
            .ok_or(LobError::Invalid("write past end of page"))?;
        dst[range].copy_from_slice(bytes);
        Ok(())
    }

    /// Reads the byte at `off`.
    pub fn get_u8(src: &[u8], off: usize) -> Result<u8> {
        Ok(read::<1>(src, off)?[0])
    }

    /// Reads a `u16` at `off`.
    pub fn get_u16(src: &[u8], off: usize) -> Result<u16> {
        Ok(u16::from_be_bytes(read(src, off)?))
    }

    /// Reads a `u32` at `off`.
    pub fn get_u32(src: &[u8], off: usize) -> Result<u32> {
        Ok(u32::from_be_bytes(read(src, off)?))
    }

    /// Reads a 6-byte unsigned integer (transaction ids).
    pub fn get_u48(src: &[u8], off: usize) -> Result<u64> {
        let raw: [u8; 6] = read(src, off)?;
        let mut wide = [0u8; 8];
        wide[2..].copy_from_slice(&raw);
        Ok(u64::from_be_bytes(wide))
    }

    /// Reads a `u64` at `off`.
    pub fn get_u64(src: &[u8], off: usize) -> Result<u64> {
        Ok(u64::from_be_bytes(read(src, off)?))
    }

    /// Writes `v` at `off`.
    pub fn put_u8(dst: &mut [u8], off: usize, v: u8) -> Result<()> {
        write(dst, off, &[v])
    }

    /// Writes `v` at `off`.
    pub fn put_u16(dst: &mut [u8], off: usize, v: u16) -> Result<()> {
        write(dst, off, &v.to_be_bytes())
    }

    /// Writes `v` at `off`.
    pub fn put_u32(dst: &mut [u8], off: usize, v: u32) -> Result<()> {
        write(dst, off, &v.to_be_bytes())
    }

    /// Writes the low 48 bits of `v`. Higher bits must be zero.
    pub fn put_u48(dst: &mut [u8], off: usize, v: u64) -> Result<()> {
        if v >> 48 != 0 {
            return Err(LobError::Invalid("value does not fit in 6 bytes"));
        }
        write(dst, off, &v.to_be_bytes()[2..])
    }

    /// Writes `v` at `off`.
    pub fn put_u64(dst: &mut [u8], off: usize, v: u64) -> Result<()> {
        write(dst, off, &v.to_be_bytes())
    }

    /// Encodes a 6-byte integer into a fresh array.
    pub fn u48_bytes(v: u64) -> [u8; 6] {
        let mut out = [0u8; 6];
        out.copy_from_slice(&v.to_be_bytes()[2..]);
        out
    }
}

pub mod var {
    //! Unsigned varints used by the redo record encoding.

    use crate::types::{LobError, Result};

    /// Encodes a u64 as an unsigned varint.
    pub fn encode_u64(mut v: u64, out: &mut Vec<u8>) {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                out.push(byte);
                break;
            }
            out.push(byte | 0x80);
        }
    }

    /// Decodes a u64 varint from a slice, updating the offset.
    pub fn decode_u64(src: &[u8], off: &mut usize) -> Result<u64> {
        let mut result = 0u64;
        let mut shift = 0u32;
        for i in 0..10 {
            let byte = *src
                .get(*off)
                .ok_or(LobError::Corruption("varint decode truncated"))?;
            *off += 1;
            let payload = (byte & 0x7f) as u64;
            if i == 9 && payload > 1 {
                return Err(LobError::Corruption("varint overflow"));
            }
            result |= payload << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
        Err(LobError::Corruption("varint too long"))
    }
}

pub mod buf {
    //! A simple slice-backed cursor for ergonomic parsing.

    use core::fmt;

    use super::var;
    use crate::types::{LobError, Result};

    /// A cursor for reading bytes from a slice with offset tracking.
    pub struct Cursor<'a> {
        buf: &'a [u8],
        off: usize,
    }

    impl<'a> Cursor<'a> {
        /// Creates a new cursor starting at offset 0.
        pub fn new(buf: &'a [u8]) -> Self {
            Self { buf, off: 0 }
        }

        /// Takes the next `n` bytes from the cursor, advancing the offset.
        pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
            let end = self
                .off
                .checked_add(n)
                .filter(|end| *end <= self.buf.len())
                .ok_or(LobError::Corruption("cursor take beyond buffer"))?;
            let slice = &self.buf[self.off..end];
            self.off = end;
            Ok(slice)
        }

        /// Takes one byte.
        pub fn u8(&mut self) -> Result<u8> {
            Ok(self.take(1)?[0])
        }

        /// Takes an unsigned varint.
        pub fn varint(&mut self) -> Result<u64> {
            var::decode_u64(self.buf, &mut self.off)
        }

        /// Returns the number of bytes remaining in the buffer.
        pub fn remaining(&self) -> usize {
            self.buf.len().saturating_sub(self.off)
        }
    }

    impl<'a> fmt::Debug for Cursor<'a> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Cursor")
                .field("off", &self.off)
                .field("remaining", &self.remaining())
                .finish()
        }
    }
}
