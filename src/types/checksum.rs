#![forbid(unsafe_code)]
//! Page checksums.

/// Incremental checksum over byte slices.
pub trait Checksum {
    /// Starts over.
    fn reset(&mut self);
    /// Feeds `bytes`.
    fn update(&mut self, bytes: &[u8]);
    /// Checksum of everything fed since the last reset.
    fn finalize(&self) -> u32;
}

/// [`Checksum`] backed by `crc32fast`.
pub struct Crc32Fast {
    inner: crc32fast::Hasher,
}

impl Default for Crc32Fast {
    fn default() -> Self {
        Self {
            inner: crc32fast::Hasher::new(),
        }
    }
}

impl Checksum for Crc32Fast {
    fn reset(&mut self) {
        self.inner.reset();
    }

    fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    fn finalize(&self) -> u32 {
        self.inner.clone().finalize()
    }
}

/// CRC32 of a page image, salted with its page number and space id.
///
/// The caller is expected to zero the header CRC field before hashing.
pub fn page_crc32(page_no: u32, space_id: u32, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&page_no.to_be_bytes());
    hasher.update(&space_id.to_be_bytes());
    hasher.update(payload);
    hasher.finalize()
}
