use serde::{Deserialize, Serialize};

use crate::types::page;
use crate::types::{LobError, Result};

/// Storage representation chosen for a LOB at insert time.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LobFormat {
    /// Raw bytes in data pages.
    #[default]
    Uncompressed,
    /// Independently deflated chunks in data pages, fragments or inline.
    Compressed,
}

/// Tunables for the LOB engine.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LobOptions {
    /// Representation used by [`super::LobStore::insert`].
    pub format: LobFormat,
    /// Page allocations between mini-transaction restarts.
    pub commit_frequency: u32,
    /// Upper bound, in bytes, for updates applied in place.
    pub small_change_threshold: usize,
    /// zlib compression level, 0..=9.
    pub zlib_level: u32,
    /// Uncompressed bytes per compressed chunk.
    pub zlib_chunk_size: usize,
    /// Scratch buffer used when inflating a sub-range of a chunk.
    pub inflate_scratch_bytes: usize,
    /// Runs the list validator after every operation.
    pub validate: bool,
}

impl Default for LobOptions {
    fn default() -> Self {
        Self {
            format: LobFormat::Uncompressed,
            commit_frequency: 4,
            small_change_threshold: 100,
            zlib_level: 6,
            zlib_chunk_size: 128 * 1024,
            inflate_scratch_bytes: 4096,
            validate: cfg!(debug_assertions),
        }
    }
}

impl LobOptions {
    /// Representation for new LOBs.
    pub fn format(mut self, format: LobFormat) -> Self {
        self.format = format;
        self
    }

    /// Pages allocated per mini-transaction before it restarts.
    pub fn commit_frequency(mut self, pages: u32) -> Self {
        self.commit_frequency = pages;
        self
    }

    /// Largest change applied in place rather than by copy.
    pub fn small_change_threshold(mut self, bytes: usize) -> Self {
        self.small_change_threshold = bytes;
        self
    }

    /// Deflate level, 0 to 9.
    pub fn zlib_level(mut self, level: u32) -> Self {
        self.zlib_level = level;
        self
    }

    /// Uncompressed bytes per compressed chunk.
    pub fn zlib_chunk_size(mut self, bytes: usize) -> Self {
        self.zlib_chunk_size = bytes;
        self
    }

    /// Run structural validation after every operation.
    pub fn validate(mut self, on: bool) -> Self {
        self.validate = on;
        self
    }

    /// Parses options from TOML; missing keys keep their defaults.
    pub fn from_toml_str(src: &str) -> Result<Self> {
        toml::from_str(src).map_err(|err| LobError::Config(err.to_string()))
    }

    /// Renders the options as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|err| LobError::Config(err.to_string()))
    }

    /// Checks the options against the page size they will be used with.
    pub fn validate_for_page_size(&self, page_size: u32) -> Result<()> {
        if !(page::MIN_PAGE_SIZE..=page::MAX_PAGE_SIZE).contains(&page_size) {
            return Err(LobError::Config(format!("unsupported page size {page_size}")));
        }
        if self.commit_frequency == 0 {
            return Err(LobError::Config("commit_frequency must be at least 1".into()));
        }
        if self.zlib_level > 9 {
            return Err(LobError::Config(format!(
                "zlib_level {} outside 0..=9",
                self.zlib_level
            )));
        }
        if self.zlib_chunk_size == 0 || self.zlib_chunk_size > u32::MAX as usize {
            return Err(LobError::Config("zlib_chunk_size out of range".into()));
        }
        if self.inflate_scratch_bytes == 0 {
            return Err(LobError::Config("inflate_scratch_bytes must be positive".into()));
        }
        if self.small_change_threshold >= page_size as usize {
            return Err(LobError::Config(
                "small_change_threshold must be below the page size".into(),
            ));
        }
        Ok(())
    }
}
