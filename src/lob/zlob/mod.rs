//! Compressed LOB representation.
//!
//! The value is cut into chunks of `zlib_chunk_size` bytes and each chunk is
//! deflated as its own zlib stream. A stream lives inline on the first page
//! (chunk 0 of a fresh LOB only), in a fragment of a shared fragment page
//! when it is small, or across a chain of data pages.

pub mod codec;
pub mod data_page;
/// First page of a compressed LOB.
pub mod first_page;
pub(crate) mod frag;
pub mod frag_entry;
pub mod frag_page;
/// Index entries of compressed LOBs.
pub mod index_entry;
pub(crate) mod insert;
pub(crate) mod read;
pub(crate) mod stream;
pub(crate) mod update;

pub use first_page::ZFirstPage;
pub use frag_entry::FragEntry;
pub use frag_page::{FragPage, FragStats, Fragment};
pub use index_entry::ZEntry;
