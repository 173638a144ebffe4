//! Off-page storage for large values.
//!
//! A value too large for its record is stored as a LOB: a first page holding
//! the header and an index of chunks, plus data pages for the bytes. Records
//! keep a 20-byte [`LobRef`] pointing at the first page. Two representations
//! exist, chosen by [`LobOptions::format`] at insert time:
//!
//! * uncompressed, where each index entry points at one data page;
//! * compressed (see [`zlob`]), where each entry holds a zlib stream that
//!   lives inline, in a shared fragment page, or across a page chain.
//!
//! Index entries keep older images of their chunk on a versions list so that
//! readers bound to an older LOB version, rollback and purge all work on the
//! same structure. Everything is reached through [`LobStore`].

/// File addresses: page number plus byte offset.
pub mod addr;
pub mod bulk;
pub mod data_page;
pub mod entry;
pub mod first_page;
pub mod flst;
pub mod index_entry;
pub mod index_page;
pub(crate) mod insert;
pub mod lob_ref;
/// Operation counters.
pub mod metrics;
/// Engine options and their TOML form.
pub mod options;
pub mod plist;
pub(crate) mod purge;
pub mod read;
pub(crate) mod rollback;
pub mod store;
pub mod undo;
pub mod update;
pub mod validate;
pub mod version;
pub mod zlob;

pub use addr::FilAddr;
pub use bulk::{BulkLoader, BulkLoaderStats};
pub use entry::Stamp;
pub use lob_ref::LobRef;
pub use metrics::{LobMetrics, LobMetricsSnapshot};
pub use options::{LobFormat, LobOptions};
pub use read::ReadContext;
pub use store::{LobInfo, LobStore};
pub use undo::{LobUndo, UndoKind, UpdateOutcome};
pub use update::LobDiff;
pub use validate::{ListValidator, LobReport, ValidationHook};
