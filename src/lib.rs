//! Sombra LOB storage engine.
//!
//! Stores values too large for a record on pages of their own, in an
//! uncompressed or a zlib-compressed representation, with multi-version
//! reads, partial updates, rollback, purge and a bulk loading path. All
//! page access goes through latched, redo-logged mini-transactions over a
//! [`primitives::pager::PageStore`].

#![warn(missing_docs)]

pub mod lob;
pub mod primitives;
pub mod types;

pub use lob::{
    LobDiff, LobFormat, LobInfo, LobOptions, LobRef, LobStore, LobUndo, ReadContext, Stamp,
    UndoKind, UpdateOutcome,
};
pub use primitives::pager::{PageStore, Pager, PagerOptions};
pub use types::{LobError, LobVersion, PageNo, Result, SpaceId, TrxId, UndoNo};
