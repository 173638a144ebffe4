#![forbid(unsafe_code)]

mod frame;
mod freelist;
mod pager;

pub use frame::FrameBuf;
pub use freelist::{Extent, FreeCache};
pub use pager::{PageStore, Pager, PagerOptions, PagerStats};
