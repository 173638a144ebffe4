use parking_lot::RwLock;
use std::sync::Arc;

/// Page buffer shared between the pager and the latches held by a [`crate::primitives::mtr::Mtr`].
pub type FrameBuf = Arc<RwLock<Box<[u8]>>>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FrameState {
    Live,
    Free,
}

pub struct Frame {
    pub buf: FrameBuf,
    pub state: FrameState,
}

impl Frame {
    pub fn new(page_size: usize) -> Self {
        Self {
            buf: Arc::new(RwLock::new(vec![0u8; page_size].into_boxed_slice())),
            state: FrameState::Live,
        }
    }

    /// Marks the frame live again behind a fresh zeroed buffer. Latches still
    /// held on the previous buffer keep the stale image.
    pub fn recycle(&mut self, page_size: usize) {
        self.buf = Arc::new(RwLock::new(vec![0u8; page_size].into_boxed_slice()));
        self.state = FrameState::Live;
    }
}
