use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::types::PageNo;

/// Run of consecutive free pages.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Extent {
    /// First page of the run.
    pub start: PageNo,
    /// Pages in the run.
    pub len: u32,
}

impl Extent {
    /// Run of `len` pages starting at `start`.
    pub fn new(start: PageNo, len: u32) -> Self {
        Self { start, len }
    }

    /// Absorbs `other` when it starts right after this run. Returns whether
    /// it did.
    pub fn coalesce_with(&mut self, other: &Extent) -> bool {
        if self.start.0 as u64 + self.len as u64 == other.start.0 as u64 {
            self.len += other.len;
            true
        } else {
            false
        }
    }

    /// Whether `page` lies in the run.
    pub fn contains(&self, page: PageNo) -> bool {
        page.0 >= self.start.0 && (page.0 as u64) < self.start.0 as u64 + self.len as u64
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct HeapExtent {
    start: PageNo,
    len: u32,
}

impl Ord for HeapExtent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.len
            .cmp(&other.len)
            .then_with(|| other.start.0.cmp(&self.start.0))
    }
}

impl PartialOrd for HeapExtent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<Extent> for HeapExtent {
    fn from(extent: Extent) -> Self {
        HeapExtent {
            start: extent.start,
            len: extent.len,
        }
    }
}

/// In-memory cache of free pages, kept as coalesced extents.
///
/// `pop` serves the largest extent first so consecutive allocations stay
/// physically adjacent; `take` honours an allocation hint.
#[derive(Clone, Default, Debug)]
pub struct FreeCache {
    extents: Vec<Extent>,
    heap: BinaryHeap<HeapExtent>,
}

impl FreeCache {
    /// Cached runs in ascending page order.
    pub fn extents(&self) -> &[Extent] {
        &self.extents
    }

    /// Total free pages.
    pub fn len(&self) -> u64 {
        self.extents.iter().map(|e| e.len as u64).sum()
    }

    /// Whether no page is free.
    pub fn is_empty(&self) -> bool {
        self.extents.is_empty()
    }

    /// Whether `page` is cached as free.
    pub fn contains(&self, page: PageNo) -> bool {
        self.position(page).is_some()
    }

    /// Takes the first page of the largest run.
    pub fn pop(&mut self) -> Option<PageNo> {
        let top = *self.heap.peek()?;
        let page = top.start;
        let removed = self.take(page);
        debug_assert!(removed, "heap and extent list out of sync");
        Some(page)
    }

    /// Removes `page` from the cache if it is free.
    pub fn take(&mut self, page: PageNo) -> bool {
        let Some(pos) = self.position(page) else {
            return false;
        };
        let extent = self.extents[pos];
        let head = page.0 - extent.start.0;
        let tail = extent.len - head - 1;
        self.extents.remove(pos);
        if tail > 0 {
            self.extents
                .insert(pos, Extent::new(PageNo(page.0 + 1), tail));
        }
        if head > 0 {
            self.extents.insert(pos, Extent::new(extent.start, head));
        }
        self.rebuild_heap();
        true
    }

    /// Returns `page` to the cache, merging it into adjacent runs.
    pub fn push(&mut self, page: PageNo) {
        let pos = self
            .extents
            .binary_search_by_key(&page.0, |e| e.start.0)
            .unwrap_or_else(|pos| pos);
        self.extents.insert(pos, Extent::new(page, 1));
        self.rebuild();
    }

    fn position(&self, page: PageNo) -> Option<usize> {
        let idx = match self.extents.binary_search_by_key(&page.0, |e| e.start.0) {
            Ok(idx) => idx,
            Err(0) => return None,
            Err(idx) => idx - 1,
        };
        self.extents[idx].contains(page).then_some(idx)
    }

    fn rebuild(&mut self) {
        let mut merged: Vec<Extent> = Vec::with_capacity(self.extents.len());
        for extent in self.extents.drain(..) {
            if let Some(last) = merged.last_mut() {
                if last.coalesce_with(&extent) {
                    continue;
                }
            }
            merged.push(extent);
        }
        self.extents = merged;
        self.rebuild_heap();
    }

    fn rebuild_heap(&mut self) {
        self.heap = self.extents.iter().copied().map(HeapExtent::from).collect();
    }
}
