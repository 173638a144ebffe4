use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for LOB storage operations.
#[derive(Default, Debug)]
pub struct LobMetrics {
    pages_allocated: AtomicU64,
    pages_freed: AtomicU64,
    bytes_written: AtomicU64,
    bytes_read: AtomicU64,
    fragments_allocated: AtomicU64,
    fragments_freed: AtomicU64,
    versions_purged: AtomicU64,
    entries_rolled_back: AtomicU64,
    in_place_updates: AtomicU64,
    cow_updates: AtomicU64,
    frag_cache_refreshes: AtomicU64,
}

/// Snapshot of [`LobMetrics`] at a point in time.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct LobMetricsSnapshot {
    /// Pages allocated for LOB storage
    pub pages_allocated: u64,
    /// Pages released back to the page store
    pub pages_freed: u64,
    /// Uncompressed bytes written
    pub bytes_written: u64,
    /// Uncompressed bytes returned to readers
    pub bytes_read: u64,
    /// Fragments carved out of fragment pages
    pub fragments_allocated: u64,
    /// Fragments returned to their page
    pub fragments_freed: u64,
    /// Old versions removed by purge
    pub versions_purged: u64,
    /// Index entries undone by rollback
    pub entries_rolled_back: u64,
    /// Updates applied in place
    pub in_place_updates: u64,
    /// Updates applied by copy-on-write
    pub cow_updates: u64,
    /// Fragment entry counters found stale and recomputed
    pub frag_cache_refreshes: u64,
}

impl LobMetricsSnapshot {
    /// Pages allocated and not yet freed.
    pub fn live_pages(&self) -> i64 {
        self.pages_allocated as i64 - self.pages_freed as i64
    }
}

fn add(counter: &AtomicU64, delta: u64) {
    if delta != 0 {
        counter.fetch_add(delta, Ordering::Relaxed);
    }
}

impl LobMetrics {
    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> LobMetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        LobMetricsSnapshot {
            pages_allocated: load(&self.pages_allocated),
            pages_freed: load(&self.pages_freed),
            bytes_written: load(&self.bytes_written),
            bytes_read: load(&self.bytes_read),
            fragments_allocated: load(&self.fragments_allocated),
            fragments_freed: load(&self.fragments_freed),
            versions_purged: load(&self.versions_purged),
            entries_rolled_back: load(&self.entries_rolled_back),
            in_place_updates: load(&self.in_place_updates),
            cow_updates: load(&self.cow_updates),
            frag_cache_refreshes: load(&self.frag_cache_refreshes),
        }
    }

    pub(crate) fn add_pages_allocated(&self, delta: u64) {
        add(&self.pages_allocated, delta);
    }

    pub(crate) fn add_pages_freed(&self, delta: u64) {
        add(&self.pages_freed, delta);
    }

    pub(crate) fn add_bytes_written(&self, delta: u64) {
        add(&self.bytes_written, delta);
    }

    pub(crate) fn add_bytes_read(&self, delta: u64) {
        add(&self.bytes_read, delta);
    }

    pub(crate) fn add_fragments_allocated(&self, delta: u64) {
        add(&self.fragments_allocated, delta);
    }

    pub(crate) fn add_fragments_freed(&self, delta: u64) {
        add(&self.fragments_freed, delta);
    }

    pub(crate) fn add_versions_purged(&self, delta: u64) {
        add(&self.versions_purged, delta);
    }

    pub(crate) fn add_entries_rolled_back(&self, delta: u64) {
        add(&self.entries_rolled_back, delta);
    }

    pub(crate) fn add_in_place_update(&self) {
        add(&self.in_place_updates, 1);
    }

    pub(crate) fn add_cow_update(&self) {
        add(&self.cow_updates, 1);
    }

    pub(crate) fn add_frag_cache_refresh(&self) {
        add(&self.frag_cache_refreshes, 1);
    }
}
