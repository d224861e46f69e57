//! Reclaim statistics
//!
//! Fire-and-forget counters; nothing in the reclaim policy reads them back.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counter block shared by all passes of one shrinker
#[derive(Debug, Default)]
pub struct ReclaimStats {
    bytes_purged: AtomicU64,
    objects_purged: AtomicU64,
    vmaps_unmapped: AtomicU64,
    scans_completed: AtomicU64,
    contended_entries: AtomicU64,
}

/// Point-in-time copy of [`ReclaimStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimStatsSnapshot {
    /// Total bytes of backing storage released
    pub bytes_purged: u64,
    /// Objects whose backing storage was released
    pub objects_purged: u64,
    /// Virtual mappings revoked
    pub vmaps_unmapped: u64,
    /// Scan passes that ran to completion
    pub scans_completed: u64,
    /// Entry points that bailed because the lock was held elsewhere
    pub contended_entries: u64,
}

impl ReclaimStats {
    pub(crate) fn record_purge(&self, objects: u64, bytes: u64) {
        self.objects_purged.fetch_add(objects, Ordering::Relaxed);
        self.bytes_purged.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_scan(&self) {
        self.scans_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unmaps(&self, count: u64) {
        self.vmaps_unmapped.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_contention(&self) {
        self.contended_entries.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy out the current counter values
    pub fn snapshot(&self) -> ReclaimStatsSnapshot {
        ReclaimStatsSnapshot {
            bytes_purged: self.bytes_purged.load(Ordering::Relaxed),
            objects_purged: self.objects_purged.load(Ordering::Relaxed),
            vmaps_unmapped: self.vmaps_unmapped.load(Ordering::Relaxed),
            scans_completed: self.scans_completed.load(Ordering::Relaxed),
            contended_entries: self.contended_entries.load(Ordering::Relaxed),
        }
    }
}
