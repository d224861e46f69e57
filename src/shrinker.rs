//! The reclaim engine
//!
//! Three bounded entry points over one device's object manager:
//! - [`GemShrinker::count`]: estimate reclaimable pages, no mutation;
//! - [`GemShrinker::scan`]: purge idle disposable objects up to a page budget;
//! - [`GemShrinker::purge_vmaps`]: revoke idle virtual mappings up to a cap.
//!
//! Every entry takes the device lock with trylock semantics and bails with a
//! "nothing done" result under contention. Eligibility is re-checked per
//! object at visit time, never cached across the pass.

use std::sync::Arc;

use tracing::trace;

use crate::config::ReclaimConfig;
use crate::error::ReclaimResult;
use crate::lock::ContextId;
use crate::object::GemManager;
use crate::pressure::NotifyAck;
use crate::stats::ReclaimStats;

/// Result of one storage-purge pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Pages freed this pass; may exceed the request (the last purged object
    /// is never split) and may be zero when nothing was eligible
    Freed(u64),
    /// The device lock was held elsewhere; do not retry synchronously
    Stop,
}

impl ScanOutcome {
    /// Pages freed, treating [`ScanOutcome::Stop`] as zero
    pub fn freed_pages(self) -> u64 {
        match self {
            ScanOutcome::Freed(pages) => pages,
            ScanOutcome::Stop => 0,
        }
    }
}

/// Reclaim engine for one device's object manager
#[derive(Debug)]
pub struct GemShrinker {
    mgr: Arc<GemManager>,
    config: ReclaimConfig,
    stats: ReclaimStats,
}

impl GemShrinker {
    /// Build a shrinker over `mgr` with validated tunables
    pub fn new(mgr: Arc<GemManager>, config: ReclaimConfig) -> ReclaimResult<Self> {
        config.validate()?;
        Ok(Self {
            mgr,
            config,
            stats: ReclaimStats::default(),
        })
    }

    /// The manager this shrinker reclaims from
    pub fn manager(&self) -> &Arc<GemManager> {
        &self.mgr
    }

    /// Counter block for this shrinker
    pub fn stats(&self) -> &ReclaimStats {
        &self.stats
    }

    /// Pages reclaimable right now across all purgeable inactive objects
    ///
    /// Returns 0 when the device lock is held by another context; the
    /// estimate is conservative and the pass mutates nothing.
    pub fn count(&self, ctx: ContextId) -> u64 {
        let Some(guard) = self.mgr.try_lock(ctx) else {
            self.stats.record_contention();
            return 0;
        };

        let mut count = 0;
        for id in self.mgr.inactive_ids(&guard) {
            if self.mgr.is_purgeable(&guard, id) {
                count += self.mgr.object_pages(&guard, id);
            }
        }
        count
    }

    /// Purge purgeable inactive objects until at least `nr_to_scan` pages
    /// are freed or the list is exhausted
    ///
    /// The inactive list is walked in its stable order; the pass stops as
    /// soon as the running total reaches the budget, so objects past that
    /// point are left untouched.
    pub fn scan(&self, ctx: ContextId, nr_to_scan: u64) -> ScanOutcome {
        let Some(guard) = self.mgr.try_lock(ctx) else {
            self.stats.record_contention();
            return ScanOutcome::Stop;
        };

        let mut freed = 0;
        let mut purged = 0;
        for id in self.mgr.inactive_ids(&guard) {
            if freed >= nr_to_scan {
                break;
            }
            if self.mgr.is_purgeable(&guard, id) {
                self.mgr.purge(&guard, id);
                freed += self.mgr.object_pages(&guard, id);
                purged += 1;
            }
        }
        drop(guard);

        self.stats.record_scan();
        if freed > 0 {
            let bytes = freed << self.mgr.page_shift();
            self.stats.record_purge(purged, bytes);
            trace!(target: "vm_gpu_reclaim", bytes, "purged object backing storage");
        }
        ScanOutcome::Freed(freed)
    }

    /// Revoke virtual mappings of idle objects, at most
    /// [`ReclaimConfig::vmap_unmap_cap`] per invocation
    ///
    /// Adds the number of mappings revoked to `accum` and always
    /// acknowledges: address-space pressure delivery never fails, it just
    /// fires again if more is needed.
    pub fn purge_vmaps(&self, ctx: ContextId, accum: &mut u64) -> NotifyAck {
        let Some(guard) = self.mgr.try_lock(ctx) else {
            self.stats.record_contention();
            return NotifyAck::Done;
        };

        let mut unmapped: u64 = 0;
        for id in self.mgr.inactive_ids(&guard) {
            if self.mgr.is_vunmappable(&guard, id) {
                self.mgr.vunmap(&guard, id);
                unmapped += 1;
                if unmapped as usize >= self.config.vmap_unmap_cap {
                    break;
                }
            }
        }
        drop(guard);

        *accum += unmapped;
        if unmapped > 0 {
            self.stats.record_unmaps(unmapped);
            trace!(target: "vm_gpu_reclaim", unmapped, "revoked idle vmaps");
        }
        NotifyAck::Done
    }
}
