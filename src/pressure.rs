//! Pressure coordinator and address-space-exhaustion notifier chain
//!
//! The coordinator is the external authority that decides when and how much
//! to reclaim; this module gives it a registration table of shrinker
//! callbacks and a driver loop. The trigger mechanism is deliberately
//! unspecified (timer polling, an OS low-memory signal, a test harness):
//! the engine only guarantees that `count` never blocks and that `scan`
//! treats the budget as an upper target.
//!
//! The notifier chain delivers virtual-address-space pressure to every
//! registered party with a shared accumulator; delivery itself never fails.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{ReclaimError, ReclaimResult};
use crate::lock::ContextId;
use crate::shrinker::{GemShrinker, ScanOutcome};

/// Acknowledgment code required by the notifier interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyAck {
    /// Notification handled; delivery continues to other notifiers
    Done,
}

/// Callback pair a shrinker exposes to the pressure coordinator
pub trait ShrinkerOps: Send + Sync {
    /// Reclaimable pages right now; must never block
    fn count(&self, ctx: ContextId) -> u64;
    /// Free up to `nr_to_scan` pages; the budget is an upper target
    fn scan(&self, ctx: ContextId, nr_to_scan: u64) -> ScanOutcome;
}

/// Party interested in virtual-address-space pressure
pub trait VmapNotifier: Send + Sync {
    /// Handle one pressure notification, adding reclaimed mappings to `accum`
    fn vmap_pressure(&self, ctx: ContextId, accum: &mut u64) -> NotifyAck;
}

impl ShrinkerOps for GemShrinker {
    fn count(&self, ctx: ContextId) -> u64 {
        GemShrinker::count(self, ctx)
    }

    fn scan(&self, ctx: ContextId, nr_to_scan: u64) -> ScanOutcome {
        GemShrinker::scan(self, ctx, nr_to_scan)
    }
}

impl VmapNotifier for GemShrinker {
    fn vmap_pressure(&self, ctx: ContextId, accum: &mut u64) -> NotifyAck {
        self.purge_vmaps(ctx, accum)
    }
}

struct RegisteredShrinker {
    name: String,
    ops: Arc<dyn ShrinkerOps>,
}

/// Proof of a live shrinker registration; consumed by unregistration
#[derive(Debug)]
#[must_use = "registration stays live until unregistered"]
pub struct ShrinkerHandle {
    slot: usize,
}

/// Registration table of shrinkers, driven on memory pressure
pub struct PressureCoordinator {
    slots: Mutex<Vec<Option<RegisteredShrinker>>>,
}

impl PressureCoordinator {
    /// Coordinator with room for `capacity` shrinkers
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new((0..capacity).map(|_| None).collect()),
        }
    }

    /// Register a shrinker callback pair under `name`
    ///
    /// Fails with [`ReclaimError::OutOfResources`] when the table is full,
    /// leaving no trace of the attempt.
    pub fn register(
        &self,
        name: &str,
        ops: Arc<dyn ShrinkerOps>,
    ) -> ReclaimResult<ShrinkerHandle> {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.iter().position(Option::is_none) else {
            return Err(ReclaimError::OutOfResources { what: "shrinker" });
        };
        slots[slot] = Some(RegisteredShrinker {
            name: name.to_string(),
            ops,
        });
        Ok(ShrinkerHandle { slot })
    }

    /// Drop a registration; the handle must refer to a live slot
    pub fn unregister(&self, handle: ShrinkerHandle) {
        let mut slots = self.slots.lock();
        let entry = slots[handle.slot].take();
        assert!(entry.is_some(), "unregister of a dead shrinker slot");
    }

    /// Number of live registrations
    pub fn registered(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.is_some()).count()
    }

    /// Drive registered shrinkers until `target` pages are freed or every
    /// shrinker has reported nothing left
    ///
    /// Shrinkers that report [`ScanOutcome::Stop`] are skipped this round;
    /// retrying later is the caller's job.
    pub fn reclaim(&self, ctx: ContextId, target: u64) -> u64 {
        let entries: Vec<(String, Arc<dyn ShrinkerOps>)> = {
            let slots = self.slots.lock();
            slots
                .iter()
                .flatten()
                .map(|entry| (entry.name.clone(), Arc::clone(&entry.ops)))
                .collect()
        };

        let mut total = 0;
        for (name, ops) in entries {
            if total >= target {
                break;
            }
            if ops.count(ctx) == 0 {
                continue;
            }
            match ops.scan(ctx, target - total) {
                ScanOutcome::Freed(pages) => total += pages,
                ScanOutcome::Stop => {
                    debug!(target: "vm_gpu_reclaim", shrinker = %name, "scan deferred under contention");
                }
            }
        }
        total
    }
}

/// Proof of a live notifier registration; consumed by unregistration
#[derive(Debug)]
#[must_use = "registration stays live until unregistered"]
pub struct NotifierHandle {
    slot: usize,
}

/// Delivery chain for virtual-address-space pressure notifications
pub struct VmapNotifierChain {
    slots: Mutex<Vec<Option<Arc<dyn VmapNotifier>>>>,
}

impl VmapNotifierChain {
    /// Chain with room for `capacity` notifiers
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new((0..capacity).map(|_| None).collect()),
        }
    }

    /// Register a notifier
    pub fn register(&self, notifier: Arc<dyn VmapNotifier>) -> ReclaimResult<NotifierHandle> {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.iter().position(Option::is_none) else {
            return Err(ReclaimError::OutOfResources {
                what: "vmap notifier",
            });
        };
        slots[slot] = Some(notifier);
        Ok(NotifierHandle { slot })
    }

    /// Drop a registration; the handle must refer to a live slot
    pub fn unregister(&self, handle: NotifierHandle) {
        let mut slots = self.slots.lock();
        let entry = slots[handle.slot].take();
        assert!(entry.is_some(), "unregister of a dead notifier slot");
    }

    /// Number of live registrations
    pub fn registered(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.is_some()).count()
    }

    /// Deliver one pressure notification to every notifier
    ///
    /// Returns the total number of mappings reclaimed across the chain.
    pub fn notify(&self, ctx: ContextId) -> u64 {
        let notifiers: Vec<Arc<dyn VmapNotifier>> = {
            let slots = self.slots.lock();
            slots.iter().flatten().map(Arc::clone).collect()
        };

        let mut accum = 0;
        for notifier in notifiers {
            // Delivery never fails; the ack carries no information today.
            let NotifyAck::Done = notifier.vmap_pressure(ctx, &mut accum);
        }
        accum
    }
}

impl std::fmt::Debug for PressureCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PressureCoordinator")
            .field("registered", &self.registered())
            .finish()
    }
}

impl std::fmt::Debug for VmapNotifierChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmapNotifierChain")
            .field("registered", &self.registered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedShrinker {
        available: Mutex<u64>,
    }

    impl ShrinkerOps for FixedShrinker {
        fn count(&self, _ctx: ContextId) -> u64 {
            *self.available.lock()
        }

        fn scan(&self, _ctx: ContextId, nr_to_scan: u64) -> ScanOutcome {
            let mut available = self.available.lock();
            let freed = nr_to_scan.min(*available);
            *available -= freed;
            ScanOutcome::Freed(freed)
        }
    }

    struct StoppedShrinker;

    impl ShrinkerOps for StoppedShrinker {
        fn count(&self, _ctx: ContextId) -> u64 {
            u64::MAX
        }

        fn scan(&self, _ctx: ContextId, _nr_to_scan: u64) -> ScanOutcome {
            ScanOutcome::Stop
        }
    }

    #[test]
    fn test_register_until_out_of_resources() {
        let coordinator = PressureCoordinator::new(2);
        let ops = || -> Arc<dyn ShrinkerOps> {
            Arc::new(FixedShrinker {
                available: Mutex::new(0),
            })
        };

        let first = coordinator.register("a", ops()).expect("slot free");
        let _second = coordinator.register("b", ops()).expect("slot free");
        assert!(matches!(
            coordinator.register("c", ops()),
            Err(ReclaimError::OutOfResources { what: "shrinker" })
        ));

        coordinator.unregister(first);
        assert!(coordinator.register("c", ops()).is_ok());
    }

    #[test]
    fn test_reclaim_stops_at_target() {
        let coordinator = PressureCoordinator::new(4);
        let a = Arc::new(FixedShrinker {
            available: Mutex::new(10),
        });
        let b = Arc::new(FixedShrinker {
            available: Mutex::new(10),
        });
        let _ha = coordinator.register("a", a.clone()).expect("slot");
        let _hb = coordinator.register("b", b.clone()).expect("slot");

        let freed = coordinator.reclaim(ContextId::mint(), 6);
        assert_eq!(freed, 6);
        // Second shrinker untouched.
        assert_eq!(*b.available.lock(), 10);
    }

    #[test]
    fn test_reclaim_skips_stopped_shrinker() {
        let coordinator = PressureCoordinator::new(4);
        let _hs = coordinator
            .register("stuck", Arc::new(StoppedShrinker))
            .expect("slot");
        let fixed = Arc::new(FixedShrinker {
            available: Mutex::new(8),
        });
        let _hf = coordinator.register("ok", fixed).expect("slot");

        assert_eq!(coordinator.reclaim(ContextId::mint(), 5), 5);
    }

    #[test]
    #[should_panic(expected = "dead shrinker slot")]
    fn test_double_unregister_is_fatal() {
        let coordinator = PressureCoordinator::new(1);
        let ops: Arc<dyn ShrinkerOps> = Arc::new(StoppedShrinker);
        let handle = coordinator.register("a", ops).expect("slot");
        let stale = ShrinkerHandle { slot: handle.slot };
        coordinator.unregister(handle);
        coordinator.unregister(stale);
    }

    struct CountingNotifier;

    impl VmapNotifier for CountingNotifier {
        fn vmap_pressure(&self, _ctx: ContextId, accum: &mut u64) -> NotifyAck {
            *accum += 2;
            NotifyAck::Done
        }
    }

    #[test]
    fn test_notify_aggregates_across_chain() {
        let chain = VmapNotifierChain::new(4);
        let _h1 = chain.register(Arc::new(CountingNotifier)).expect("slot");
        let _h2 = chain.register(Arc::new(CountingNotifier)).expect("slot");

        assert_eq!(chain.notify(ContextId::mint()), 4);
    }

    #[test]
    fn test_notifier_chain_capacity() {
        let chain = VmapNotifierChain::new(1);
        let _h = chain.register(Arc::new(CountingNotifier)).expect("slot");
        assert!(matches!(
            chain.register(Arc::new(CountingNotifier)),
            Err(ReclaimError::OutOfResources { .. })
        ));
    }
}
