//! Device wiring for the reclaim engine
//!
//! Installs the shrinker callback pair with the pressure coordinator and
//! hooks the vmap-pressure notifier chain, and tears both down symmetrically
//! at device teardown. One registration per device instance; concurrent
//! install/teardown of the same device is not supported.

use std::sync::Arc;

use tracing::debug;

use crate::error::ReclaimResult;
use crate::pressure::{
    NotifierHandle, PressureCoordinator, ShrinkerHandle, ShrinkerOps, VmapNotifier,
    VmapNotifierChain,
};
use crate::shrinker::GemShrinker;

/// Live reclaim registration for one device
///
/// Holds both handles; [`ReclaimRegistration::teardown`] must run at device
/// teardown. Dropping a live registration is a lifecycle-contract violation
/// caught by a debug assertion.
#[derive(Debug)]
pub struct ReclaimRegistration {
    coordinator: Arc<PressureCoordinator>,
    chain: Arc<VmapNotifierChain>,
    shrinker: Option<ShrinkerHandle>,
    notifier: Option<NotifierHandle>,
}

impl ReclaimRegistration {
    /// Register `shrinker` under `name` with the coordinator and the
    /// notifier chain
    ///
    /// The shrinker serves as both the callback pair and the vmap notifier.
    pub fn install(
        name: &str,
        coordinator: Arc<PressureCoordinator>,
        chain: Arc<VmapNotifierChain>,
        shrinker: Arc<GemShrinker>,
    ) -> ReclaimResult<Self> {
        let ops: Arc<dyn ShrinkerOps> = Arc::<GemShrinker>::clone(&shrinker);
        let notifier: Arc<dyn VmapNotifier> = shrinker;
        Self::install_callbacks(name, coordinator, chain, ops, notifier)
    }

    /// Register a callback pair and a vmap notifier as one unit
    ///
    /// On resource exhaustion nothing is left installed: a notifier
    /// registration failure rolls back the coordinator registration before
    /// the error propagates, so device bring-up can abort cleanly.
    pub fn install_callbacks(
        name: &str,
        coordinator: Arc<PressureCoordinator>,
        chain: Arc<VmapNotifierChain>,
        ops: Arc<dyn ShrinkerOps>,
        notifier: Arc<dyn VmapNotifier>,
    ) -> ReclaimResult<Self> {
        let shrinker_handle = coordinator.register(name, ops)?;

        let notifier_handle = match chain.register(notifier) {
            Ok(handle) => handle,
            Err(err) => {
                coordinator.unregister(shrinker_handle);
                return Err(err);
            }
        };

        debug!(target: "vm_gpu_reclaim", name, "reclaim callbacks installed");
        Ok(Self {
            coordinator,
            chain,
            shrinker: Some(shrinker_handle),
            notifier: Some(notifier_handle),
        })
    }

    /// Unregister the notifier, then release the shrinker registration
    ///
    /// Both handles must still be live; they mirror a successful install, so
    /// a missing one is a programming error, not a recoverable condition.
    pub fn teardown(mut self) {
        let notifier = self
            .notifier
            .take()
            .expect("teardown of a dead reclaim registration");
        self.chain.unregister(notifier);

        let shrinker = self
            .shrinker
            .take()
            .expect("teardown of a dead reclaim registration");
        self.coordinator.unregister(shrinker);
    }
}

impl Drop for ReclaimRegistration {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            debug_assert!(
                self.shrinker.is_none() && self.notifier.is_none(),
                "reclaim registration dropped without teardown"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::config::ReclaimConfig;
    use crate::lock::ContextId;
    use crate::object::GemManager;
    use crate::pressure::NotifyAck;
    use crate::shrinker::ScanOutcome;

    fn shrinker() -> Arc<GemShrinker> {
        let config = ReclaimConfig::default();
        let mgr = Arc::new(GemManager::new(&config));
        Arc::new(GemShrinker::new(mgr, config).expect("valid config"))
    }

    #[test]
    fn test_install_and_teardown_round_trip() {
        let coordinator = Arc::new(PressureCoordinator::new(4));
        let chain = Arc::new(VmapNotifierChain::new(4));

        let registration = ReclaimRegistration::install(
            "gem",
            Arc::clone(&coordinator),
            Arc::clone(&chain),
            shrinker(),
        )
        .expect("install");
        assert_eq!(coordinator.registered(), 1);
        assert_eq!(chain.registered(), 1);

        registration.teardown();
        assert_eq!(coordinator.registered(), 0);
        assert_eq!(chain.registered(), 0);
    }

    #[test]
    fn test_full_coordinator_leaves_nothing_behind() {
        let coordinator = Arc::new(PressureCoordinator::new(0));
        let chain = Arc::new(VmapNotifierChain::new(4));

        let result = ReclaimRegistration::install(
            "gem",
            Arc::clone(&coordinator),
            Arc::clone(&chain),
            shrinker(),
        );
        assert!(result.is_err());
        assert_eq!(chain.registered(), 0);
    }

    #[test]
    fn test_full_notifier_chain_rolls_back_shrinker() {
        let coordinator = Arc::new(PressureCoordinator::new(4));
        let chain = Arc::new(VmapNotifierChain::new(0));

        let result = ReclaimRegistration::install(
            "gem",
            Arc::clone(&coordinator),
            Arc::clone(&chain),
            shrinker(),
        );
        assert!(result.is_err());
        assert_eq!(coordinator.registered(), 0);
    }

    /// Shrinker callbacks that record when their registration is released
    struct RecordingOps {
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl ShrinkerOps for RecordingOps {
        fn count(&self, _ctx: ContextId) -> u64 {
            0
        }

        fn scan(&self, _ctx: ContextId, _nr_to_scan: u64) -> ScanOutcome {
            ScanOutcome::Freed(0)
        }
    }

    impl Drop for RecordingOps {
        fn drop(&mut self) {
            self.log.lock().push("shrinker released");
        }
    }

    struct RecordingNotifier {
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl VmapNotifier for RecordingNotifier {
        fn vmap_pressure(&self, _ctx: ContextId, _accum: &mut u64) -> NotifyAck {
            NotifyAck::Done
        }
    }

    impl Drop for RecordingNotifier {
        fn drop(&mut self) {
            self.log.lock().push("notifier unregistered");
        }
    }

    #[test]
    fn test_teardown_unregisters_notifier_before_shrinker() {
        let coordinator = Arc::new(PressureCoordinator::new(4));
        let chain = Arc::new(VmapNotifierChain::new(4));
        let log = Arc::new(Mutex::new(Vec::new()));

        // The tables hold the only reference to each recorder, so each
        // unregister drops its entry on the spot and the log captures the
        // release order.
        let registration = ReclaimRegistration::install_callbacks(
            "gem",
            Arc::clone(&coordinator),
            Arc::clone(&chain),
            Arc::new(RecordingOps {
                log: Arc::clone(&log),
            }),
            Arc::new(RecordingNotifier {
                log: Arc::clone(&log),
            }),
        )
        .expect("install");

        registration.teardown();
        assert_eq!(
            *log.lock(),
            vec!["notifier unregistered", "shrinker released"]
        );
    }

    #[test]
    #[should_panic(expected = "dropped without teardown")]
    fn test_dropping_live_registration_is_caught() {
        let coordinator = Arc::new(PressureCoordinator::new(4));
        let chain = Arc::new(VmapNotifierChain::new(4));

        let registration =
            ReclaimRegistration::install("gem", coordinator, chain, shrinker()).expect("install");
        drop(registration);
    }
}
