//! # vm-gpu-reclaim - Memory-pressure-driven reclaim for GPU buffer objects
//!
//! Under system-wide memory shortage a pressure coordinator asks this engine
//! to estimate how much memory it could give back, then to actually give a
//! requested amount back, by evicting the backing storage or virtual
//! mappings of idle GPU objects the application marked disposable.
//!
//! The engine is built around three constraints:
//! - The caller's lock state is unknown at entry: reclaim may be invoked
//!   synchronously from inside the allocation path (device lock already
//!   held) or from an external pressure signal. The reentrant
//!   [`DeviceLock`] resolves free / held-by-me / held-elsewhere without
//!   ever blocking.
//! - Every pass is bounded: storage purging stops at the requested page
//!   budget, vmap teardown stops at a fixed cap per notification.
//! - Eviction never touches objects in active use: eligibility is
//!   re-checked per object under the lock at visit time.
//!
//! Lock contention is never an error. `count` returns 0, `scan` returns
//! [`ScanOutcome::Stop`], the vmap pass acknowledges with a zero
//! contribution; the coordinator retries later if it still needs memory.

pub mod config;
pub mod error;
pub mod lock;
pub mod object;
pub mod pressure;
pub mod registration;
pub mod shrinker;
pub mod stats;

pub use config::{DEFAULT_PAGE_SHIFT, DEFAULT_VMAP_UNMAP_CAP, ReclaimConfig};
pub use error::{ReclaimError, ReclaimResult};
pub use lock::{ContextId, DeviceLock, DeviceLockGuard};
pub use object::{DiscardAdvice, GemManager, ObjectId};
pub use pressure::{
    NotifierHandle, NotifyAck, PressureCoordinator, ShrinkerHandle, ShrinkerOps, VmapNotifier,
    VmapNotifierChain,
};
pub use registration::ReclaimRegistration;
pub use shrinker::{GemShrinker, ScanOutcome};
pub use stats::{ReclaimStats, ReclaimStatsSnapshot};
