//! Reentrant device lock
//!
//! The object manager has a single global exclusive lock. Reclaim can be
//! triggered synchronously from inside the allocation path (which already
//! holds that lock) or asynchronously from an external pressure signal
//! (which does not). Both entries must succeed without deadlock and without
//! double-release, and neither may ever block: a memory-pressure callback
//! that waits on a lock held by a thread that is itself waiting on memory
//! is a deadlock under exactly the condition reclaim exists to relieve.
//!
//! The lock is modeled as explicit `(owner, depth)` state rather than a
//! natively recursive primitive, so the three cases are distinguishable:
//! free, held by the acquiring context, held by another context.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Identity of an execution context for lock-ownership purposes
///
/// Each OS thread gets a distinct id from [`ContextId::current`]. Harnesses
/// may also mint explicit ids to model several contexts on one thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_CONTEXT: ContextId =
        ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed));
}

impl ContextId {
    /// Context id of the calling thread
    pub fn current() -> Self {
        THREAD_CONTEXT.with(|id| *id)
    }

    /// Mint a fresh id unrelated to any thread
    pub fn mint() -> Self {
        ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug)]
struct LockState {
    owner: Option<ContextId>,
    depth: u32,
}

/// The manager's global exclusive lock
#[derive(Debug)]
pub struct DeviceLock {
    state: Mutex<LockState>,
}

impl Default for DeviceLock {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceLock {
    /// Create an unheld lock
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LockState {
                owner: None,
                depth: 0,
            }),
        }
    }

    /// Try to acquire the lock for `ctx` without ever blocking
    ///
    /// Returns `None` when another context holds the lock. When `ctx`
    /// already holds it the acquisition nests: the returned guard reports
    /// `owns_release() == false` and dropping it leaves the lock held.
    pub fn try_acquire(&self, ctx: ContextId) -> Option<DeviceLockGuard<'_>> {
        let mut state = self.state.lock();
        match state.owner {
            None => {
                state.owner = Some(ctx);
                state.depth = 1;
                Some(DeviceLockGuard {
                    lock: self,
                    owns_release: true,
                })
            }
            Some(owner) if owner == ctx => {
                state.depth += 1;
                Some(DeviceLockGuard {
                    lock: self,
                    owns_release: false,
                })
            }
            Some(_) => None,
        }
    }

    /// Whether `ctx` currently holds the lock
    pub fn is_held_by(&self, ctx: ContextId) -> bool {
        self.state.lock().owner == Some(ctx)
    }

    /// Whether any context holds the lock
    pub fn is_held(&self) -> bool {
        self.state.lock().owner.is_some()
    }

    fn release(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.owner.is_some(), "release of unheld device lock");
        debug_assert!(state.depth > 0);
        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
        }
    }
}

/// RAII acquisition of a [`DeviceLock`]
///
/// Dropping the guard undoes exactly one level of acquisition, on every exit
/// path. Only the guard that took the lock from free to held clears the
/// owner when it drops; nested guards leave the outer acquisition intact.
#[derive(Debug)]
pub struct DeviceLockGuard<'a> {
    lock: &'a DeviceLock,
    owns_release: bool,
}

impl DeviceLockGuard<'_> {
    /// Whether this guard is the outermost acquisition
    pub fn owns_release(&self) -> bool {
        self.owns_release
    }

    pub(crate) fn lock_ref(&self) -> &DeviceLock {
        self.lock
    }
}

impl Drop for DeviceLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
