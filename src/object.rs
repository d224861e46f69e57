//! GPU buffer objects and the per-device object manager
//!
//! The manager owns an arena of tracked objects plus the ordered inactive
//! list. The arena is index-stable: purging an object mid-scan is a flag
//! flip on the object, never a structural mutation that would invalidate an
//! iteration over the list. Object metadata is protected by the device lock;
//! every accessor takes a [`DeviceLockGuard`] as proof of acquisition.

use parking_lot::Mutex;

use crate::config::ReclaimConfig;
use crate::lock::{ContextId, DeviceLock, DeviceLockGuard};

/// Application-supplied hint on whether an idle object's contents are
/// disposable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardAdvice {
    /// Contents are needed; never discard
    WillNeed,
    /// Contents are disposable while the object is idle
    DontNeed,
    /// Backing storage was discarded; contents are gone until repopulated
    Purged,
}

/// Index of a tracked object in the manager's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(usize);

/// One GPU-resident allocation
#[derive(Debug)]
struct GemObject {
    /// Backing size in bytes
    size: u64,
    advice: DiscardAdvice,
    /// Nonzero while referenced by in-flight GPU work
    pins: u32,
    /// Whether backing storage is currently populated
    resident: bool,
    /// Whether a virtual mapping is present
    vmapped: bool,
    /// Membership flag for the inactive list
    inactive: bool,
}

#[derive(Debug, Default)]
struct ManagerState {
    objects: Vec<GemObject>,
    /// Ids in insertion order; only objects with `inactive == true` count
    inactive: Vec<ObjectId>,
}

/// Per-device object manager
///
/// Exactly one instance per device; owns the global exclusive lock and the
/// tracked-object collection. The reclaim engine only transitions residency
/// and mapping state through the primitives here, never frees objects.
#[derive(Debug)]
pub struct GemManager {
    lock: DeviceLock,
    state: Mutex<ManagerState>,
    page_shift: u32,
}

impl GemManager {
    /// Create a manager for one device
    pub fn new(config: &ReclaimConfig) -> Self {
        Self {
            lock: DeviceLock::new(),
            state: Mutex::new(ManagerState::default()),
            page_shift: config.page_shift,
        }
    }

    /// Try to take the device lock for `ctx`; never blocks
    pub fn try_lock(&self, ctx: ContextId) -> Option<DeviceLockGuard<'_>> {
        self.lock.try_acquire(ctx)
    }

    /// The device lock itself
    pub fn device_lock(&self) -> &DeviceLock {
        &self.lock
    }

    fn check_guard(&self, guard: &DeviceLockGuard<'_>) {
        debug_assert!(
            std::ptr::eq(guard.lock_ref(), &self.lock),
            "guard belongs to a different device lock"
        );
    }

    /// Track a new object of `size` bytes; starts resident, unpinned,
    /// unmapped, advice [`DiscardAdvice::WillNeed`], not on the inactive list
    pub fn create_object(&self, guard: &DeviceLockGuard<'_>, size: u64) -> ObjectId {
        self.check_guard(guard);
        let mut state = self.state.lock();
        let id = ObjectId(state.objects.len());
        state.objects.push(GemObject {
            size,
            advice: DiscardAdvice::WillNeed,
            pins: 0,
            resident: true,
            vmapped: false,
            inactive: false,
        });
        id
    }

    /// Apply discard advice; returns whether backing storage is still present
    ///
    /// Advice on an already-purged object is ignored: the purged state is
    /// sticky until the allocation path repopulates the object.
    pub fn madvise(
        &self,
        guard: &DeviceLockGuard<'_>,
        id: ObjectId,
        advice: DiscardAdvice,
    ) -> bool {
        self.check_guard(guard);
        let mut state = self.state.lock();
        let obj = &mut state.objects[id.0];
        if obj.advice != DiscardAdvice::Purged {
            obj.advice = advice;
        }
        obj.resident
    }

    /// Take a use reference; the object is ineligible for any reclaim while
    /// pinned
    pub fn pin(&self, guard: &DeviceLockGuard<'_>, id: ObjectId) {
        self.check_guard(guard);
        self.state.lock().objects[id.0].pins += 1;
    }

    /// Drop a use reference
    pub fn unpin(&self, guard: &DeviceLockGuard<'_>, id: ObjectId) {
        self.check_guard(guard);
        let mut state = self.state.lock();
        let obj = &mut state.objects[id.0];
        debug_assert!(obj.pins > 0, "unpin of unpinned object");
        obj.pins -= 1;
    }

    /// Establish a virtual mapping
    pub fn vmap(&self, guard: &DeviceLockGuard<'_>, id: ObjectId) {
        self.check_guard(guard);
        let mut state = self.state.lock();
        let obj = &mut state.objects[id.0];
        debug_assert!(obj.resident, "vmap of non-resident object");
        obj.vmapped = true;
    }

    /// Put an object on the inactive list (no in-flight GPU work uses it)
    pub fn mark_inactive(&self, guard: &DeviceLockGuard<'_>, id: ObjectId) {
        self.check_guard(guard);
        let mut state = self.state.lock();
        if !state.objects[id.0].inactive {
            state.objects[id.0].inactive = true;
            state.inactive.push(id);
        }
    }

    /// Remove an object from the inactive list (it is active again)
    pub fn mark_active(&self, guard: &DeviceLockGuard<'_>, id: ObjectId) {
        self.check_guard(guard);
        let mut state = self.state.lock();
        if state.objects[id.0].inactive {
            state.objects[id.0].inactive = false;
            state.inactive.retain(|entry| *entry != id);
        }
    }

    /// Snapshot of the inactive list in its stable order
    pub fn inactive_ids(&self, guard: &DeviceLockGuard<'_>) -> Vec<ObjectId> {
        self.check_guard(guard);
        self.state.lock().inactive.clone()
    }

    /// Whether backing storage may be purged: advice says disposable, no
    /// pins, storage present
    pub fn is_purgeable(&self, guard: &DeviceLockGuard<'_>, id: ObjectId) -> bool {
        self.check_guard(guard);
        let state = self.state.lock();
        let obj = &state.objects[id.0];
        obj.advice == DiscardAdvice::DontNeed && obj.pins == 0 && obj.resident
    }

    /// Whether the virtual mapping may be revoked: mapping present, no pins
    pub fn is_vunmappable(&self, guard: &DeviceLockGuard<'_>, id: ObjectId) -> bool {
        self.check_guard(guard);
        let state = self.state.lock();
        let obj = &state.objects[id.0];
        obj.vmapped && obj.pins == 0
    }

    /// Release backing storage; the object becomes non-resident and its
    /// mapping (if any) is torn down with it
    pub fn purge(&self, guard: &DeviceLockGuard<'_>, id: ObjectId) {
        debug_assert!(self.is_purgeable(guard, id), "purge of non-purgeable object");
        let mut state = self.state.lock();
        let obj = &mut state.objects[id.0];
        obj.resident = false;
        obj.vmapped = false;
        obj.advice = DiscardAdvice::Purged;
    }

    /// Revoke the virtual mapping; backing storage stays intact
    pub fn vunmap(&self, guard: &DeviceLockGuard<'_>, id: ObjectId) {
        debug_assert!(
            self.is_vunmappable(guard, id),
            "vunmap of non-vunmappable object"
        );
        self.state.lock().objects[id.0].vmapped = false;
    }

    /// Object size in whole allocation units (rounded down)
    pub fn object_pages(&self, guard: &DeviceLockGuard<'_>, id: ObjectId) -> u64 {
        self.check_guard(guard);
        self.state.lock().objects[id.0].size >> self.page_shift
    }

    /// Object size in bytes
    pub fn object_size(&self, guard: &DeviceLockGuard<'_>, id: ObjectId) -> u64 {
        self.check_guard(guard);
        self.state.lock().objects[id.0].size
    }

    /// Whether backing storage is populated
    pub fn is_resident(&self, guard: &DeviceLockGuard<'_>, id: ObjectId) -> bool {
        self.check_guard(guard);
        self.state.lock().objects[id.0].resident
    }

    /// Whether a virtual mapping is present
    pub fn is_vmapped(&self, guard: &DeviceLockGuard<'_>, id: ObjectId) -> bool {
        self.check_guard(guard);
        self.state.lock().objects[id.0].vmapped
    }

    /// Current discard advice
    pub fn advice(&self, guard: &DeviceLockGuard<'_>, id: ObjectId) -> DiscardAdvice {
        self.check_guard(guard);
        self.state.lock().objects[id.0].advice
    }

    /// log2 of the allocation unit size
    pub fn page_shift(&self) -> u32 {
        self.page_shift
    }
}
