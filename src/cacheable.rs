use super::device::DeviceBuffer;
use super::engine::{Handle, NOT_RESIDENT};
use super::error::CacheError;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// Live-count threshold past which an entity is assumed to be leaking device
/// views. Heuristic, not proof of a bug: the warning is logged once and the
/// entity keeps working.
pub const LIVE_LEAK_THRESHOLD: u32 = 200;

/// Per-entity residency bookkeeping shared between a host object and the
/// eviction engine.
///
/// The handle is [`NOT_RESIDENT`] exactly when the entity has no device
/// mapping. The live counter tracks in-flight uses of the device view;
/// eviction requires it to be zero. Both fields are plain atomics so they can
/// be updated outside the engine's lock.
pub struct CacheState {
    handle: AtomicU64,
    live: AtomicU32,
    leak_warned: AtomicBool,
}

impl CacheState {
    pub fn new() -> Self {
        Self {
            handle: AtomicU64::new(NOT_RESIDENT),
            live: AtomicU32::new(0),
            leak_warned: AtomicBool::new(false),
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle.load(Ordering::Acquire)
    }

    pub fn is_resident(&self) -> bool {
        self.handle() != NOT_RESIDENT
    }

    pub(crate) fn set_handle(&self, handle: Handle) {
        self.handle.store(handle, Ordering::Release);
    }

    pub fn live_count(&self) -> u32 {
        self.live.load(Ordering::Acquire)
    }

    /// Increments the live counter, logging once if it crosses the leak
    /// threshold.
    pub fn retain(&self) -> u32 {
        let live = self.live.fetch_add(1, Ordering::AcqRel) + 1;
        if live >= LIVE_LEAK_THRESHOLD && !self.leak_warned.swap(true, Ordering::AcqRel) {
            tracing::warn!(
                live,
                threshold = LIVE_LEAK_THRESHOLD,
                "entity live count crossed the leak threshold; get/release calls may be unbalanced"
            );
        }
        live
    }

    /// Decrements the live counter. Releasing below zero indicates an
    /// unbalanced caller and is clamped rather than wrapped.
    pub fn release(&self) -> u32 {
        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                live.checked_sub(1)
            })
            .map(|prev| prev - 1)
            .unwrap_or_else(|_| {
                tracing::warn!("release() without a matching device view retain");
                0
            })
    }
}

impl Default for CacheState {
    fn default() -> Self {
        Self::new()
    }
}

/// Host-resident data object that can be mirrored into device memory.
///
/// The engine holds only `Weak` references to implementors; an entity dropped
/// by the host becomes immediately evictable and is freed without a host
/// writeback on the next eviction scan.
pub trait Cacheable: Send + Sync {
    /// Residency bookkeeping for this entity.
    fn cache_state(&self) -> &CacheState;

    /// Size of the device mirror in bytes.
    fn byte_size(&self) -> usize;

    /// Deterministic snapshot of the host data, used as the admission upload
    /// payload.
    fn host_snapshot(&self) -> Vec<u8>;

    /// Pulls `buffer` back into the host array.
    ///
    /// Called by the engine during eviction with the region it is about to
    /// free, avoiding a redundant lookup. The engine does not synchronize the
    /// command queue first; callers that mutated the buffer through kernels
    /// must synchronize before releasing the entity.
    fn sync_from_device(&self, buffer: &DeviceBuffer) -> Result<(), CacheError>;
}
