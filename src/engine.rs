use super::cacheable::Cacheable;
use super::device::{Device, DeviceBuffer};
use super::error::CacheError;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Opaque identifier for a device-memory residency.
pub type Handle = u64;

/// The handle value meaning "no device mapping". Never minted.
pub const NOT_RESIDENT: Handle = 0;

/// Binds a device allocation to a weak reference to its owning entity.
///
/// The weak reference must never keep the owner alive: an entity dropped by
/// the host becomes evictable without a host writeback.
struct CacheRecord {
    buffer: DeviceBuffer,
    owner: Weak<dyn Cacheable>,
}

/// Map and recency queue, mutated together under one lock. Every handle in
/// the queue is in the map and vice versa, except while a victim is detached
/// during an eviction transition.
struct EngineInner {
    map: FxHashMap<Handle, CacheRecord>,
    queue: VecDeque<Handle>,
}

/// Statistics about the engine's admission and eviction activity.
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub budget: usize,
    pub usage: usize,
    pub resident: usize,
    pub admitted_total: usize,
    pub evicted_total: usize,
}

/// The device-memory eviction engine.
///
/// Owns the bounded byte budget, the handle→record map and the recency queue.
/// Admission evicts least-recently-evictable, non-live entries until the new
/// allocation fits; eviction synchronizes an entry's data back to its host
/// object before freeing device memory. Map and queue are only mutated under
/// the engine mutex; the mutex is held for bookkeeping only, never across a
/// host↔device transfer.
pub struct EvictionEngine {
    device: Device,
    budget: usize,
    usage: AtomicUsize,
    next_handle: AtomicU64,
    admitted_total: AtomicUsize,
    evicted_total: AtomicUsize,
    inner: Mutex<EngineInner>,
}

impl EvictionEngine {
    /// Creates an engine with an explicit byte budget.
    pub fn new(device: Device, budget: usize) -> Self {
        Self {
            device,
            budget,
            usage: AtomicUsize::new(0),
            next_handle: AtomicU64::new(1),
            admitted_total: AtomicUsize::new(0),
            evicted_total: AtomicUsize::new(0),
            inner: Mutex::new(EngineInner {
                map: FxHashMap::default(),
                queue: VecDeque::new(),
            }),
        }
    }

    /// Creates an engine sized as a fraction of total device memory.
    ///
    /// The fraction must lie strictly inside (0, 1); the remainder is
    /// headroom for driver overhead and allocations that live outside the
    /// cache, such as paired buffers.
    pub fn with_utilization(
        device: Device,
        total_memory: usize,
        utilization_fraction: f64,
    ) -> Result<Self, CacheError> {
        if !(utilization_fraction > 0.0 && utilization_fraction < 1.0) {
            return Err(CacheError::InvalidUtilization(utilization_fraction));
        }
        let budget = (total_memory as f64 * utilization_fraction) as usize;
        Ok(Self::new(device, budget))
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn usage(&self) -> usize {
        self.usage.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock_inner();
        CacheStats {
            budget: self.budget,
            usage: self.usage(),
            resident: inner.map.len(),
            admitted_total: self.admitted_total.load(Ordering::Relaxed),
            evicted_total: self.evicted_total.load(Ordering::Relaxed),
        }
    }

    /// Admits `entity`, uploading `payload` into a fresh device allocation.
    pub fn admit(&self, entity: &Arc<dyn Cacheable>, payload: &[u8]) -> Result<Handle, CacheError> {
        self.admit_inner(entity, payload.len(), Some(payload))
    }

    /// Same reservation logic as [`admit`](Self::admit) but leaves the
    /// allocation zero-initialized, for write-before-read outputs.
    pub fn admit_empty(&self, entity: &Arc<dyn Cacheable>, len: usize) -> Result<Handle, CacheError> {
        self.admit_inner(entity, len, None)
    }

    /// Resolves a handle to its device buffer. `NOT_RESIDENT` is always absent.
    pub fn lookup(&self, handle: Handle) -> Option<DeviceBuffer> {
        if handle == NOT_RESIDENT {
            return None;
        }
        self.lock_inner().map.get(&handle).map(|r| r.buffer.clone())
    }

    /// Frees the entry behind `handle` if its owner is not live.
    ///
    /// Returns `NOT_RESIDENT` when the entry was removed (or never existed),
    /// or the original handle when removal was refused because the owner is
    /// live. Refusal is an expected, frequent outcome during training, not an
    /// error; the refused entry moves to the tail of the recency queue.
    pub fn remove(&self, handle: Handle) -> Result<Handle, CacheError> {
        if handle == NOT_RESIDENT {
            return Ok(NOT_RESIDENT);
        }
        let record = {
            let mut inner = self.lock_inner();
            let Some(record) = inner.map.remove(&handle) else {
                return Ok(NOT_RESIDENT);
            };
            let live = record
                .owner
                .upgrade()
                .map(|owner| owner.cache_state().live_count())
                .unwrap_or(0);
            if live > 0 {
                inner.map.insert(handle, record);
                move_to_tail(&mut inner.queue, handle);
                return Ok(handle);
            }
            inner.queue.retain(|h| *h != handle);
            record
        };
        self.free_record(handle, record)?;
        Ok(NOT_RESIDENT)
    }

    fn admit_inner(
        &self,
        entity: &Arc<dyn Cacheable>,
        size: usize,
        payload: Option<&[u8]>,
    ) -> Result<Handle, CacheError> {
        if size > self.budget {
            return Err(CacheError::CapacityExceeded {
                requested: size,
                budget: self.budget,
            });
        }

        // Free victims until the reservation fits. Victims are detached under
        // the lock and synchronized/freed outside it, so freeing evicted
        // memory strictly precedes uploading the new payload.
        loop {
            let victim = {
                let mut inner = self.lock_inner();
                if self.try_reserve(size) {
                    None
                } else {
                    Some(self.detach_victim(&mut inner, size)?)
                }
            };
            match victim {
                None => break,
                Some((handle, record)) => self.free_record(handle, record)?,
            }
        }

        let allocated = match payload {
            Some(bytes) => self.device.new_buffer_with_bytes(bytes),
            None => self.device.new_buffer(size),
        };
        let buffer = match allocated {
            Ok(buffer) => buffer,
            Err(e) => {
                self.usage.fetch_sub(size, Ordering::AcqRel);
                return Err(e);
            }
        };
        let handle = match self.mint_handle() {
            Ok(handle) => handle,
            Err(e) => {
                self.usage.fetch_sub(size, Ordering::AcqRel);
                return Err(e);
            }
        };

        {
            let mut inner = self.lock_inner();
            inner.map.insert(
                handle,
                CacheRecord {
                    buffer,
                    owner: Arc::downgrade(entity),
                },
            );
            inner.queue.push_back(handle);
        }
        entity.cache_state().set_handle(handle);
        self.admitted_total.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(handle, size, "admitted entity");
        Ok(handle)
    }

    /// Scans the recency queue oldest-evictable-first for a victim, detaching
    /// it from map and queue. Live candidates are re-enqueued at the tail, so
    /// hot entries migrate away from the front. One full fruitless pass means
    /// everything resident is live: fatal, a caller bug rather than pressure.
    fn detach_victim(
        &self,
        inner: &mut EngineInner,
        needed: usize,
    ) -> Result<(Handle, CacheRecord), CacheError> {
        let mut scanned = 0;
        let limit = inner.queue.len();
        while scanned < limit {
            let Some(handle) = inner.queue.pop_front() else {
                break;
            };
            let Some(record) = inner.map.remove(&handle) else {
                continue;
            };
            let live = record
                .owner
                .upgrade()
                .map(|owner| owner.cache_state().live_count())
                .unwrap_or(0);
            if live == 0 {
                return Ok((handle, record));
            }
            inner.map.insert(handle, record);
            inner.queue.push_back(handle);
            scanned += 1;
        }
        tracing::error!(
            needed,
            resident = inner.map.len(),
            "eviction exhausted: every resident entry is live"
        );
        Err(CacheError::MemoryLeak { needed })
    }

    /// Synchronizes a detached record back to its owner (if still reachable)
    /// and frees the device memory. Runs outside the engine lock.
    fn free_record(&self, handle: Handle, record: CacheRecord) -> Result<(), CacheError> {
        let size = record.buffer.len();
        let synced = match record.owner.upgrade() {
            Some(owner) => {
                let result = owner.sync_from_device(&record.buffer);
                owner.cache_state().set_handle(NOT_RESIDENT);
                result
            }
            // Owner dropped by the host: nothing to write back.
            None => Ok(()),
        };
        drop(record);
        self.usage.fetch_sub(size, Ordering::AcqRel);
        self.evicted_total.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(handle, size, "evicted entry");
        synced
    }

    /// Reserves `size` bytes against the budget if they fit.
    fn try_reserve(&self, size: usize) -> bool {
        self.usage
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |usage| {
                usage.checked_add(size).filter(|next| *next <= self.budget)
            })
            .is_ok()
    }

    /// Mints a monotonically increasing handle. Handles are never zero and
    /// never reused; exhausting the counter fails loudly instead of wrapping.
    fn mint_handle(&self) -> Result<Handle, CacheError> {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        if handle == NOT_RESIDENT || handle == u64::MAX {
            return Err(CacheError::HandleOverflow);
        }
        Ok(handle)
    }

    fn lock_inner(&self) -> MutexGuard<'_, EngineInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of the handles in the map and in the recency queue, used by
    /// tests to check that the two structures agree.
    #[cfg(test)]
    pub(crate) fn handle_sets(&self) -> (Vec<Handle>, Vec<Handle>) {
        let inner = self.lock_inner();
        let mut map_handles: Vec<Handle> = inner.map.keys().copied().collect();
        map_handles.sort_unstable();
        let mut queue_handles: Vec<Handle> = inner.queue.iter().copied().collect();
        queue_handles.sort_unstable();
        (map_handles, queue_handles)
    }
}

fn move_to_tail(queue: &mut VecDeque<Handle>, handle: Handle) {
    if let Some(pos) = queue.iter().position(|h| *h == handle) {
        queue.remove(pos);
        queue.push_back(handle);
    }
}
