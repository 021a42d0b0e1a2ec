use super::device::{Device, DeviceBuffer};
use super::error::CacheError;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// One side of a per-stage double buffer.
///
/// Two paired buffers mirror each other: the device memory backing "output of
/// A" is identical to "input of B", which is what lets the layer-graph
/// executor hand tensor data between adjacent stages without a copy. Storage
/// is allocated directly from the device, outside the eviction engine,
/// because its lifetime spans a whole batch.
#[derive(Clone)]
pub struct PairedBuffer {
    inner: Arc<Mutex<PairedInner>>,
}

struct PairedInner {
    device: Device,
    storage: Option<DeviceBuffer>,
    /// Running maximum of registered per-batch-item lengths, in f32 elements.
    /// Never shrinks.
    max_len: usize,
    compliment: Weak<Mutex<PairedInner>>,
}

impl PairedBuffer {
    pub fn new(device: &Device) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PairedInner {
                device: device.clone(),
                storage: None,
                max_len: 0,
                compliment: Weak::new(),
            })),
        }
    }

    /// Establishes the mutual compliment link between `a` and `b`.
    ///
    /// Must be called before either side allocates; re-pairing after an
    /// independent allocation would silently split the shared storage, so it
    /// is refused outright.
    pub fn set_compliment(a: &PairedBuffer, b: &PairedBuffer) -> Result<(), CacheError> {
        if Arc::ptr_eq(&a.inner, &b.inner) {
            return Err(CacheError::InvalidOperation(
                "paired buffer cannot be its own compliment".to_string(),
            ));
        }
        let mut a_inner = a.lock();
        let mut b_inner = b.lock();
        if a_inner.storage.is_some() || b_inner.storage.is_some() {
            return Err(CacheError::PairingAfterAllocation);
        }
        a_inner.compliment = Arc::downgrade(&b.inner);
        b_inner.compliment = Arc::downgrade(&a.inner);
        Ok(())
    }

    /// Registers a per-batch-item length requirement in f32 elements.
    ///
    /// May be called repeatedly before allocation; only the running maximum
    /// is remembered.
    pub fn register_required_length(&self, n: usize) {
        let mut inner = self.lock();
        inner.max_len = inner.max_len.max(n);
    }

    pub fn required_length(&self) -> usize {
        self.lock().max_len
    }

    /// Sizes the storage for `batch_size` items of the registered maximum
    /// length. A no-op when current storage already suffices; otherwise a
    /// fresh allocation replaces prior storage.
    pub fn allocate(&self, batch_size: usize) -> Result<(), CacheError> {
        let mut inner = self.lock();
        let needed = inner.max_len * batch_size * std::mem::size_of::<f32>();
        if let Some(storage) = &inner.storage {
            if storage.len() >= needed {
                return Ok(());
            }
        }
        let device = inner.device.clone();
        // Release the old allocation back to the pool before replacing it.
        inner.storage = None;
        inner.storage = Some(device.new_buffer(needed)?);
        Ok(())
    }

    pub fn is_allocated(&self) -> bool {
        self.lock().storage.is_some()
    }

    /// This side's own storage, written by the producing stage.
    pub fn output(&self) -> Result<DeviceBuffer, CacheError> {
        self.lock().storage.clone().ok_or(CacheError::BufferNotAllocated)
    }

    /// The compliment's storage, read by the consuming stage. Defined purely
    /// via the compliment: same backing memory as its output.
    pub fn input(&self) -> Result<DeviceBuffer, CacheError> {
        let compliment = self
            .lock()
            .compliment
            .upgrade()
            .ok_or(CacheError::ComplimentMissing)?;
        let guard = compliment.lock().unwrap_or_else(|e| e.into_inner());
        guard.storage.clone().ok_or(CacheError::BufferNotAllocated)
    }

    fn lock(&self) -> MutexGuard<'_, PairedInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
