use super::cacheable::{CacheState, Cacheable};
use super::context::Context;
use super::device::{bytes_to_f32, f32_to_bytes, DeviceBuffer};
use super::error::CacheError;
use std::sync::{Arc, Mutex};

/// A host-resident f32 tensor mirrorable to device memory.
///
/// The host array logically always exists; device residency is managed by the
/// eviction engine through the embedded [`CacheState`]. Entities are shared
/// as `Arc<Tensor>` so the engine can hold a weak reference without keeping
/// the tensor alive.
pub struct Tensor {
    dims: Vec<usize>,
    host: Mutex<Vec<f32>>,
    state: CacheState,
}

impl Tensor {
    /// Creates a tensor from host data, validating the element count against
    /// `dims`.
    pub fn new(dims: Vec<usize>, data: Vec<f32>) -> Result<Arc<Self>, CacheError> {
        let expected: usize = dims.iter().product();
        if expected != data.len() {
            return Err(CacheError::LengthMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Arc::new(Self {
            dims,
            host: Mutex::new(data),
            state: CacheState::new(),
        }))
    }

    /// Creates a zero-filled tensor.
    pub fn zeros(dims: Vec<usize>) -> Arc<Self> {
        let len: usize = dims.iter().product();
        Arc::new(Self {
            dims,
            host: Mutex::new(vec![0.0; len]),
            state: CacheState::new(),
        })
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn len(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clone of the current host array.
    pub fn host_data(&self) -> Vec<f32> {
        self.host.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Overwrites the host array. Does not touch device residency; call
    /// through the context if a device mirror exists.
    pub fn set_host_data(&self, data: Vec<f32>) -> Result<(), CacheError> {
        if data.len() != self.len() {
            return Err(CacheError::LengthMismatch {
                expected: self.len(),
                actual: data.len(),
            });
        }
        *self.host.lock().unwrap_or_else(|e| e.into_inner()) = data;
        Ok(())
    }

    /// Device view of this tensor, admitting on demand. Must be balanced
    /// with [`release`](Self::release).
    pub fn device_view(self: &Arc<Self>, ctx: &mut Context) -> Result<DeviceBuffer, CacheError> {
        let entity: Arc<dyn Cacheable> = self.clone();
        ctx.get_device_view(&entity)
    }

    /// Device view without the host upload, for write-before-read outputs.
    pub fn device_view_empty(self: &Arc<Self>, ctx: &mut Context) -> Result<DeviceBuffer, CacheError> {
        let entity: Arc<dyn Cacheable> = self.clone();
        ctx.get_device_view_empty(&entity)
    }

    pub fn release(&self, ctx: &Context) {
        ctx.release(self);
    }

    pub fn sync_to_host(&self, ctx: &mut Context) -> Result<(), CacheError> {
        ctx.sync_to_host(self)
    }
}

impl Cacheable for Tensor {
    fn cache_state(&self) -> &CacheState {
        &self.state
    }

    fn byte_size(&self) -> usize {
        self.len() * std::mem::size_of::<f32>()
    }

    fn host_snapshot(&self) -> Vec<u8> {
        f32_to_bytes(&self.host.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn sync_from_device(&self, buffer: &DeviceBuffer) -> Result<(), CacheError> {
        if buffer.len() != self.byte_size() {
            return Err(CacheError::LengthMismatch {
                expected: self.byte_size(),
                actual: buffer.len(),
            });
        }
        let values = bytes_to_f32(&buffer.contents());
        *self.host.lock().unwrap_or_else(|e| e.into_inner()) = values;
        Ok(())
    }
}
