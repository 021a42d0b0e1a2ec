use super::cacheable::Cacheable;
use super::device::{Device, DeviceBuffer};
use super::engine::{CacheStats, EvictionEngine, Handle};
use super::error::CacheError;
use super::kernels::{BroadcastAdd, ElemwiseCopy};
use super::operation::{CommandBuffer, CommandQueue};
use std::sync::Arc;

/// Construction parameters for a [`Context`].
///
/// The utilization fraction reserves headroom below physical capacity for
/// driver overhead and allocations that live outside the cache, such as
/// paired buffers. It must lie strictly inside (0, 1).
#[derive(Debug, Clone, Copy)]
pub struct ContextConfig {
    pub total_device_memory: usize,
    pub utilization_fraction: f64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            total_device_memory: 1024 * 1024 * 1024,
            utilization_fraction: 0.75,
        }
    }
}

/// The device manager: owns the accelerator execution context, the eviction
/// engine and the utility kernels.
///
/// Constructed once at startup and passed by reference to every collaborator;
/// there is deliberately no process-wide singleton, so tests can run isolated
/// instances side by side.
pub struct Context {
    pub device: Device,
    pub command_queue: CommandQueue,
    engine: EvictionEngine,
    /// Lazily created command buffer used to batch kernel dispatches until
    /// synchronization.
    active_cmd_buffer: Option<CommandBuffer>,
}

impl Context {
    pub fn new(config: ContextConfig) -> Result<Self, CacheError> {
        let device = Device::new(config.total_device_memory);
        let engine = EvictionEngine::with_utilization(
            device.clone(),
            config.total_device_memory,
            config.utilization_fraction,
        )?;
        let command_queue = device.new_command_queue();
        Ok(Self {
            device,
            command_queue,
            engine,
            active_cmd_buffer: None,
        })
    }

    pub fn engine(&self) -> &EvictionEngine {
        &self.engine
    }

    /// Synchronize pending device work, committing and waiting on the active
    /// command buffer. This is the only blocking point exposed to callers;
    /// every read that depends on a kernel's result must pass through here
    /// first, ordering is never implicit.
    pub fn synchronize(&mut self) -> Result<(), CacheError> {
        if let Some(cmd_buf) = self.active_cmd_buffer.take() {
            cmd_buf.commit()?;
            cmd_buf.wait();
        }
        Ok(())
    }

    /// Returns a device view of `entity`, admitting it on demand.
    ///
    /// Increments the entity's live counter; the caller must balance this
    /// with [`release`](Self::release) or the entry starves eviction.
    pub fn get_device_view(&mut self, entity: &Arc<dyn Cacheable>) -> Result<DeviceBuffer, CacheError> {
        self.device_view_inner(entity, false)
    }

    /// Like [`get_device_view`](Self::get_device_view) but skips the host
    /// upload, reserving zeroed memory for write-before-read outputs.
    pub fn get_device_view_empty(
        &mut self,
        entity: &Arc<dyn Cacheable>,
    ) -> Result<DeviceBuffer, CacheError> {
        self.device_view_inner(entity, true)
    }

    /// Decrements the entity's live counter.
    pub fn release(&self, entity: &dyn Cacheable) {
        entity.cache_state().release();
    }

    /// Forces the host array to match device contents if the entity is
    /// resident; a no-op otherwise. Synchronizes pending kernels first.
    pub fn sync_to_host(&mut self, entity: &dyn Cacheable) -> Result<(), CacheError> {
        let handle = entity.cache_state().handle();
        let Some(buffer) = self.engine.lookup(handle) else {
            return Ok(());
        };
        self.synchronize()?;
        entity.sync_from_device(&buffer)
    }

    pub fn admit(&self, entity: &Arc<dyn Cacheable>, payload: &[u8]) -> Result<Handle, CacheError> {
        self.engine.admit(entity, payload)
    }

    pub fn admit_empty(&self, entity: &Arc<dyn Cacheable>, len: usize) -> Result<Handle, CacheError> {
        self.engine.admit_empty(entity, len)
    }

    pub fn lookup(&self, handle: Handle) -> Option<DeviceBuffer> {
        self.engine.lookup(handle)
    }

    pub fn remove(&self, handle: Handle) -> Result<Handle, CacheError> {
        self.engine.remove(handle)
    }

    pub fn stats(&self) -> CacheStats {
        self.engine.stats()
    }

    /// Records an elementwise copy between two equal-length device regions.
    pub fn copy_buffer(&mut self, src: &DeviceBuffer, dst: &DeviceBuffer) -> Result<(), CacheError> {
        let op = ElemwiseCopy::new(src.clone(), dst.clone())?;
        self.active_command_buffer().record(Box::new(op))
    }

    /// Records a broadcast add: `out[i] = a[i] + b[i % b.len()]` over f32.
    pub fn broadcast_add(
        &mut self,
        a: &DeviceBuffer,
        b: &DeviceBuffer,
        out: &DeviceBuffer,
    ) -> Result<(), CacheError> {
        let op = BroadcastAdd::new(a.clone(), b.clone(), out.clone())?;
        self.active_command_buffer().record(Box::new(op))
    }

    fn device_view_inner(
        &mut self,
        entity: &Arc<dyn Cacheable>,
        empty: bool,
    ) -> Result<DeviceBuffer, CacheError> {
        let state = entity.cache_state();
        // Retain before admission so the fresh entry cannot be chosen as an
        // eviction victim by a nested admit.
        state.retain();
        if let Some(buffer) = self.engine.lookup(state.handle()) {
            return Ok(buffer);
        }
        let admitted = if empty {
            self.engine.admit_empty(entity, entity.byte_size())
        } else {
            let snapshot = entity.host_snapshot();
            self.engine.admit(entity, &snapshot)
        };
        let handle = match admitted {
            Ok(handle) => handle,
            Err(e) => {
                state.release();
                return Err(e);
            }
        };
        self.engine.lookup(handle).ok_or_else(|| {
            CacheError::InvalidOperation("admitted entry vanished before first lookup".to_string())
        })
    }

    fn active_command_buffer(&mut self) -> &CommandBuffer {
        let should_refresh = self
            .active_cmd_buffer
            .as_ref()
            .map(|active| active.is_committed())
            .unwrap_or(false);
        if should_refresh {
            self.active_cmd_buffer = None;
        }
        if self.active_cmd_buffer.is_none() {
            self.active_cmd_buffer = Some(self.command_queue.command_buffer());
        }
        self.active_cmd_buffer
            .as_ref()
            .expect("active command buffer must exist")
    }
}
