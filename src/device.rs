use super::error::CacheError;
use super::operation::CommandQueue;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// A bounded accelerator memory pool.
///
/// Allocation is accounted against a fixed physical capacity; the bytes of a
/// buffer are returned to the pool when the last clone of its [`DeviceBuffer`]
/// is dropped. Cloning a `Device` clones a handle to the same pool.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

struct DeviceInner {
    total_memory: usize,
    allocated: AtomicUsize,
}

impl Device {
    /// Creates a device with a fixed physical capacity in bytes.
    pub fn new(total_memory: usize) -> Self {
        Self {
            inner: Arc::new(DeviceInner {
                total_memory,
                allocated: AtomicUsize::new(0),
            }),
        }
    }

    pub fn total_memory(&self) -> usize {
        self.inner.total_memory
    }

    /// Bytes currently allocated out of the pool.
    pub fn allocated_bytes(&self) -> usize {
        self.inner.allocated.load(Ordering::Acquire)
    }

    pub fn new_command_queue(&self) -> CommandQueue {
        CommandQueue::new()
    }

    /// Allocates a zero-initialized buffer of `len` bytes.
    pub fn new_buffer(&self, len: usize) -> Result<DeviceBuffer, CacheError> {
        self.reserve(len)?;
        Ok(DeviceBuffer {
            storage: Arc::new(BufferStorage {
                id: NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed),
                len,
                data: Mutex::new(vec![0u8; len].into_boxed_slice()),
                device: self.inner.clone(),
            }),
        })
    }

    /// Allocates a buffer and synchronously copies `bytes` into it.
    pub fn new_buffer_with_bytes(&self, bytes: &[u8]) -> Result<DeviceBuffer, CacheError> {
        self.reserve(bytes.len())?;
        Ok(DeviceBuffer {
            storage: Arc::new(BufferStorage {
                id: NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed),
                len: bytes.len(),
                data: Mutex::new(bytes.to_vec().into_boxed_slice()),
                device: self.inner.clone(),
            }),
        })
    }

    fn reserve(&self, len: usize) -> Result<(), CacheError> {
        let total = self.inner.total_memory;
        self.inner
            .allocated
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_add(len).filter(|next| *next <= total)
            })
            .map_err(|_| CacheError::OutOfMemory)?;
        Ok(())
    }
}

/// A reference-counted device allocation with shared-storage semantics.
///
/// All clones alias the same backing memory, so a write issued through one
/// clone is observable through every other once the issuing command buffer
/// has been committed and waited on. Host-side reads of data produced by a
/// kernel are only valid after explicit synchronization.
#[derive(Clone)]
pub struct DeviceBuffer {
    storage: Arc<BufferStorage>,
}

struct BufferStorage {
    id: u64,
    len: usize,
    data: Mutex<Box<[u8]>>,
    device: Arc<DeviceInner>,
}

impl Drop for BufferStorage {
    fn drop(&mut self) {
        self.device.allocated.fetch_sub(self.len, Ordering::AcqRel);
    }
}

impl DeviceBuffer {
    pub fn id(&self) -> u64 {
        self.storage.id
    }

    pub fn len(&self) -> usize {
        self.storage.len
    }

    pub fn is_empty(&self) -> bool {
        self.storage.len == 0
    }

    /// True when both handles alias the same device allocation.
    pub fn ptr_eq(&self, other: &DeviceBuffer) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }

    /// Copies `src` into the buffer starting at byte `offset`.
    pub fn write_bytes(&self, offset: usize, src: &[u8]) -> Result<(), CacheError> {
        let mut data = self.storage.data.lock().unwrap_or_else(|e| e.into_inner());
        let end = offset
            .checked_add(src.len())
            .ok_or(CacheError::LengthMismatch {
                expected: self.storage.len,
                actual: usize::MAX,
            })?;
        if end > data.len() {
            return Err(CacheError::LengthMismatch {
                expected: data.len(),
                actual: end,
            });
        }
        data[offset..end].copy_from_slice(src);
        Ok(())
    }

    /// Copies bytes starting at `offset` into `dst`.
    pub fn read_bytes(&self, offset: usize, dst: &mut [u8]) -> Result<(), CacheError> {
        let data = self.storage.data.lock().unwrap_or_else(|e| e.into_inner());
        let end = offset
            .checked_add(dst.len())
            .ok_or(CacheError::LengthMismatch {
                expected: self.storage.len,
                actual: usize::MAX,
            })?;
        if end > data.len() {
            return Err(CacheError::LengthMismatch {
                expected: data.len(),
                actual: end,
            });
        }
        dst.copy_from_slice(&data[offset..end]);
        Ok(())
    }

    /// Snapshot of the full buffer contents.
    pub fn contents(&self) -> Vec<u8> {
        self.storage
            .data
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .to_vec()
    }

    /// Interprets the buffer as little-endian f32 values.
    pub fn read_f32(&self) -> Vec<f32> {
        bytes_to_f32(&self.contents())
    }

    /// Writes `values` as little-endian f32 starting at element 0.
    pub fn write_f32(&self, values: &[f32]) -> Result<(), CacheError> {
        self.write_bytes(0, &f32_to_bytes(values))
    }
}

pub(crate) fn f32_to_bytes(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

pub(crate) fn bytes_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
