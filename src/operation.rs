use super::error::CacheError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// A device operation that can encode itself into a command buffer.
///
/// Operations validate their arguments at construction time; `encode` runs
/// when the owning command buffer is committed.
pub trait Operation: Send {
    /// Execute this operation against its captured device buffers.
    fn encode(&self) -> Result<(), CacheError>;
}

/// Creates command buffers for a device execution context.
#[derive(Clone, Default)]
pub struct CommandQueue {
    _private: (),
}

impl CommandQueue {
    pub fn new() -> Self {
        Self { _private: () }
    }

    pub fn command_buffer(&self) -> CommandBuffer {
        CommandBuffer {
            inner: Arc::new(CommandBufferInner {
                ops: Mutex::new(Vec::new()),
                committed: AtomicBool::new(false),
                completed: AtomicBool::new(false),
            }),
        }
    }
}

/// A light wrapper that records high-level operations and executes them on
/// commit. Dispatch is asynchronous from the caller's point of view: nothing
/// recorded here runs until [`CommandBuffer::commit`], and results must not be
/// read until [`CommandBuffer::wait`] returns.
#[derive(Clone)]
pub struct CommandBuffer {
    inner: Arc<CommandBufferInner>,
}

struct CommandBufferInner {
    ops: Mutex<Vec<Box<dyn Operation>>>,
    committed: AtomicBool,
    completed: AtomicBool,
}

impl CommandBuffer {
    /// Record an operation on this command buffer.
    pub fn record(&self, operation: Box<dyn Operation>) -> Result<(), CacheError> {
        if self.is_committed() {
            return Err(CacheError::CommandBufferCommitted);
        }
        self.inner
            .ops
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(operation);
        Ok(())
    }

    /// Commit the command buffer for execution. Recorded operations run in
    /// submission order; committing twice is a no-op.
    pub fn commit(&self) -> Result<(), CacheError> {
        if self.inner.committed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let ops = std::mem::take(&mut *self.inner.ops.lock().unwrap_or_else(|e| e.into_inner()));
        for op in &ops {
            op.encode()?;
        }
        self.inner.completed.store(true, Ordering::Release);
        Ok(())
    }

    /// Block until the command buffer has completed.
    pub fn wait(&self) {
        debug_assert!(self.is_committed(), "wait() before commit()");
        while !self.is_completed() {
            std::hint::spin_loop();
        }
    }

    pub fn is_committed(&self) -> bool {
        self.inner.committed.load(Ordering::Acquire)
    }

    pub fn is_completed(&self) -> bool {
        self.inner.completed.load(Ordering::Acquire)
    }

    pub fn ptr_eq(&self, other: &CommandBuffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
