pub use context::{Context, ContextConfig};
pub use device::{Device, DeviceBuffer};
pub use engine::{CacheStats, EvictionEngine, Handle, NOT_RESIDENT};
pub use error::CacheError;
pub use operation::{CommandBuffer, CommandQueue, Operation};
pub use paired::PairedBuffer;
pub use tensor::Tensor;

pub mod cacheable;
pub mod context;
pub mod device;
pub mod engine;
pub mod error;
pub mod kernels;
pub mod operation;
pub mod paired;
pub mod tensor;

#[cfg(test)]
mod tests;
