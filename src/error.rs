use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Utilization fraction {0} outside the open interval (0, 1)")]
    InvalidUtilization(f64),
    #[error("Requested {requested} bytes but the cache budget is only {budget} bytes")]
    CapacityExceeded { requested: usize, budget: usize },
    #[error("Eviction found no reclaimable entries while {needed} bytes were still required; every resident entry is live (unbalanced get/release?)")]
    MemoryLeak { needed: usize },
    #[error("Device out of memory")]
    OutOfMemory,
    #[error("Residency handle counter exhausted")]
    HandleOverflow,
    #[error("Buffer length mismatch: expected {expected}, actual {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("Invalid shape: {0}")]
    InvalidShape(String),
    #[error("Paired buffer has no compliment")]
    ComplimentMissing,
    #[error("Paired buffer storage not allocated")]
    BufferNotAllocated,
    #[error("Compliment link must be established before either side allocates")]
    PairingAfterAllocation,
    #[error("Command buffer already committed")]
    CommandBufferCommitted,
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}
