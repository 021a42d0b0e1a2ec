use crate::device::DeviceBuffer;
use crate::error::CacheError;
use crate::operation::Operation;

/// Copies the contents of one device region into another of equal length.
pub struct ElemwiseCopy {
    src: DeviceBuffer,
    dst: DeviceBuffer,
}

impl ElemwiseCopy {
    pub fn new(src: DeviceBuffer, dst: DeviceBuffer) -> Result<Self, CacheError> {
        if src.len() != dst.len() {
            return Err(CacheError::LengthMismatch {
                expected: src.len(),
                actual: dst.len(),
            });
        }
        Ok(Self { src, dst })
    }
}

impl Operation for ElemwiseCopy {
    fn encode(&self) -> Result<(), CacheError> {
        let bytes = self.src.contents();
        self.dst.write_bytes(0, &bytes)
    }
}
