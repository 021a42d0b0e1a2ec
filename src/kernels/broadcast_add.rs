use crate::device::DeviceBuffer;
use crate::error::CacheError;
use crate::operation::Operation;

/// Broadcast addition over f32 regions: `out[i] = a[i] + b[i % b.len()]`.
///
/// The broadcast operand's element count must divide the main operand's, and
/// `out` must match `a` exactly.
pub struct BroadcastAdd {
    a: DeviceBuffer,
    b: DeviceBuffer,
    out: DeviceBuffer,
}

impl BroadcastAdd {
    pub fn new(a: DeviceBuffer, b: DeviceBuffer, out: DeviceBuffer) -> Result<Self, CacheError> {
        if a.len() % 4 != 0 || b.len() % 4 != 0 {
            return Err(CacheError::InvalidShape(
                "broadcast add operates on f32 regions".to_string(),
            ));
        }
        if out.len() != a.len() {
            return Err(CacheError::LengthMismatch {
                expected: a.len(),
                actual: out.len(),
            });
        }
        if b.is_empty() || a.len() % b.len() != 0 {
            return Err(CacheError::InvalidShape(format!(
                "broadcast operand of {} bytes does not divide {} bytes",
                b.len(),
                a.len()
            )));
        }
        Ok(Self { a, b, out })
    }
}

impl Operation for BroadcastAdd {
    fn encode(&self) -> Result<(), CacheError> {
        let a = self.a.read_f32();
        let b = self.b.read_f32();
        let result: Vec<f32> = a.iter().enumerate().map(|(i, x)| x + b[i % b.len()]).collect();
        self.out.write_f32(&result)
    }
}
