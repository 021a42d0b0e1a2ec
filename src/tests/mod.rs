use crate::cacheable::Cacheable;
use crate::tensor::Tensor;
use std::sync::Arc;

mod kernels_test;
mod tensor_test;

/// Coerces a tensor into the trait object the engine trades in.
fn entity(tensor: &Arc<Tensor>) -> Arc<dyn Cacheable> {
    tensor.clone()
}

/// A 300-byte tensor (75 f32 elements) filled with `fill`.
fn tensor_300b(fill: f32) -> Arc<Tensor> {
    Tensor::new(vec![75], vec![fill; 75]).expect("shape matches data")
}
