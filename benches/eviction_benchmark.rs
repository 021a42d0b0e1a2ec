//! Benchmark for the eviction engine under admit/evict churn.
//!
//! A working set larger than the budget forces an eviction on most
//! admissions, which is the hot path during a training step.
use criterion::{criterion_group, criterion_main, Criterion};
use devcache::cacheable::Cacheable;
use devcache::{Device, EvictionEngine, Tensor};
use std::sync::Arc;

fn benchmark_admit_evict_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("eviction_engine");

    group.bench_function("admit_evict_churn", |b| {
        let device = Device::new(64 * 1024);
        let engine = EvictionEngine::with_utilization(device, 64 * 1024, 0.75).unwrap();
        let tensors: Vec<Arc<Tensor>> = (0..64)
            .map(|i| Tensor::new(vec![256], vec![i as f32; 256]).unwrap())
            .collect();
        b.iter(|| {
            for tensor in &tensors {
                let entity: Arc<dyn Cacheable> = tensor.clone();
                engine.admit(&entity, &tensor.host_snapshot()).unwrap();
            }
        });
    });

    group.bench_function("lookup_resident", |b| {
        let device = Device::new(64 * 1024);
        let engine = EvictionEngine::with_utilization(device, 64 * 1024, 0.75).unwrap();
        let tensor = Tensor::new(vec![256], vec![1.0; 256]).unwrap();
        let entity: Arc<dyn Cacheable> = tensor.clone();
        let handle = engine.admit(&entity, &tensor.host_snapshot()).unwrap();
        b.iter(|| {
            let _ = engine.lookup(handle);
        });
    });

    group.finish();
}

criterion_group!(benches, benchmark_admit_evict_churn);
criterion_main!(benches);
