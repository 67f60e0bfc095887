//! Benchmarks for the checkpoint hot path: fingerprinting, payload
//! encoding, and diffing, at a few payload sizes (`spec.md` §4.A/§4.D).
//!
//! Grounded on `weavegraph/benches/event_bus_throughput.rs`'s
//! `to_async(&runtime)` pattern for the parts that need a live `DagEngine`.

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rustc_hash::FxHashMap;
use tokio::runtime::Runtime;

use mindtrace::backend::memory::MemoryBackend;
use mindtrace::dag::DagEngine;
use mindtrace::serializer::{Serializer, SerializerFlavor};
use mindtrace::value::Value;

const STATE_SIZES: &[usize] = &[8, 64, 512];

fn flat_state(fields: usize) -> Value {
    let mut map = FxHashMap::default();
    for i in 0..fields {
        map.insert(format!("field_{i}"), Value::Number(i as f64));
    }
    Value::Map(map)
}

fn fingerprint_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("fingerprint");
    let metadata = Value::map();
    for &size in STATE_SIZES {
        let state = flat_state(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &state, |b, state| {
            b.iter(|| Serializer::fingerprint(state, &metadata, "bench_step"));
        });
    }
    group.finish();
}

fn encode_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    for &size in STATE_SIZES {
        let state = flat_state(size);
        for flavor in [
            SerializerFlavor::Text,
            SerializerFlavor::Binary,
            SerializerFlavor::Compressed,
        ] {
            let serializer = Serializer::new(flavor);
            group.throughput(Throughput::Elements(size as u64));
            group.bench_with_input(
                BenchmarkId::new(format!("{flavor:?}"), size),
                &state,
                |b, state| {
                    b.iter(|| serializer.encode(state).unwrap());
                },
            );
        }
    }
    group.finish();
}

async fn checkpoint_chain(length: usize) -> (DagEngine, String, String) {
    let mut engine = DagEngine::open(Arc::new(MemoryBackend::new())).await.unwrap();
    let mut first_id = String::new();
    let mut last_id = String::new();
    for i in 0..length {
        let cp = engine
            .checkpoint(flat_state(16), FxHashMap::default(), format!("step {i}"), "bench")
            .await
            .unwrap();
        if i == 0 {
            first_id = cp.id.clone();
        }
        last_id = cp.id;
    }
    (engine, first_id, last_id)
}

fn diff_bench(c: &mut Criterion) {
    let runtime = Runtime::new().expect("runtime");
    let mut group = c.benchmark_group("diff");

    for &depth in &[2usize, 16, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            b.to_async(&runtime).iter(|| async move {
                let (engine, first_id, last_id) = checkpoint_chain(depth).await;
                engine.diff(&first_id, &last_id).await.unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(benches, fingerprint_bench, encode_bench, diff_bench);
criterion_main!(benches);
