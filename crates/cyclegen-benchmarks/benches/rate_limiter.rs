use std::sync::Arc;

use cyclegen_core::RateSpec;
use cyclegen_engine::RateLimiter;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::runtime::Runtime;

const OPS: u64 = 10_000;

/// Admission cost with a rate far above what the loop can reach, so no
/// op ever sleeps and the measurement is the bookkeeping itself.
fn admission_benchmarks(c: &mut Criterion) {
    let runtime = Runtime::new().expect("tokio runtime");
    let mut group = c.benchmark_group("rate_limiter");
    group.throughput(Throughput::Elements(OPS));

    for (label, spec) in [
        ("disabled", None),
        ("best_effort", Some(RateSpec::new(1.0e12))),
        ("strict", Some(RateSpec::new(1.0e12).strict())),
    ] {
        group.bench_function(BenchmarkId::new("single_task", label), |b| {
            b.to_async(&runtime).iter(|| async {
                let limiter = RateLimiter::new("bench", spec);
                for _ in 0..OPS {
                    black_box(limiter.maybe_wait_for_op().await);
                }
            });
        });
    }

    for tasks in [4u64, 16] {
        group.bench_function(BenchmarkId::new("contended", tasks), |b| {
            b.to_async(&runtime).iter(|| async {
                let limiter = Arc::new(RateLimiter::new("bench", Some(RateSpec::new(1.0e12))));
                let handles: Vec<_> = (0..tasks)
                    .map(|_| {
                        let limiter = Arc::clone(&limiter);
                        tokio::spawn(async move {
                            for _ in 0..OPS / tasks {
                                black_box(limiter.maybe_wait_for_op().await);
                            }
                        })
                    })
                    .collect();
                for handle in handles {
                    handle.await.expect("limiter task");
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, admission_benchmarks);
criterion_main!(benches);
