use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ingest_ratelimit::{BucketConfig, RateLimiter};

fn bench_consume(c: &mut Criterion) {
    let limiter = RateLimiter::default();
    let cfg = BucketConfig {
        max_tokens: 1_000.0,
        refill_rate_per_sec: 100.0,
        enabled: true,
    };
    c.bench_function("rate_limiter_consume", |b| {
        b.iter(|| limiter.consume(black_box("bench-key"), black_box(1.0), cfg));
    });
}

criterion_group!(benches, bench_consume);
criterion_main!(benches);
