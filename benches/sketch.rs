use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use skmv_rs::Sketch;

const WINDOW: u64 = 100_000;
const STREAM_LEN: usize = 1 << 16;

struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed.max(1) }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }
}

fn make_stream(len: usize, flows: u64, values: u64, seed: u64) -> Vec<(u64, u64, u64)> {
    let mut rng = XorShift64::new(seed);
    (0..len)
        .map(|i| {
            (
                rng.next_u64() % flows,
                rng.next_u64() % values,
                i as u64,
            )
        })
        .collect()
}

fn bench_record(c: &mut Criterion) {
    let stream = make_stream(STREAM_LEN, 256, 1 << 20, 0xDECAF);
    let mut group = c.benchmark_group("record");
    group.throughput(Throughput::Elements(STREAM_LEN as u64));

    for (k, m) in [(16u32, 64u32), (64, 64), (64, 1024)] {
        group.bench_function(format!("k{k}_m{m}"), |b| {
            b.iter(|| {
                let mut sketch = Sketch::new(WINDOW, k, m, 32, 32).unwrap();
                for &(flow, element, t) in &stream {
                    sketch.record(flow, element, t);
                }
                black_box(sketch.current_time())
            });
        });
    }
    group.finish();
}

fn bench_estimate(c: &mut Criterion) {
    let stream = make_stream(STREAM_LEN, 256, 1 << 20, 0xDECAF);
    let mut group = c.benchmark_group("estimate");

    for (k, m) in [(64u32, 64u32), (64, 1024)] {
        let mut sketch = Sketch::new(WINDOW, k, m, 32, 32).unwrap();
        for &(flow, element, t) in &stream {
            sketch.record(flow, element, t);
        }
        group.bench_function(format!("k{k}_m{m}"), |b| {
            b.iter(|| black_box(sketch.estimate()));
        });
    }
    group.finish();
}

fn bench_periodic_clean(c: &mut Criterion) {
    let stream = make_stream(STREAM_LEN, 256, 1 << 20, 0xDECAF);
    let mut group = c.benchmark_group("periodic_clean");

    for (k, m) in [(64u32, 64u32), (64, 1024)] {
        let mut sketch = Sketch::new(WINDOW, k, m, 32, 32).unwrap();
        let mut t = 0;
        for &(flow, element, ts) in &stream {
            sketch.record(flow, element, ts);
            t = ts;
        }
        group.bench_function(format!("k{k}_m{m}"), |b| {
            b.iter(|| {
                sketch.periodic_clean(t);
                black_box(sketch.current_time())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_record, bench_estimate, bench_periodic_clean);
criterion_main!(benches);
