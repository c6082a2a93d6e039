use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use blockfile_core::PartLayout;

fn bench_part_map(c: &mut Criterion) {
    let mut group = c.benchmark_group("compute_part_map");

    for (label, layout) in [
        ("linear", PartLayout::linear(64 * 1024)),
        ("circular", PartLayout::circular(64 * 1024, 1024 * 1024)),
    ] {
        for len in [512u64, 256 * 1024, 4 * 1024 * 1024] {
            group.bench_with_input(BenchmarkId::new(label, len), &len, |b, &len| {
                b.iter(|| layout.compute_part_map(black_box(1_000_000), black_box(len)))
            });
        }
    }
    group.finish();
}

fn bench_spans(c: &mut Criterion) {
    let layout = PartLayout::circular(4096, 64 * 4096);
    c.bench_function("spans_wrap", |b| {
        b.iter(|| layout.spans(black_box(250_000), black_box(40_000)).count())
    });
}

criterion_group!(benches, bench_part_map, bench_spans);
criterion_main!(benches);
