use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::prelude::*;
use rand::SeedableRng;

use dynlb::morton::order;
use dynlb::Point;

fn points_fixture(n: usize) -> Vec<Point> {
    let mut rng = StdRng::seed_from_u64(0);
    let between = rand::distributions::Uniform::from(0.0..1.0);
    (0..n)
        .map(|i| {
            Point::new(
                [between.sample(&mut rng), between.sample(&mut rng), between.sample(&mut rng)],
                i as u64,
            )
        })
        .collect()
}

fn benchmark_morton_order(c: &mut Criterion) {
    let points = points_fixture(1_000_000);

    c.bench_function("morton order 1e6 points", |b| {
        b.iter(|| {
            order(black_box(&points));
        })
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(30).measurement_time(std::time::Duration::from_secs(10));
    targets = benchmark_morton_order,
}
criterion_main!(benches);
