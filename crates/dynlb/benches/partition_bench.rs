use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::prelude::*;
use rand::SeedableRng;

use dynlb::partition::{radix, rcb};
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

fn benchmark_radix_build(c: &mut Criterion) {
    let points = points_fixture(200_000);
    c.bench_function("radix build 2e5 points", |b| {
        b.iter(|| {
            radix::build(black_box(&points), 64);
        })
    });
}

fn benchmark_rcb_build(c: &mut Criterion) {
    let points = points_fixture(200_000);
    c.bench_function("rcb build 2e5 points, 64 leaves", |b| {
        b.iter(|| {
            rcb::build(black_box(&points), 64);
        })
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(30).measurement_time(std::time::Duration::from_secs(10));
    targets = benchmark_radix_build,
              benchmark_rcb_build,
}
criterion_main!(benches);
