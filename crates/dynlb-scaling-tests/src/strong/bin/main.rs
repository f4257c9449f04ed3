//! Strong-scaling timing harness: a fixed global point count is divided
//! evenly across the world size, so per-rank work shrinks as the rank count
//! grows. Times `create` and one `update` call under a deliberately skewed
//! re-scatter, to see the cost of a forced rebuild at scale.

use std::time::Instant;

use mpi::topology::SystemCommunicator;
use mpi::traits::*;

use rand::distributions::Uniform;
use rand::prelude::*;
use rand::SeedableRng;

use dynlb::{Balancer, Config, Mode};

const GLOBAL_NPOINTS: u64 = 1_000_000;

fn points_fixture(rank: i32, n: u64) -> Vec<dynlb::Point> {
    let mut rng = StdRng::seed_from_u64(rank as u64);
    let between = Uniform::from(0.0..1.0);
    (0..n)
        .map(|i| {
            dynlb::Point::new(
                [between.sample(&mut rng), between.sample(&mut rng), between.sample(&mut rng)],
                i,
            )
        })
        .collect()
}

fn main() {
    let universe = mpi::initialize().expect("MPI_Init failed");
    let world: SystemCommunicator = universe.world();
    let rank = world.rank();
    let size = world.size() as u64;
    let comm = world.duplicate();

    let quotient = GLOBAL_NPOINTS / size;
    let remainder = GLOBAL_NPOINTS % size;
    let local_n = quotient + if (rank as u64) < remainder { 1 } else { 0 };
    let points = points_fixture(rank, local_n);

    let config = Config::new(0, 0, 0.1, Mode::Radix);
    let start = Instant::now();
    let mut balancer = Balancer::create(comm, &points, config).expect("create failed");
    let create_ms = start.elapsed().as_millis() as u64;

    // Re-scatter half the points to rank 0's local buffer to force a
    // noticeably skewed `update`, then time the resulting rebuild.
    let skewed: Vec<dynlb::Point> = if rank == 0 {
        points_fixture(rank, local_n * 2)
    } else {
        points_fixture(rank, local_n / 2)
    };
    let start = Instant::now();
    balancer.update(&skewed).expect("update failed");
    let update_ms = start.elapsed().as_millis() as u64;

    if rank == 0 {
        println!(
            "ranks={}, global_n={}, tree_size={}, imbalance={:.4}, create_ms={}, update_ms={}",
            world.size(),
            GLOBAL_NPOINTS,
            balancer.tree_size(),
            balancer.imbalance(),
            create_ms,
            update_ms,
        );
    }

    balancer.close().expect("close failed");
}
