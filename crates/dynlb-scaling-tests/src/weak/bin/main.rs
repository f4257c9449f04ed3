//! Weak-scaling timing harness: every rank contributes a fixed number of
//! points, so the global point count grows with the world size. Prints one
//! CSV line per run so results from several `mpirun -n <W>` invocations can
//! be concatenated.

use std::time::Instant;

use mpi::collective::SystemOperation;
use mpi::topology::SystemCommunicator;
use mpi::traits::*;

use rand::distributions::Uniform;
use rand::prelude::*;
use rand::SeedableRng;

use dynlb::{Balancer, Config, Mode};

const NPOINTS_PER_RANK: u64 = 100_000;

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
    let size = world.size();
    let comm = world.duplicate();

    let points = points_fixture(rank, NPOINTS_PER_RANK);

    let config = Config::new(0, 0, 0.1, Mode::Rcb);
    let start = Instant::now();
    let balancer = Balancer::create(comm, &points, config).expect("create failed");
    let elapsed_ms = start.elapsed().as_millis() as u64;

    let local_n = points.len() as u64;
    if rank == 0 {
        let mut global_n = 0u64;
        world
            .process_at_rank(0)
            .reduce_into_root(&local_n, &mut global_n, SystemOperation::sum());
        println!(
            "ranks={}, global_n={}, tree_size={}, imbalance={:.4}, create_ms={}",
            size,
            global_n,
            balancer.tree_size(),
            balancer.imbalance(),
            elapsed_ms,
        );
    } else {
        world
            .process_at_rank(0)
            .reduce_into(&local_n, SystemOperation::sum());
    }

    balancer.close().expect("close failed");
}
