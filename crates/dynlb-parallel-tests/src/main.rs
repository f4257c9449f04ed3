//! Cross-rank correctness checks for `dynlb`, run under real MPI ranks
//! (`mpirun -n <W> target/debug/dynlb-parallel-tests`). These exercise
//! properties that a single-process `#[test]` cannot: collective agreement
//! on the replicated tree, worker-ID range across ranks, and the
//! imbalance-triggered rebuild.

use mpi::topology::{SystemCommunicator, UserCommunicator};
use mpi::traits::*;

use rand::distributions::Uniform;
use rand::prelude::*;
use rand::SeedableRng;

use dynlb::{morton_balance, Balancer, Config, Mode, Point};

const NPOINTS_PER_RANK: usize = 2_000;

fn points_fixture(rank: i32, n: usize) -> Vec<Point> {
    let mut rng = StdRng::seed_from_u64(rank as u64);
    let between = Uniform::from(0.0..1.0);
    (0..n)
        .map(|i| {
            Point::new(
                [between.sample(&mut rng), between.sample(&mut rng), between.sample(&mut rng)],
                i as u64,
            )
        })
        .collect()
}

/// Every worker ID returned by `morton_balance` must be in `[0, W)`, and
/// every rank must get back exactly as many assignments as it sent points.
fn test_morton_balance_covers_all_ranks(comm: &UserCommunicator) {
    let rank = comm.rank();
    let size = comm.size();
    let points = points_fixture(rank, NPOINTS_PER_RANK);

    let assignment = morton_balance(comm, &points).expect("morton_balance failed");
    assert_eq!(assignment.len(), points.len());
    for &worker in &assignment {
        assert!((worker as i32) < size, "worker id {} out of range for {} ranks", worker, size);
    }
    tracing::info!(rank, assigned = assignment.len(), "morton balance covered all local points");
}

/// Every rank must observe a byte-identical tree after `create`: compare tree
/// size and imbalance, which are only equal across ranks if the broadcast
/// replicated the same node array everywhere.
fn test_create_replicates_tree_identically(comm: &UserCommunicator) {
    let rank = comm.rank();
    let size = comm.size();
    let points = points_fixture(rank, NPOINTS_PER_RANK);

    let config = Config::new(0, 0, 0.2, Mode::Rcb);
    let balancer = Balancer::create(comm.duplicate(), &points, config).expect("create failed");

    let local_size = balancer.tree_size() as u64;
    let mut sizes = vec![0u64; size as usize];
    comm.all_gather_into(&local_size, &mut sizes[..]);
    assert!(
        sizes.iter().all(|&s| s == sizes[0]),
        "rank {} saw divergent tree sizes across ranks: {:?}",
        rank,
        sizes
    );

    for point in &points {
        let worker = balancer.point_assign(point);
        assert!((worker as i32) < size);
    }
    balancer.close().expect("close failed");
}

/// A handle with a near-empty worker starts with infinite imbalance (per the
/// 0/0 -> +inf rule) and `update` with the same skewed distribution rebuilds
/// without looping: the post-update imbalance is finite or stays +inf, but
/// `update` itself returns in one call.
fn test_update_rebuilds_on_skewed_input(comm: &UserCommunicator) {
    let rank = comm.rank();
    let size = comm.size();

    // Only rank 0 contributes points; every other rank starts empty, which
    // forces imbalance = +inf at create time.
    let points = if rank == 0 {
        points_fixture(rank, NPOINTS_PER_RANK)
    } else {
        Vec::new()
    };

    let config = Config::new(0, 0, 0.1, Mode::Radix);
    let mut balancer = Balancer::create(comm.duplicate(), &points, config).expect("create failed");
    if size > 1 {
        assert!(!balancer.imbalance().is_finite(), "expected +inf imbalance with an empty rank");
    }

    balancer.update(&points).expect("update failed");
    tracing::info!(rank, imbalance = balancer.imbalance(), "post-update imbalance");
    balancer.close().expect("close failed");
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let universe = mpi::initialize().expect("MPI_Init failed");
    let world: SystemCommunicator = universe.world();
    let comm = world.duplicate();

    test_morton_balance_covers_all_ranks(&comm);
    test_create_replicates_tree_identically(&comm);
    test_update_rebuilds_on_skewed_input(&comm);

    if world.rank() == 0 {
        println!("all parallel tests passed on {} ranks", world.size());
    }
}
