//! The distributed balancer: gather at the coordinator, partition, replicate,
//! and track imbalance across worker updates.

use mpi::collective::SystemOperation;
use mpi::datatype::{Partition, PartitionMut};
use mpi::topology::UserCommunicator;
use mpi::traits::*;
use mpi::Count;

use crate::config::{Config, Mode};
use crate::error::{try_reserve, DynlbError, Result};
use crate::morton;
use crate::partition::{radix, rcb, PartitionTree};
use crate::point::{BoundingBox, Coord, Point};

const COORDINATOR: i32 = 0;

/// Turns per-rank element counts into MPI `Count`s plus the displacement of
/// each rank's chunk within a contiguous buffer laid out in rank order, the
/// shape `Partition`/`PartitionMut` need for a variable-length gather/scatter.
fn counts_and_displs(counts: &[usize]) -> (Vec<Count>, Vec<Count>) {
    let counts: Vec<Count> = counts.iter().map(|&c| c as Count).collect();
    let mut displs = Vec::with_capacity(counts.len());
    let mut offset: Count = 0;
    for &c in &counts {
        displs.push(offset);
        offset += c;
    }
    (counts, displs)
}

/// A stateful, tree-backed balancer handle. All public methods except
/// [`Balancer::point_assign`] and [`Balancer::box_assign`] are collective:
/// every worker in `comm` must call them in the same order.
pub struct Balancer {
    comm: UserCommunicator,
    config: Config,
    tree: PartitionTree,
    workers: usize,
    local_n: usize,
    imbalance: f64,
}

/// Gathers every rank's points to the coordinator with a true variable-length
/// gather collective, preserving rank order, and returns
/// `(all_points, counts_per_rank)`. Non-coordinator ranks receive an empty
/// vector back for `all_points`. The coordinator's gather buffer is the one
/// allocation on this path large enough to genuinely fail (O(global-N)), so
/// its capacity is checked with `try_reserve` ahead of time rather than left
/// to abort on exhaustion.
fn gather_points(comm: &UserCommunicator, local: &[Point]) -> Result<(Vec<Point>, Vec<usize>)> {
    let rank = comm.rank();
    let size = comm.size() as usize;

    let local_count = local.len() as u64;
    let mut counts = vec![0u64; size];
    comm.all_gather_into(&local_count, &mut counts[..]);
    let counts: Vec<usize> = counts.into_iter().map(|c| c as usize).collect();

    let root = comm.process_at_rank(COORDINATOR);
    if rank == COORDINATOR {
        let global_n: usize = counts.iter().sum();
        let mut all = Vec::new();
        try_reserve(&mut all, global_n)?;
        all.resize(global_n, Point::default());
        let (send_counts, displs) = counts_and_displs(&counts);
        {
            let mut partition = PartitionMut::new(&mut all[..], &send_counts[..], &displs[..]);
            root.gather_varcount_into_root(local, &mut partition);
        }
        Ok((all, counts))
    } else {
        root.gather_varcount_into(local);
        Ok((Vec::new(), counts))
    }
}

/// Broadcasts a tree built at the coordinator to every rank.
fn broadcast_tree(comm: &UserCommunicator, tree: &PartitionTree) -> PartitionTree {
    let rank = comm.rank();
    let root = comm.process_at_rank(COORDINATOR);

    let mut len = if rank == COORDINATOR {
        tree.nodes.len() as u64
    } else {
        0
    };
    root.broadcast_into(&mut len);

    let mut wire = vec![crate::partition::WireNode::default(); len as usize];
    if rank == COORDINATOR {
        wire.copy_from_slice(&tree.to_wire());
    }
    root.broadcast_into(&mut wire[..]);

    PartitionTree::from_wire(&wire)
}

/// Sums a `Vec<u64>` of length `workers` across every rank.
fn all_reduce_sums(comm: &UserCommunicator, local: &[u64]) -> Vec<u64> {
    let mut global = vec![0u64; local.len()];
    comm.all_reduce_into(local, &mut global[..], SystemOperation::sum());
    global
}

fn imbalance_ratio(sums: &[u64]) -> f64 {
    let max = sums.iter().copied().max().unwrap_or(0);
    let min = sums.iter().copied().min().unwrap_or(0);
    if min == 0 {
        f64::INFINITY
    } else {
        max as f64 / min as f64
    }
}

/// Runs the tree build on a scoped rayon pool sized from
/// `config.worker_count_hint`, rather than the process-global pool, so
/// several `Balancer` instances in one process don't fight over its size.
fn build_tree(config: &Config, points: &[Point], workers: usize) -> Result<PartitionTree> {
    if points.is_empty() {
        return Ok(PartitionTree::default());
    }

    if points.len() > workers {
        let bbox = BoundingBox::of(points);
        if (0..3).all(|axis| bbox.extent(axis) <= 0.0) {
            tracing::warn!(
                n = points.len() as u64,
                workers,
                "degenerate input: bounding box has zero volume, falling back to index-order partition"
            );
        }
    }

    let build = |points: &[Point]| -> PartitionTree {
        let mut tree = match config.mode {
            Mode::Radix => {
                let cutoff = if config.cutoff > 0 {
                    config.cutoff as usize
                } else {
                    Config::default_radix_cutoff(points.len(), workers)
                };
                radix::build(points, cutoff)
            }
            Mode::Rcb => {
                let leaf_count = if config.cutoff < 0 {
                    (-config.cutoff) as usize
                } else {
                    Config::default_rcb_leaf_count(workers)
                };
                rcb::build(points, leaf_count)
            }
        };
        tree.assign_leaves_to_workers(workers);
        tree
    };

    let tree = match rayon::ThreadPoolBuilder::new()
        .num_threads(config.resolved_worker_count_hint())
        .build()
    {
        Ok(pool) => pool.install(|| build(points)),
        Err(err) => {
            tracing::warn!(%err, "falling back to the calling thread for tree build");
            build(points)
        }
    };
    Ok(tree)
}

impl Balancer {
    /// Collectively builds a balancer from every rank's local points.
    pub fn create(comm: UserCommunicator, local_points: &[Point], config: Config) -> Result<Self> {
        config.validate()?;
        let workers = comm.size() as usize;
        if workers == 0 {
            return Err(DynlbError::InvalidArgument("worker count must be > 0".into()));
        }

        let (all_points, counts) = gather_points(&comm, local_points);
        tracing::debug!(rank = comm.rank(), gathered = all_points.len() as u64, "create: gathered points");

        let tree = if comm.rank() == COORDINATOR {
            if all_points.is_empty() {
                tracing::warn!("create: global point count is zero");
            }
            build_tree(&config, &all_points, workers)?
        } else {
            PartitionTree::default()
        };

        let tree = broadcast_tree(&comm, &tree);
        let sums = tree.leaf_point_sums(workers);
        let imbalance = imbalance_ratio(&sums);
        tracing::info!(imbalance, "create: initial imbalance computed");
        let local_n = counts[comm.rank() as usize];

        Ok(Balancer {
            comm,
            config,
            tree,
            workers,
            local_n,
            imbalance,
        })
    }

    pub fn imbalance(&self) -> f64 {
        self.imbalance
    }

    pub fn tree_size(&self) -> usize {
        self.tree.nodes.len()
    }

    pub fn local_point_count(&self) -> usize {
        self.local_n
    }

    /// Local, non-collective point-to-worker query.
    pub fn point_assign(&self, point: &Point) -> u32 {
        self.tree.point_assign(point)
    }

    /// Local, non-collective box-to-worker query. Returns the number of
    /// distinct worker IDs appended to `out`.
    pub fn box_assign(&self, lo: [Coord; 3], hi: [Coord; 3], out: &mut Vec<u32>) -> usize {
        self.tree.box_assign(lo, hi, out)
    }

    /// Recomputes imbalance from `local_points` against the current tree,
    /// rebuilding the tree if imbalance exceeds `1 + epsilon` or is
    /// non-finite. Collective.
    pub fn update(&mut self, local_points: &[Point]) -> Result<()> {
        self.local_n = local_points.len();

        let mut local_sums = vec![0u64; self.workers];
        for point in local_points {
            local_sums[self.tree.point_assign(point) as usize] += 1;
        }
        let global_sums = all_reduce_sums(&self.comm, &local_sums);
        let imbalance = imbalance_ratio(&global_sums);

        if imbalance > 1.0 + self.config.epsilon || !imbalance.is_finite() {
            tracing::info!(old = self.imbalance, new = imbalance, "update: rebuilding tree");
            let (all_points, _counts) = gather_points(&self.comm, local_points);
            let tree = if self.comm.rank() == COORDINATOR {
                build_tree(&self.config, &all_points, self.workers)?
            } else {
                PartitionTree::default()
            };
            self.tree = broadcast_tree(&self.comm, &tree);
            let sums = self.tree.leaf_point_sums(self.workers);
            self.imbalance = imbalance_ratio(&sums);
        } else {
            self.imbalance = imbalance;
        }
        Ok(())
    }

    /// Consumes the handle, for callers that want to observe destruction
    /// errors rather than have them swallowed by `Drop`. Currently infallible;
    /// the collective transport this balancer is built on has no teardown
    /// handshake of its own.
    pub fn close(self) -> Result<()> {
        Ok(())
    }
}

/// Stateless one-shot Morton-order balance: every worker's points are
/// gathered, Morton-ordered together, and assigned worker IDs in runs with
/// the `global_n % workers` remainder going to the first workers. Returns a
/// worker ID per input point, in the caller's original local order.
pub fn morton_balance(comm: &UserCommunicator, local_points: &[Point]) -> Result<Vec<u32>> {
    let workers = comm.size() as usize;
    if workers == 0 {
        return Err(DynlbError::InvalidArgument("worker count must be > 0".into()));
    }

    let (all_points, counts) = gather_points(comm, local_points);

    if comm.rank() == COORDINATOR {
        if all_points.is_empty() {
            tracing::warn!("morton_balance: global point count is zero");
            return scatter_assignment(comm, &counts, Vec::new());
        }
        let bbox = BoundingBox::of(&all_points);
        let ordering = morton::order(&all_points);
        let ranks_by_sorted_pos = morton::assign_ordered_ranks(all_points.len(), workers);

        let mut worker_of = vec![0u32; all_points.len()];
        for (sorted_pos, &original_pos) in ordering.permutation.iter().enumerate() {
            worker_of[original_pos] = ranks_by_sorted_pos[sorted_pos];
        }
        tracing::debug!(global_n = all_points.len() as u64, bbox = ?bbox, "morton_balance: ordered and assigned");
        scatter_assignment(comm, &counts, worker_of)
    } else {
        scatter_assignment(comm, &counts, Vec::new())
    }
}

/// Scatters `worker_of` (valid only at the coordinator, laid out in rank
/// order per `counts`) back to every rank with a true variable-length scatter
/// collective, and returns the caller's own chunk.
fn scatter_assignment(
    comm: &UserCommunicator,
    counts: &[usize],
    worker_of: Vec<u32>,
) -> Result<Vec<u32>> {
    let rank = comm.rank();
    let root = comm.process_at_rank(COORDINATOR);
    let mut own = vec![0u32; counts[rank as usize]];

    if rank == COORDINATOR {
        let (send_counts, displs) = counts_and_displs(counts);
        let partition = Partition::new(&worker_of[..], &send_counts[..], &displs[..]);
        root.scatter_varcount_into_root(&partition, &mut own[..]);
    } else {
        root.scatter_varcount_into(&mut own[..]);
    }
    Ok(own)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn imbalance_ratio_is_infinite_when_some_worker_is_empty() {
        assert_eq!(imbalance_ratio(&[5, 0, 2]), f64::INFINITY);
    }

    #[test]
    fn imbalance_ratio_is_one_when_perfectly_balanced() {
        assert_eq!(imbalance_ratio(&[4, 4, 4]), 1.0);
    }

    #[test]
    fn imbalance_ratio_handles_all_zero_as_infinite() {
        assert_eq!(imbalance_ratio(&[0, 0]), f64::INFINITY);
    }

    #[test]
    fn build_tree_on_empty_input_is_empty() {
        let config = Config::new(0, 0, 0.1, Mode::Radix);
        let tree = build_tree(&config, &[], 4).unwrap();
        assert!(tree.nodes.is_empty());
    }
}
