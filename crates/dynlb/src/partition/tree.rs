//! The flat-array partition tree and the operations every mode shares.
//!
//! The reference layout encoded "this node is a leaf" as a sentinel value in
//! the split-dimension field; here that is replaced with an explicit tagged
//! variant, per the usual recommendation for this kind of node record. The
//! array stays contiguous and flat so the whole tree can still be broadcast
//! as one fixed-size-record image.

use memoffset::offset_of;
use mpi::datatype::{Equivalence, UncommittedUserDatatype, UserDatatype};
use mpi::Address;

use crate::point::{Coord, Point};

/// One node of a partition tree. Internal nodes reference only nodes with
/// strictly larger indices than themselves, so the array is acyclic by
/// construction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Node {
    Internal {
        dimension: usize,
        split: Coord,
        left: usize,
        right: usize,
    },
    Leaf {
        first: usize,
        size: usize,
        worker: u32,
    },
}

impl Node {
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }
}

/// Cell size above which `radix::build_cell`/`rcb::build_cell` recurse into
/// their two children concurrently via `rayon::join` instead of serially,
/// mirroring the sibling-subtree parallel recursion used elsewhere in this
/// crate: once a split point is chosen, the two child cells are data-
/// independent and can run on separate tasks bounded by the configured local
/// thread budget.
pub(super) const PARALLEL_BUILD_THRESHOLD: usize = 50_000;

/// Shifts every node index a self-contained subtree array references by
/// `base`, so it can be spliced into a larger array starting at that
/// position. Leaves are untouched: `first`/`size` already address the shared
/// point-index permutation, not this node array.
pub(super) fn offset_node(node: Node, base: usize) -> Node {
    match node {
        Node::Internal { dimension, split, left, right } => Node::Internal {
            dimension,
            split,
            left: left + base,
            right: right + base,
        },
        leaf => leaf,
    }
}

/// A built partition tree together with the point-index permutation its
/// leaves address.
#[derive(Clone, Debug, Default)]
pub struct PartitionTree {
    pub nodes: Vec<Node>,
    /// Permutation of `0..points.len()`; leaf `{first, size}` addresses the
    /// contiguous range `indices[first..first+size]`.
    pub indices: Vec<usize>,
}

impl PartitionTree {
    /// Indices into `self.nodes` of every leaf, in tree (construction) order.
    pub fn leaf_node_indices(&self) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.is_leaf().then(|| i))
            .collect()
    }

    /// Assigns `self.nodes.len()`'s leaves to `workers` workers: every worker
    /// gets `leaf_count / workers` leaves, and the `leaf_count % workers`
    /// remainder is handed out one at a time to the first (lowest-numbered)
    /// workers, walking leaves in tree index order.
    pub fn assign_leaves_to_workers(&mut self, workers: usize) {
        assert!(workers > 0);
        let leaf_idxs = self.leaf_node_indices();
        let total = leaf_idxs.len();
        let quotient = total / workers;
        let remainder = total % workers;
        let mut pos = 0usize;
        for worker in 0..workers {
            let run = quotient + if worker < remainder { 1 } else { 0 };
            for _ in 0..run {
                if let Node::Leaf { worker: w, .. } = &mut self.nodes[leaf_idxs[pos]] {
                    *w = worker as u32;
                }
                pos += 1;
            }
        }
    }

    /// Per-worker sum of leaf sizes (point counts), length `workers`.
    pub fn leaf_point_sums(&self, workers: usize) -> Vec<u64> {
        let mut sums = vec![0u64; workers];
        for node in &self.nodes {
            if let Node::Leaf { size, worker, .. } = node {
                sums[*worker as usize] += *size as u64;
            }
        }
        sums
    }

    /// Descends from the root, returning the worker ID of the leaf owning
    /// `point`. Ties at a split coordinate go to the left child. An empty
    /// tree (the global-N == 0 degenerate case, §7) has no leaves to own any
    /// point; it returns worker 0 rather than indexing past the node array.
    pub fn point_assign(&self, point: &Point) -> u32 {
        if self.nodes.is_empty() {
            return 0;
        }
        let mut idx = 0usize;
        loop {
            match &self.nodes[idx] {
                Node::Internal {
                    dimension,
                    split,
                    left,
                    right,
                } => {
                    idx = if point.coords[*dimension] <= *split {
                        *left
                    } else {
                        *right
                    };
                }
                Node::Leaf { worker, .. } => return *worker,
            }
        }
    }

    /// Collects the distinct worker IDs of every leaf whose cell intersects
    /// the axis-aligned box `[lo, hi]`, appending them to `out` (which is not
    /// cleared first) and returning how many were appended. An empty tree
    /// (global-N == 0) owns no leaves and intersects nothing, so it appends
    /// none rather than indexing past the node array.
    pub fn box_assign(&self, lo: [Coord; 3], hi: [Coord; 3], out: &mut Vec<u32>) -> usize {
        let before = out.len();
        if self.nodes.is_empty() {
            return 0;
        }
        self.box_assign_from(0, lo, hi, out);
        out.sort_unstable();
        out.dedup();
        out.len() - before
    }

    fn box_assign_from(&self, idx: usize, lo: [Coord; 3], hi: [Coord; 3], out: &mut Vec<u32>) {
        match &self.nodes[idx] {
            Node::Internal {
                dimension,
                split,
                left,
                right,
            } => {
                if lo[*dimension] <= *split {
                    self.box_assign_from(*left, lo, hi, out);
                }
                if hi[*dimension] >= *split {
                    self.box_assign_from(*right, lo, hi, out);
                }
            }
            Node::Leaf { worker, .. } => out.push(*worker),
        }
    }
}

/// Sorts `indices[range]`'s point indices by the coordinate along `dimension`
/// and returns `(split, mid)` where the left half (`[0, mid)`) holds every
/// index with `coord <= split` and the right half holds every index with
/// `coord > split` — the exact predicate `point_assign`/`box_assign` use to
/// route a query, so a point stored left always queries left. Duplicate
/// coordinates straddling the arithmetic midpoint are resolved by recomputing
/// `mid` as the true partition point of that predicate over the sorted
/// slice (not the positional midpoint), and a candidate split that happens to
/// land on the cell's maximum (so every point is `<= split`) backs off to the
/// largest value strictly below the maximum, guaranteeing a non-empty right
/// half. Callers must only invoke this when `dimension`'s extent is > 0.
fn median_split(
    points: &[Point],
    indices: &mut [usize],
    dimension: usize,
) -> (Coord, usize) {
    indices.sort_unstable_by(|&a, &b| {
        points[a].coords[dimension]
            .partial_cmp(&points[b].coords[dimension])
            .unwrap()
    });
    let target_mid = indices.len() / 2;
    let mut split = points[indices[target_mid - 1]].coords[dimension];
    let mut mid = indices.partition_point(|&i| points[i].coords[dimension] <= split);
    if mid == indices.len() {
        let max = points[indices[indices.len() - 1]].coords[dimension];
        let below_max = indices.partition_point(|&i| points[i].coords[dimension] < max);
        split = points[indices[below_max - 1]].coords[dimension];
        mid = below_max;
    }
    (split, mid)
}

/// Chooses the longest axis of the bounding box of the points addressed by
/// `indices`, then splits `indices` in place at the coordinate median along
/// that axis. Returns `(dimension, split, mid)`, or `None` if `indices` has
/// fewer than 2 entries (cannot be split further).
///
/// If the cell's bounding box has zero volume (every point shares the exact
/// same coordinate on every axis), no coordinate-based split can discriminate
/// between points at all; this is the DEGENERATE_INPUT case of falling back
/// to an index-order partition (splitting `indices` positionally rather than
/// by value) so the cell still contributes two leaves for load-balancing
/// purposes. A query against the resulting split coordinate cannot then
/// round-trip a duplicate-valued point to its original leaf, which is the
/// documented, non-fatal limitation of that fallback, not a bug.
pub(super) fn split_cell(
    points: &[Point],
    indices: &mut [usize],
) -> Option<(usize, Coord, usize)> {
    if indices.len() < 2 {
        return None;
    }
    let mut min = points[indices[0]].coords;
    let mut max = points[indices[0]].coords;
    for &i in indices.iter() {
        for axis in 0..3 {
            min[axis] = min[axis].min(points[i].coords[axis]);
            max[axis] = max[axis].max(points[i].coords[axis]);
        }
    }
    let mut dimension = 0;
    for axis in 1..3 {
        if max[axis] - min[axis] > max[dimension] - min[dimension] {
            dimension = axis;
        }
    }

    if max[dimension] - min[dimension] <= 0.0 {
        let mid = indices.len() / 2;
        let split = points[indices[mid - 1]].coords[dimension];
        return Some((dimension, split, mid));
    }

    let (split, mid) = median_split(points, indices, dimension);
    Some((dimension, split, mid))
}

/// Fixed-size, field-by-field wire form of a [`Node`], broadcast from the
/// coordinator to every worker. A raw-memory broadcast of `Node` itself would
/// depend on the enum's in-memory layout, which Rust does not guarantee
/// across builds; this record is the explicit, endian-stable substitute the
/// reference implementation's raw-record broadcast should have used.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct WireNode {
    /// 0 = internal, 1 = leaf.
    pub tag: u32,
    pub dimension: u32,
    pub split: Coord,
    pub left: u64,
    pub right: u64,
    pub first: u64,
    pub size: u64,
    pub worker: u32,
}

unsafe impl Equivalence for WireNode {
    type Out = UserDatatype;
    fn equivalent_datatype() -> Self::Out {
        UserDatatype::structured(
            &[1, 1, 1, 1, 1, 1, 1, 1],
            &[
                offset_of!(WireNode, tag) as Address,
                offset_of!(WireNode, dimension) as Address,
                offset_of!(WireNode, split) as Address,
                offset_of!(WireNode, left) as Address,
                offset_of!(WireNode, right) as Address,
                offset_of!(WireNode, first) as Address,
                offset_of!(WireNode, size) as Address,
                offset_of!(WireNode, worker) as Address,
            ],
            &[
                UncommittedUserDatatype::contiguous(1, &u32::equivalent_datatype()).as_ref(),
                UncommittedUserDatatype::contiguous(1, &u32::equivalent_datatype()).as_ref(),
                UncommittedUserDatatype::contiguous(1, &Coord::equivalent_datatype()).as_ref(),
                UncommittedUserDatatype::contiguous(1, &u64::equivalent_datatype()).as_ref(),
                UncommittedUserDatatype::contiguous(1, &u64::equivalent_datatype()).as_ref(),
                UncommittedUserDatatype::contiguous(1, &u64::equivalent_datatype()).as_ref(),
                UncommittedUserDatatype::contiguous(1, &u64::equivalent_datatype()).as_ref(),
                UncommittedUserDatatype::contiguous(1, &u32::equivalent_datatype()).as_ref(),
            ],
        )
    }
}

impl From<&Node> for WireNode {
    fn from(node: &Node) -> Self {
        match *node {
            Node::Internal { dimension, split, left, right } => WireNode {
                tag: 0,
                dimension: dimension as u32,
                split,
                left: left as u64,
                right: right as u64,
                first: 0,
                size: 0,
                worker: 0,
            },
            Node::Leaf { first, size, worker } => WireNode {
                tag: 1,
                dimension: 0,
                split: 0.0,
                left: 0,
                right: 0,
                first: first as u64,
                size: size as u64,
                worker,
            },
        }
    }
}

impl From<&WireNode> for Node {
    fn from(wire: &WireNode) -> Self {
        if wire.tag == 1 {
            Node::Leaf {
                first: wire.first as usize,
                size: wire.size as usize,
                worker: wire.worker,
            }
        } else {
            Node::Internal {
                dimension: wire.dimension as usize,
                split: wire.split,
                left: wire.left as usize,
                right: wire.right as usize,
            }
        }
    }
}

impl PartitionTree {
    /// Serialises `self.nodes` into the fixed-size wire form for broadcast.
    pub fn to_wire(&self) -> Vec<WireNode> {
        self.nodes.iter().map(WireNode::from).collect()
    }

    /// Rebuilds a tree's node array from a broadcast wire image. The `indices`
    /// permutation is not part of the wire image: queries against a
    /// replicated tree only need node shape and leaf sizes, never the
    /// concrete point ownership of the build rank.
    pub fn from_wire(wire: &[WireNode]) -> PartitionTree {
        PartitionTree {
            nodes: wire.iter().map(Node::from).collect(),
            indices: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(x: f64, y: f64, z: f64) -> Point {
        Point::new([x, y, z], 0)
    }

    #[test]
    fn offset_node_shifts_internal_children_only() {
        let internal = Node::Internal { dimension: 0, split: 1.0, left: 1, right: 2 };
        let shifted = offset_node(internal, 10);
        assert_eq!(shifted, Node::Internal { dimension: 0, split: 1.0, left: 11, right: 12 });

        let leaf = Node::Leaf { first: 5, size: 3, worker: 2 };
        assert_eq!(offset_node(leaf, 10), leaf);
    }

    #[test]
    fn leaf_assignment_distributes_remainder_to_first_workers() {
        let mut tree = PartitionTree {
            nodes: vec![
                Node::Leaf { first: 0, size: 1, worker: 0 },
                Node::Leaf { first: 1, size: 1, worker: 0 },
                Node::Leaf { first: 2, size: 1, worker: 0 },
            ],
            indices: vec![0, 1, 2],
        };
        tree.assign_leaves_to_workers(2);
        let workers: Vec<u32> = tree
            .nodes
            .iter()
            .map(|n| match n {
                Node::Leaf { worker, .. } => *worker,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(workers, vec![0, 0, 1]);
    }

    #[test]
    fn leaf_assignment_leaves_excess_workers_empty() {
        let mut tree = PartitionTree {
            nodes: vec![Node::Leaf { first: 0, size: 1, worker: 0 }],
            indices: vec![0],
        };
        tree.assign_leaves_to_workers(4);
        let sums = tree.leaf_point_sums(4);
        assert_eq!(sums, vec![1, 0, 0, 0]);
    }

    #[test]
    fn split_cell_partitions_by_longest_axis() {
        let points = vec![pt(0.0, 0.0, 0.0), pt(10.0, 0.0, 0.0), pt(5.0, 1.0, 0.0)];
        let mut indices = vec![0, 1, 2];
        let (dimension, split, mid) = split_cell(&points, &mut indices).unwrap();
        assert_eq!(dimension, 0);
        assert_eq!(mid, 1);
        assert!(split <= 5.0);
    }

    #[test]
    fn duplicate_coordinates_straddling_median_route_consistently() {
        // x = [0, 1, 1, 1]; a naive positional median split (mid = 2) would
        // put one of the duplicated "1"s in the left half and two in the
        // right half, but point_assign routes every "1" the same way.
        let points = vec![pt(0.0, 0.0, 0.0), pt(1.0, 0.0, 0.0), pt(1.0, 0.0, 0.0), pt(1.0, 0.0, 0.0)];
        let mut indices = vec![0, 1, 2, 3];
        let (dimension, split, mid) = split_cell(&points, &mut indices).unwrap();
        assert_eq!(dimension, 0);
        for &i in &indices[..mid] {
            assert!(points[i].coords[dimension] <= split);
        }
        for &i in &indices[mid..] {
            assert!(points[i].coords[dimension] > split);
        }
    }

    #[test]
    fn median_backs_off_when_candidate_split_covers_everything() {
        // x = [5, 5, 5, 5, 0]; the positional median lands on the duplicated
        // maximum, which would route every point left. The split must back
        // off to a value that actually separates the cell.
        let points = vec![
            pt(5.0, 0.0, 0.0),
            pt(5.0, 0.0, 0.0),
            pt(5.0, 0.0, 0.0),
            pt(5.0, 0.0, 0.0),
            pt(0.0, 0.0, 0.0),
        ];
        let mut indices: Vec<usize> = (0..5).collect();
        let (dimension, split, mid) = split_cell(&points, &mut indices).unwrap();
        assert_eq!(dimension, 0);
        assert!(mid > 0 && mid < indices.len());
        for &i in &indices[..mid] {
            assert!(points[i].coords[dimension] <= split);
        }
        for &i in &indices[mid..] {
            assert!(points[i].coords[dimension] > split);
        }
    }

    #[test]
    fn fully_degenerate_cell_falls_back_to_index_order_split() {
        let points = vec![pt(1.0, 1.0, 1.0); 4];
        let mut indices: Vec<usize> = (0..4).collect();
        let (_dimension, _split, mid) = split_cell(&points, &mut indices).unwrap();
        assert_eq!(mid, 2);
    }

    #[test]
    fn point_assign_respects_tie_break_left() {
        let tree = PartitionTree {
            nodes: vec![
                Node::Internal { dimension: 0, split: 1.0, left: 1, right: 2 },
                Node::Leaf { first: 0, size: 1, worker: 0 },
                Node::Leaf { first: 1, size: 1, worker: 1 },
            ],
            indices: vec![0, 1],
        };
        assert_eq!(tree.point_assign(&pt(1.0, 0.0, 0.0)), 0);
        assert_eq!(tree.point_assign(&pt(0.5, 0.0, 0.0)), 0);
        assert_eq!(tree.point_assign(&pt(1.5, 0.0, 0.0)), 1);
    }

    #[test]
    fn wire_round_trip_preserves_node_shape() {
        let tree = PartitionTree {
            nodes: vec![
                Node::Internal { dimension: 2, split: 0.75, left: 1, right: 2 },
                Node::Leaf { first: 0, size: 3, worker: 5 },
                Node::Leaf { first: 3, size: 1, worker: 7 },
            ],
            indices: vec![0, 1, 2, 3],
        };
        let wire = tree.to_wire();
        let restored = PartitionTree::from_wire(&wire);
        assert_eq!(restored.nodes, tree.nodes);
    }

    #[test]
    fn box_assign_dedups_worker_ids() {
        let tree = PartitionTree {
            nodes: vec![
                Node::Internal { dimension: 0, split: 1.0, left: 1, right: 2 },
                Node::Leaf { first: 0, size: 1, worker: 0 },
                Node::Leaf { first: 1, size: 1, worker: 0 },
            ],
            indices: vec![0, 1],
        };
        let mut out = Vec::new();
        let count = tree.box_assign([0.0, 0.0, 0.0], [2.0, 0.0, 0.0], &mut out);
        assert_eq!(count, 1);
        assert_eq!(out, vec![0]);
    }

    #[test]
    fn point_assign_on_empty_tree_returns_worker_zero() {
        let tree = PartitionTree::default();
        assert_eq!(tree.point_assign(&pt(0.0, 0.0, 0.0)), 0);
    }

    #[test]
    fn box_assign_on_empty_tree_appends_nothing() {
        let tree = PartitionTree::default();
        let mut out = Vec::new();
        let count = tree.box_assign([0.0, 0.0, 0.0], [1.0, 1.0, 1.0], &mut out);
        assert_eq!(count, 0);
        assert!(out.is_empty());
    }
}
