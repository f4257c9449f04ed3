//! RCB (recursive coordinate bisection) partitioning tree: split the
//! longest axis at the median, allocating a target leaf count between the
//! two children at every split so the tree ends with exactly that many
//! leaves (branches for a non-power-of-two target stop one level earlier).

use crate::point::Point;

use super::tree::{offset_node, split_cell, Node, PartitionTree, PARALLEL_BUILD_THRESHOLD};

/// Builds an RCB tree over `points` targeting `leaf_count` leaves. Callers
/// resolve `cutoff <= 0` to `Config::default_rcb_leaf_count` before calling
/// this. `leaf_count` is clamped internally when there are too few points to
/// split that far.
pub fn build(points: &[Point], leaf_count: usize) -> PartitionTree {
    if points.is_empty() {
        return PartitionTree::default();
    }
    let mut indices: Vec<usize> = (0..points.len()).collect();
    let nodes = build_cell(points, &mut indices[..], 0, leaf_count.max(1));
    PartitionTree { nodes, indices }
}

/// Same splice-by-offset shape as `radix::build_cell`: returns a
/// self-contained node array rooted at local index 0, so the two recursive
/// calls below are free of a shared mutable `nodes` array and may run
/// concurrently via `rayon::join` above [`PARALLEL_BUILD_THRESHOLD`] points.
fn build_cell(
    points: &[Point],
    indices: &mut [usize],
    first: usize,
    target_leaves: usize,
) -> Vec<Node> {
    let size = indices.len();
    if target_leaves <= 1 || size < 2 {
        return vec![Node::Leaf { first, size, worker: 0 }];
    }

    let (dimension, split_coord, mid) = match split_cell(points, indices) {
        Some(s) => s,
        None => return vec![Node::Leaf { first, size, worker: 0 }],
    };

    let left_target = target_leaves / 2;
    let right_target = target_leaves - left_target;

    let (left_indices, right_indices) = indices.split_at_mut(mid);
    let (left_nodes, right_nodes) = if size >= PARALLEL_BUILD_THRESHOLD {
        rayon::join(
            || build_cell(points, left_indices, first, left_target),
            || build_cell(points, right_indices, first + mid, right_target),
        )
    } else {
        (
            build_cell(points, left_indices, first, left_target),
            build_cell(points, right_indices, first + mid, right_target),
        )
    };

    let left_base = 1;
    let right_base = left_base + left_nodes.len();
    let mut nodes = Vec::with_capacity(1 + left_nodes.len() + right_nodes.len());
    nodes.push(Node::Internal {
        dimension,
        split: split_coord,
        left: left_base,
        right: right_base,
    });
    nodes.extend(left_nodes.into_iter().map(|n| offset_node(n, left_base)));
    nodes.extend(right_nodes.into_iter().map(|n| offset_node(n, right_base)));
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(x: f64, y: f64, z: f64) -> Point {
        Point::new([x, y, z], 0)
    }

    fn leaf_count(tree: &PartitionTree) -> usize {
        tree.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    #[test]
    fn exact_power_of_two_leaf_count() {
        let points: Vec<Point> = (0..16).map(|i| pt(i as f64, 0.0, 0.0)).collect();
        let tree = build(&points, 4);
        assert_eq!(leaf_count(&tree), 4);
    }

    #[test]
    fn non_power_of_two_leaf_count() {
        let points: Vec<Point> = (0..100).map(|i| pt(i as f64, (i % 7) as f64, 0.0)).collect();
        let tree = build(&points, 3);
        assert_eq!(leaf_count(&tree), 3);
    }

    #[test]
    fn leaf_count_clamped_by_available_points() {
        // A single point cannot be split at all, regardless of target.
        let points = vec![pt(0.0, 0.0, 0.0)];
        let tree = build(&points, 4);
        assert_eq!(leaf_count(&tree), 1);
    }

    #[test]
    fn leaves_cover_every_point_exactly_once() {
        let points: Vec<Point> = (0..50).map(|i| pt(i as f64, 0.0, 0.0)).collect();
        let tree = build(&points, 6);
        let total: usize = tree
            .nodes
            .iter()
            .filter_map(|n| match n {
                Node::Leaf { size, .. } => Some(*size),
                _ => None,
            })
            .sum();
        assert_eq!(total, 50);
    }
}
