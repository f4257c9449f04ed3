//! Radix partitioning tree: split the longest axis at the median until a
//! cell holds at most `cutoff` points.

use crate::point::Point;

use super::tree::{offset_node, split_cell, Node, PartitionTree, PARALLEL_BUILD_THRESHOLD};

/// Builds a radix tree over `points`. `cutoff` is the maximum number of
/// points a leaf may hold; callers resolve `cutoff <= 0` to
/// `Config::default_radix_cutoff` before calling this.
pub fn build(points: &[Point], cutoff: usize) -> PartitionTree {
    if points.is_empty() {
        return PartitionTree::default();
    }
    let mut indices: Vec<usize> = (0..points.len()).collect();
    let nodes = build_cell(points, &mut indices[..], 0, cutoff);
    PartitionTree { nodes, indices }
}

/// Builds the subtree over the absolute range `[first, first + indices.len())`,
/// returning a self-contained node array whose root is index 0 and whose
/// internal nodes reference only other indices within this same array.
/// `build` splices it into the full tree by adding a base offset to every
/// node, so every call here is independent of its sibling and, above
/// [`PARALLEL_BUILD_THRESHOLD`] points, runs concurrently with it on the
/// caller's thread pool.
fn build_cell(points: &[Point], indices: &mut [usize], first: usize, cutoff: usize) -> Vec<Node> {
    let size = indices.len();
    if size <= cutoff.max(1) || size < 2 {
        return vec![Node::Leaf { first, size, worker: 0 }];
    }

    let (dimension, split_coord, mid) = match split_cell(points, indices) {
        Some(s) => s,
        None => return vec![Node::Leaf { first, size, worker: 0 }],
    };

    let (left_indices, right_indices) = indices.split_at_mut(mid);
    let (left_nodes, right_nodes) = if size >= PARALLEL_BUILD_THRESHOLD {
        rayon::join(
            || build_cell(points, left_indices, first, cutoff),
            || build_cell(points, right_indices, first + mid, cutoff),
        )
    } else {
        (
            build_cell(points, left_indices, first, cutoff),
            build_cell(points, right_indices, first + mid, cutoff),
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

    #[test]
    fn single_cell_below_cutoff_is_one_leaf() {
        let points = vec![pt(0.0, 0.0, 0.0), pt(1.0, 0.0, 0.0)];
        let tree = build(&points, 4);
        assert_eq!(tree.nodes.len(), 1);
        assert!(tree.nodes[0].is_leaf());
    }

    #[test]
    fn splits_until_leaves_respect_cutoff() {
        let points: Vec<Point> = (0..32)
            .map(|i| pt(i as f64, 0.0, 0.0))
            .collect();
        let tree = build(&points, 4);
        for node in &tree.nodes {
            if let Node::Leaf { size, .. } = node {
                assert!(*size <= 4);
            }
        }
        let total: usize = tree
            .nodes
            .iter()
            .filter_map(|n| match n {
                Node::Leaf { size, .. } => Some(*size),
                _ => None,
            })
            .sum();
        assert_eq!(total, 32);
    }

    #[test]
    fn empty_input_produces_empty_tree() {
        let tree = build(&[], 4);
        assert!(tree.nodes.is_empty());
    }
}
