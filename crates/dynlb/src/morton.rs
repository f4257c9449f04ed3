//! Morton (Z-order) key encoding and the Morton-order balancer.

use itertools::Itertools;
use rayon::prelude::*;

use crate::point::{BoundingBox, Coord, Point};

/// Bits used per axis; the full key is 3 * BITS_PER_AXIS wide.
pub const BITS_PER_AXIS: u32 = 10;
const BIN_COUNT: u32 = 1 << BITS_PER_AXIS;

pub type MortonKey = u32;

/// Spreads the low `BITS_PER_AXIS` bits of `v` so that each original bit `i`
/// lands at bit position `3*i`, leaving the two bits above it clear for the
/// other two axes to be or'd in. The classic "part1by2" bit-spread, done with
/// a fixed sequence of shift-and-mask steps rather than a lookup table.
fn spread_bits(v: u32) -> u32 {
    let mut x = v & 0x3FF;
    x = (x | (x << 16)) & 0x030000FF;
    x = (x | (x << 8)) & 0x0300F00F;
    x = (x | (x << 4)) & 0x030C30C3;
    x = (x | (x << 2)) & 0x09249249;
    x
}

/// Normalises a coordinate into a 0..BIN_COUNT integer bin given the axis
/// extent of the bounding box. A zero-extent axis maps every point to bin 0.
fn bin_of(value: Coord, min: Coord, extent: Coord) -> u32 {
    if extent <= 0.0 {
        return 0;
    }
    let frac = (value - min) / extent;
    let bin = (frac * BIN_COUNT as f64).floor();
    (bin.max(0.0) as u32).min(BIN_COUNT - 1)
}

/// Encodes a single point's key relative to a known bounding box.
pub fn encode(point: &Point, bbox: &BoundingBox) -> MortonKey {
    let bx = bin_of(point.coords[0], bbox.min[0], bbox.extent(0));
    let by = bin_of(point.coords[1], bbox.min[1], bbox.extent(1));
    let bz = bin_of(point.coords[2], bbox.min[2], bbox.extent(2));
    spread_bits(bx) | (spread_bits(by) << 1) | (spread_bits(bz) << 2)
}

/// Result of ordering a point cloud by Morton key: a permutation of
/// `0..points.len()` with non-decreasing keys, and the keys themselves in
/// that same sorted order.
pub struct Ordering {
    pub permutation: Vec<usize>,
    pub keys: Vec<MortonKey>,
}

/// Points above this count are keyed and sorted on the process-wide rayon
/// pool instead of serially; below it the parallel overhead outweighs the
/// win.
const PARALLEL_THRESHOLD: usize = 50_000;

/// Computes the bounding box of `points` and sorts their indices by Morton
/// key, ties broken by index. `points` must be non-empty.
pub fn order(points: &[Point]) -> Ordering {
    let bbox = BoundingBox::of(points);
    let mut keyed: Vec<(usize, MortonKey)> = if points.len() >= PARALLEL_THRESHOLD {
        points
            .par_iter()
            .enumerate()
            .map(|(i, p)| (i, encode(p, &bbox)))
            .collect()
    } else {
        points
            .iter()
            .enumerate()
            .map(|(i, p)| (i, encode(p, &bbox)))
            .collect()
    };
    if points.len() >= PARALLEL_THRESHOLD {
        keyed.par_sort_by_key(|&(i, k)| (k, i));
    } else {
        keyed = keyed.into_iter().sorted_by_key(|&(i, k)| (k, i)).collect();
    }
    let (permutation, keys) = keyed.into_iter().unzip();
    Ordering { permutation, keys }
}

/// Assigns a worker ID to every entry of an already Morton-ordered sequence
/// of length `global_n`, giving `global_n / workers` points to every worker
/// and distributing the `global_n % workers` remainder one point at a time
/// to the first (lowest-ranked) workers, per the canonical remainder rule.
pub fn assign_ordered_ranks(global_n: usize, workers: usize) -> Vec<u32> {
    assert!(workers > 0);
    let quotient = global_n / workers;
    let remainder = global_n % workers;
    let mut ranks = Vec::with_capacity(global_n);
    let mut i = 0usize;
    for worker in 0..workers {
        let run = quotient + if worker < remainder { 1 } else { 0 };
        for _ in 0..run {
            ranks.push(worker as u32);
            i += 1;
        }
    }
    debug_assert_eq!(i, global_n);
    ranks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(x: f64, y: f64, z: f64) -> Point {
        Point::new([x, y, z], 0)
    }

    #[test]
    fn spread_bits_is_disjoint_across_axes() {
        for v in [0u32, 1, 2, 3, 512, 1023] {
            let x = spread_bits(v);
            assert_eq!(x & !0x09249249, 0);
        }
    }

    #[test]
    fn grid_points_order_by_octant() {
        // Two points in the lower octant should sort before two in the upper.
        let points = vec![
            pt(0.1, 0.1, 0.1),
            pt(0.2, 0.1, 0.1),
            pt(0.9, 0.9, 0.9),
            pt(0.8, 0.9, 0.9),
        ];
        let ordering = order(&points);
        let lower: Vec<usize> = ordering.permutation[0..2].to_vec();
        assert!(lower.contains(&0) && lower.contains(&1));
    }

    #[test]
    fn remainder_goes_to_first_workers() {
        // W=2, 5 points: quotient=2, remainder=1 -> worker 0 gets 3, worker 1 gets 2.
        let ranks = assign_ordered_ranks(5, 2);
        assert_eq!(ranks, vec![0, 0, 0, 1, 1]);
    }

    #[test]
    fn exact_division_has_no_remainder_bias() {
        let ranks = assign_ordered_ranks(16, 4);
        assert_eq!(ranks, vec![0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3]);
    }

    #[test]
    fn degenerate_axis_does_not_panic() {
        let points = vec![pt(0.0, 0.0, 0.0), pt(0.0, 1.0, 0.0), pt(0.0, 0.5, 0.0)];
        let ordering = order(&points);
        assert_eq!(ordering.permutation.len(), 3);
    }
}
