//! Cartesian points and bounding boxes, with MPI structured datatypes so the
//! collective gather/broadcast calls transmit real coordinates directly
//! instead of under a borrowed integer type tag.

use memoffset::offset_of;
use mpi::datatype::{Equivalence, UncommittedUserDatatype, UserDatatype};
use mpi::Address;

pub type Coord = f64;

/// A 3D point carrying the caller's local index, so that a worker-ID
/// assignment computed at the coordinator can be scattered back in the
/// caller's original order.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub coords: [Coord; 3],
    pub local_index: u64,
}

impl Point {
    pub fn new(coords: [Coord; 3], local_index: u64) -> Self {
        Point { coords, local_index }
    }
}

unsafe impl Equivalence for Point {
    type Out = UserDatatype;
    fn equivalent_datatype() -> Self::Out {
        UserDatatype::structured(
            &[1, 1],
            &[
                offset_of!(Point, coords) as Address,
                offset_of!(Point, local_index) as Address,
            ],
            &[
                UncommittedUserDatatype::contiguous(3, &Coord::equivalent_datatype()).as_ref(),
                UncommittedUserDatatype::contiguous(1, &u64::equivalent_datatype()).as_ref(),
            ],
        )
    }
}

/// An axis-aligned bounding box: min (x,y,z), max (x,y,z). Extent along every
/// axis is >= 0; a zero-extent axis is a degenerate (flat) box, not an error.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BoundingBox {
    pub min: [Coord; 3],
    pub max: [Coord; 3],
}

unsafe impl Equivalence for BoundingBox {
    type Out = UserDatatype;
    fn equivalent_datatype() -> Self::Out {
        UserDatatype::structured(
            &[1, 1],
            &[
                offset_of!(BoundingBox, min) as Address,
                offset_of!(BoundingBox, max) as Address,
            ],
            &[
                UncommittedUserDatatype::contiguous(3, &Coord::equivalent_datatype()).as_ref(),
                UncommittedUserDatatype::contiguous(3, &Coord::equivalent_datatype()).as_ref(),
            ],
        )
    }
}

impl BoundingBox {
    /// The bounding box of a non-empty point slice. Panics if `points` is empty;
    /// callers must check for the global-N == 0 degenerate case first.
    pub fn of(points: &[Point]) -> Self {
        let mut min = points[0].coords;
        let mut max = points[0].coords;
        for p in &points[1..] {
            for axis in 0..3 {
                min[axis] = min[axis].min(p.coords[axis]);
                max[axis] = max[axis].max(p.coords[axis]);
            }
        }
        BoundingBox { min, max }
    }

    pub fn extent(&self, axis: usize) -> Coord {
        self.max[axis] - self.min[axis]
    }

    /// The axis with the largest extent, ties broken toward the lower index.
    pub fn longest_axis(&self) -> usize {
        let mut best = 0;
        for axis in 1..3 {
            if self.extent(axis) > self.extent(best) {
                best = axis;
            }
        }
        best
    }

    pub fn intersects(&self, lo: &[Coord; 3], hi: &[Coord; 3]) -> bool {
        (0..3).all(|axis| lo[axis] <= self.max[axis] && hi[axis] >= self.min[axis])
    }
}
