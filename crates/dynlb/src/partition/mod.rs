//! Binary space-partitioning trees (radix and RCB) and the operations they
//! share once built: leaf-to-worker assignment, point-assign, box-assign.

pub mod radix;
pub mod rcb;
mod tree;

pub use tree::{Node, PartitionTree, WireNode};
