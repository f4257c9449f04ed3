//! Distributed dynamic load balancer for particle-like workloads over MPI.
//!
//! Two entry points are exposed: [`morton_balance`] is a stateless one-shot
//! balance by Z-order key, and [`Balancer`] is a stateful handle around a
//! partition tree (radix or RCB) that tracks per-worker imbalance and
//! rebuilds itself when it drifts too far.

pub mod c_api;
pub mod config;
pub mod error;
pub mod morton;
pub mod partition;
pub mod point;

mod balancer;

pub use balancer::{morton_balance, Balancer};
pub use config::{Config, Mode};
pub use error::{DynlbError, Result};
pub use point::{BoundingBox, Coord, Point};
