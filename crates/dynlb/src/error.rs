//! Error taxonomy returned by every fallible entry point.

use std::fmt;

/// Errors produced by the balancer.
///
/// `DegenerateInput` is constructible but is never returned as an `Err` from a
/// public entry point; degenerate input is non-fatal and is instead reported
/// through a `tracing::warn!` event (see [`crate::balancer`]).
#[derive(Debug)]
#[non_exhaustive]
pub enum DynlbError {
    InvalidArgument(String),
    OutOfMemory,
    DegenerateInput(String),
    Collective(String),
}

impl fmt::Display for DynlbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DynlbError::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            DynlbError::OutOfMemory => write!(f, "allocation failed"),
            DynlbError::DegenerateInput(msg) => write!(f, "degenerate input: {}", msg),
            DynlbError::Collective(msg) => write!(f, "collective operation failed: {}", msg),
        }
    }
}

impl std::error::Error for DynlbError {}

pub type Result<T> = std::result::Result<T, DynlbError>;

/// Reserves `additional` elements in `buf`, mapping allocator failure to
/// [`DynlbError::OutOfMemory`] instead of aborting.
pub fn try_reserve<T>(buf: &mut Vec<T>, additional: usize) -> Result<()> {
    buf.try_reserve_exact(additional)
        .map_err(|_| DynlbError::OutOfMemory)
}
