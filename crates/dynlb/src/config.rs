//! Balancer configuration and validation.

use crate::error::{DynlbError, Result};

/// Partitioning-tree construction strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Split at the median of the longest axis until a cell holds <= cutoff points.
    Radix,
    /// Split at the median of the longest axis until the leaf count reaches a target.
    Rcb,
}

/// The only configuration parameters a balancer recognises.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Requested parallelism for internal per-worker loops. 0 resolves to
    /// [`std::thread::available_parallelism`].
    pub worker_count_hint: usize,
    /// Radix mode: max points in a leaf. RCB mode: negated target leaf count.
    /// <= 0 selects the mode-specific default.
    pub cutoff: i64,
    /// Imbalance slack; a rebuild triggers when imbalance > 1 + epsilon.
    pub epsilon: f64,
    pub mode: Mode,
}

impl Config {
    pub fn new(worker_count_hint: usize, cutoff: i64, epsilon: f64, mode: Mode) -> Self {
        Config {
            worker_count_hint,
            cutoff,
            epsilon,
            mode,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.epsilon.is_finite() || self.epsilon < 0.0 {
            return Err(DynlbError::InvalidArgument(format!(
                "epsilon must be finite and >= 0, got {}",
                self.epsilon
            )));
        }
        Ok(())
    }

    /// Resolves `worker_count_hint == 0` against the host's hardware parallelism,
    /// the way a scoped rayon thread pool is sized for this balancer instance.
    pub fn resolved_worker_count_hint(&self) -> usize {
        if self.worker_count_hint == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.worker_count_hint
        }
    }

    /// Default radix cutoff: max(1, global_n / (workers * 64)).
    pub fn default_radix_cutoff(global_n: usize, workers: usize) -> usize {
        ((global_n / (workers.max(1) * 64)).max(1)) as usize
    }

    /// Default RCB target leaf count: one leaf per worker.
    pub fn default_rcb_leaf_count(workers: usize) -> usize {
        workers.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_negative_epsilon() {
        let cfg = Config::new(0, 0, -1.0, Mode::Radix);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_non_finite_epsilon() {
        let cfg = Config::new(0, 0, f64::NAN, Mode::Radix);
        assert!(cfg.validate().is_err());
        let cfg = Config::new(0, 0, f64::INFINITY, Mode::Radix);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn accepts_zero_epsilon() {
        let cfg = Config::new(0, 0, 0.0, Mode::Rcb);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn default_radix_cutoff_is_at_least_one() {
        assert_eq!(Config::default_radix_cutoff(10, 4), 1);
        assert_eq!(Config::default_radix_cutoff(100_000, 4), 100_000 / 256);
    }

    #[test]
    fn default_rcb_leaf_count_matches_workers() {
        assert_eq!(Config::default_rcb_leaf_count(7), 7);
    }
}
