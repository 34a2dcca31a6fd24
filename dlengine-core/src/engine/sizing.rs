//! Thread-pool sizing policy.

use super::EngineType;
use serde::{Deserialize, Serialize};

/// Default-pool threads per core.  Default-pool tasks are expected to block
/// on I/O, so the pool is heavily oversubscribed.
pub const DEFAULT_POOL_THREADS_PER_CORE: usize = 50;

/// Target sizes for the two engine pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSizes {
    /// Size of the general-purpose pool.
    pub default_pool: usize,
    /// Size of the numeric compute pool.
    pub compute_pool: usize,
}

impl PoolSizes {
    /// Compute pool sizes for a node with `cores_per_node` cores.
    ///
    /// `default_override` replaces the `cores * 50` default-pool formula
    /// verbatim.  The compute pool follows the backend's threading model.
    pub fn for_node(
        cores_per_node: usize,
        engine_type: EngineType,
        default_override: Option<usize>,
    ) -> Self {
        let default_pool = default_override
            .unwrap_or_else(|| cores_per_node.saturating_mul(DEFAULT_POOL_THREADS_PER_CORE));
        Self {
            default_pool,
            compute_pool: engine_type.compute_pool_size(cores_per_node),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pool_formula() {
        for cores in 1..=128 {
            let sizes = PoolSizes::for_node(cores, EngineType::MklBlas, None);
            assert_eq!(sizes.default_pool, cores * 50);
        }
    }

    #[test]
    fn test_default_pool_override_exact() {
        for (cores, size) in [(1, 1), (4, 7), (32, 3)] {
            let sizes = PoolSizes::for_node(cores, EngineType::MklBlas, Some(size));
            assert_eq!(sizes.default_pool, size);
        }
    }

    #[test]
    fn test_mklblas_compute_pool() {
        for cores in [1, 3, 16, 96] {
            assert_eq!(
                PoolSizes::for_node(cores, EngineType::MklBlas, None).compute_pool,
                1
            );
        }
    }
}
