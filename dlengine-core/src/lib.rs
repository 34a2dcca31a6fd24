//! DL Engine Core - Topology and Thread-Pool Configuration
//!
//! This crate decides, at startup, how many worker nodes and cores per node
//! the current process may use, sizes the engine's thread pools from that
//! topology, and checks that a running cluster session matches the engine's
//! performance assumptions.
//!
//! # Design:
//! - Deployment modes are a closed enum with one resolver per mode
//! - Pool sizes come from a pure policy keyed on the compute backend
//! - One async lock serializes initialization; reads are lock-free atomics
//! - Duplicate-bootstrap detection uses its own atomic counter

pub mod config;
pub mod engine;
pub mod error;
pub mod pool;
pub mod properties;
pub mod session;

pub use config::EngineConfig;
pub use engine::{
    DeploymentMode, Engine, EngineSnapshot, EngineType, InitOptions, PoolSizes, SingletonGuard,
    Topology, TopologyResolver,
};
pub use error::{EngineError, Result};
pub use pool::ThreadPool;
pub use properties::SubmissionProperties;
pub use session::{ConfigSource, ConfigVerifier, PackagedConfig, PropertiesVerifier, SessionConfig};

use tracing::info;
use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber.
///
/// Honors `RUST_LOG` (default `info`).  Safe to call more than once; later
/// calls are ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if tracing_subscriber::fmt().with_env_filter(filter).try_init().is_ok() {
        info!("DL Engine v{}", env!("CARGO_PKG_VERSION"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_idempotent() {
        init_tracing();
        init_tracing();
    }
}
