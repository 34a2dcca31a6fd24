//! Engine State and Initialization
//!
//! [`Engine`] is the process-wide record of the resolved topology, the
//! active compute backend and the two worker pools sized from them.  The
//! hosting process owns one `Engine` and passes it by reference; tests build
//! as many as they like.
//!
//! # Concurrency:
//! - `init`, the test-only setters and `reset` are serialized by one
//!   async mutex
//! - Read accessors never lock: the topology is published as a single
//!   packed atomic and `initialized` is stored last
//! - The singleton guard is a separate atomic, usable at any time

pub mod engine_type;
pub mod singleton;
pub mod sizing;
pub mod topology;

pub use engine_type::EngineType;
pub use singleton::SingletonGuard;
pub use sizing::PoolSizes;
pub use topology::{DeploymentMode, Topology, TopologyResolver};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::pool::ThreadPool;
use crate::properties::{SubmissionProperties, SUBMIT_MARKER};
use crate::session::{ConfigSource, ConfigVerifier, PackagedConfig, SessionConfig};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Flags for [`Engine::init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitOptions {
    /// Running inside a distributed cluster session.
    pub on_spark: bool,
    /// Return a [`SessionConfig`] when `on_spark` is set.
    pub create_config: bool,
    /// Check the running session with a [`ConfigVerifier`] when `on_spark`
    /// is set.
    pub verify_consistency: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            on_spark: false,
            create_config: true,
            verify_consistency: false,
        }
    }
}

impl InitOptions {
    /// Single-process run: no session, no session config.
    pub fn local() -> Self {
        Self {
            on_spark: false,
            create_config: false,
            verify_consistency: false,
        }
    }

    /// Distributed run that wants a session config back.
    pub fn distributed() -> Self {
        Self {
            on_spark: true,
            create_config: true,
            verify_consistency: false,
        }
    }

    /// Also verify the running session.
    pub fn with_verification(mut self) -> Self {
        self.verify_consistency = true;
        self
    }
}

/// Point-in-time view of an initialized engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub topology: Topology,
    pub on_spark: bool,
    pub engine_type: EngineType,
    pub pools: PoolSizes,
}

/// Process-wide engine state.
pub struct Engine {
    config: EngineConfig,
    session_source: Arc<dyn ConfigSource>,
    init_lock: Mutex<()>,
    initialized: AtomicBool,
    on_spark: AtomicBool,
    /// Node count in the high half, cores per node in the low half.
    topology: AtomicU64,
    engine_type: AtomicU8,
    default_pool: ThreadPool,
    compute_pool: ThreadPool,
    singleton: SingletonGuard,
}

impl Engine {
    /// Create an uninitialized engine using the packaged session settings.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_session_source(config, Arc::new(PackagedConfig::new()))
    }

    /// Create an uninitialized engine with a custom session settings source.
    pub fn with_session_source(config: EngineConfig, session_source: Arc<dyn ConfigSource>) -> Self {
        info!(
            physical_cores = config.physical_cores,
            engine_type = %config.engine_type,
            "Creating Engine (uninitialized)"
        );
        Self {
            topology: AtomicU64::new(pack(1, config.physical_cores)),
            engine_type: AtomicU8::new(config.engine_type.to_tag()),
            on_spark: AtomicBool::new(config.on_spark_env),
            initialized: AtomicBool::new(false),
            init_lock: Mutex::new(()),
            default_pool: ThreadPool::new("default", 1),
            compute_pool: ThreadPool::new("compute", 1),
            singleton: SingletonGuard::new(),
            session_source,
            config,
        }
    }

    /// Initialize with an explicit topology.
    ///
    /// Calling `init` again re-validates and re-sizes; pools whose size does
    /// not change are left alone.  On failure nothing is modified.
    ///
    /// Returns the session configuration to apply when `on_spark` and
    /// `create_config` are both set.
    pub async fn init(
        &self,
        node_count: usize,
        cores_per_node: usize,
        options: InitOptions,
        verifier: Option<&dyn ConfigVerifier>,
    ) -> Result<Option<SessionConfig>> {
        let _guard = self.init_lock.lock().await;
        debug!(node_count, cores_per_node, ?options, "Engine init requested");

        check_count("node number", node_count)?;
        check_count("core number", cores_per_node)?;
        if !options.on_spark && node_count != 1 {
            return Err(EngineError::InvalidTopology(format!(
                "node number must be 1 outside a distributed session, got {node_count}"
            )));
        }

        if options.on_spark && options.verify_consistency {
            let verifier = verifier.ok_or_else(|| EngineError::ConfigMismatch {
                key: "session".to_string(),
                detail: "consistency check requested but no session verifier was supplied"
                    .to_string(),
            })?;
            let required = self.session_source.read_required_pairs()?;
            verifier.verify(&required).await?;
        }

        let session_config = if options.on_spark && options.create_config {
            Some(self.create_session_config()?)
        } else {
            None
        };

        let sizes = self.pool_sizes(cores_per_node)?;
        self.apply_pool_sizes(sizes)?;
        self.topology
            .store(pack(node_count, cores_per_node), Ordering::Release);
        self.on_spark.store(options.on_spark, Ordering::Release);
        self.initialized.store(true, Ordering::Release);

        info!(
            node_count,
            cores_per_node,
            on_spark = options.on_spark,
            default_pool = sizes.default_pool,
            compute_pool = sizes.compute_pool,
            "Engine initialized"
        );
        Ok(session_config)
    }

    /// Initialize from the environment.
    ///
    /// With the `SPARK_SUBMIT` marker in `props` the topology is resolved
    /// from the submission and the engine joins the distributed session,
    /// verifying it when a verifier is supplied.  Otherwise the engine runs
    /// on one node with every physical core.  `ON_SPARK` only seeds the
    /// on-spark flag at construction; it does not select resolution.
    pub async fn init_auto(
        &self,
        props: &SubmissionProperties,
        verifier: Option<&dyn ConfigVerifier>,
    ) -> Result<Option<SessionConfig>> {
        if props.contains(SUBMIT_MARKER) {
            let topology = TopologyResolver::new(self.config.physical_cores)
                .resolve(None, None, props)?;
            info!(%topology, "Distributed submission detected");
            let mut options = InitOptions::distributed();
            options.verify_consistency = verifier.is_some();
            self.init(topology.node_count, topology.cores_per_node, options, verifier)
                .await
        } else {
            self.init(1, self.config.physical_cores, InitOptions::local(), None)
                .await
        }
    }

    /// Cores per node.
    pub fn core_number(&self) -> Result<usize> {
        self.ensure_initialized("core number")?;
        Ok(unpack(self.topology.load(Ordering::Acquire)).cores_per_node)
    }

    /// Number of nodes.
    pub fn node_number(&self) -> Result<usize> {
        self.ensure_initialized("node number")?;
        Ok(unpack(self.topology.load(Ordering::Acquire)).node_count)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Whether the engine runs inside a distributed session.
    pub fn on_spark(&self) -> bool {
        self.on_spark.load(Ordering::Acquire)
    }

    pub fn engine_type(&self) -> EngineType {
        // Tags are only ever written by `EngineType::to_tag`.
        EngineType::from_tag(self.engine_type.load(Ordering::Acquire))
            .unwrap_or(self.config.engine_type)
    }

    /// Oversubscribed pool for blocking and parallel-map work.
    pub fn default_pool(&self) -> Result<&ThreadPool> {
        self.ensure_initialized("default thread pool")?;
        Ok(&self.default_pool)
    }

    /// Pool for numeric compute tasks.
    pub fn compute_pool(&self) -> Result<&ThreadPool> {
        self.ensure_initialized("compute thread pool")?;
        Ok(&self.compute_pool)
    }

    /// Resolved topology, flags and pool sizes.
    pub fn snapshot(&self) -> Result<EngineSnapshot> {
        self.ensure_initialized("engine snapshot")?;
        Ok(EngineSnapshot {
            topology: unpack(self.topology.load(Ordering::Acquire)),
            on_spark: self.on_spark(),
            engine_type: self.engine_type(),
            pools: PoolSizes {
                default_pool: self.default_pool.size(),
                compute_pool: self.compute_pool.size(),
            },
        })
    }

    /// Register an engine bootstrap; `true` only for the first one since the
    /// last [`reset_singleton_flag`](Self::reset_singleton_flag).
    pub fn check_singleton(&self) -> bool {
        self.singleton.check()
    }

    pub fn reset_singleton_flag(&self) {
        self.singleton.reset();
    }

    /// Session configuration the engine requires, without initializing.
    pub fn create_session_config(&self) -> Result<SessionConfig> {
        SessionConfig::from_source(self.session_source.as_ref())
    }

    /// Verify a running session against the required settings.
    pub async fn check_session_consistency(&self, verifier: &dyn ConfigVerifier) -> Result<()> {
        let required = self.session_source.read_required_pairs()?;
        verifier.verify(&required).await
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── test support ──────────────────────────────────────────────────

    /// Override the core number and re-size the pools.  Intended for tests.
    pub async fn set_core_number(&self, cores_per_node: usize) -> Result<()> {
        let _guard = self.init_lock.lock().await;
        check_count("core number", cores_per_node)?;
        let sizes = self.pool_sizes(cores_per_node)?;
        self.apply_pool_sizes(sizes)?;
        let nodes = unpack(self.topology.load(Ordering::Acquire)).node_count;
        self.topology
            .store(pack(nodes, cores_per_node), Ordering::Release);
        debug!(cores_per_node, "Core number overridden");
        Ok(())
    }

    /// Override the node number.  Intended for tests.
    pub async fn set_node_number(&self, node_count: usize) -> Result<()> {
        let _guard = self.init_lock.lock().await;
        check_count("node number", node_count)?;
        let cores = unpack(self.topology.load(Ordering::Acquire)).cores_per_node;
        self.topology.store(pack(node_count, cores), Ordering::Release);
        debug!(node_count, "Node number overridden");
        Ok(())
    }

    /// Switch the compute backend; applied to the pools by the next init.
    /// Intended for tests.
    pub async fn set_engine_type(&self, engine_type: EngineType) {
        let _guard = self.init_lock.lock().await;
        self.engine_type
            .store(engine_type.to_tag(), Ordering::Release);
        debug!(%engine_type, "Engine type overridden");
    }

    /// Mark the engine uninitialized with a 1x1 topology.
    ///
    /// Engine type, pools and the singleton counter are kept.  Intended for
    /// tests.
    pub async fn reset(&self) {
        let _guard = self.init_lock.lock().await;
        self.initialized.store(false, Ordering::Release);
        self.topology.store(pack(1, 1), Ordering::Release);
        info!("Engine reset");
    }

    // ── private helpers ───────────────────────────────────────────────

    fn ensure_initialized(&self, what: &'static str) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(EngineError::UninitializedAccess { what })
        }
    }

    fn pool_sizes(&self, cores_per_node: usize) -> Result<PoolSizes> {
        let sizes = PoolSizes::for_node(
            cores_per_node,
            self.engine_type(),
            self.config.default_pool_size,
        );
        if sizes.default_pool == 0 || sizes.compute_pool == 0 {
            return Err(EngineError::InvalidTopology(format!(
                "pool sizes must be positive, got default={} compute={}",
                sizes.default_pool, sizes.compute_pool
            )));
        }
        Ok(sizes)
    }

    fn apply_pool_sizes(&self, sizes: PoolSizes) -> Result<()> {
        self.default_pool.resize(sizes.default_pool)?;
        self.compute_pool.resize(sizes.compute_pool)?;
        Ok(())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("initialized", &self.is_initialized())
            .field("on_spark", &self.on_spark())
            .field("topology", &unpack(self.topology.load(Ordering::Acquire)))
            .field("engine_type", &self.engine_type())
            .field("default_pool", &self.default_pool.size())
            .field("compute_pool", &self.compute_pool.size())
            .finish()
    }
}

fn check_count(what: &str, n: usize) -> Result<()> {
    if n == 0 {
        return Err(EngineError::InvalidTopology(format!("{what} must be positive, got 0")));
    }
    if u32::try_from(n).is_err() {
        return Err(EngineError::InvalidTopology(format!("{what} {n} is too large")));
    }
    Ok(())
}

fn pack(node_count: usize, cores_per_node: usize) -> u64 {
    ((node_count as u64) << 32) | (cores_per_node as u64 & 0xFFFF_FFFF)
}

fn unpack(packed: u64) -> Topology {
    Topology::new((packed >> 32) as usize, (packed & 0xFFFF_FFFF) as usize)
}
