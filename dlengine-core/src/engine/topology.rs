//! Topology Resolution
//!
//! Each cluster manager exposes the same two numbers, executor count and
//! cores per executor, under different submission property names.  This
//! module detects the deployment mode from the master descriptor and
//! normalizes the granted allocation into a single [`Topology`].
//!
//! The resolver only reads allocation metadata that was already granted.  It
//! never negotiates for resources.

use crate::error::{parse_positive, EngineError, Result};
use crate::properties::{
    SubmissionProperties, CORES_MAX, DYN_ALLOC_ENABLED, DYN_ALLOC_MAX, DYN_ALLOC_MIN,
    EXECUTOR_CORES, EXECUTOR_INSTANCES, MASTER, MESOS_COARSE,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Resolved node count and cores per node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    /// Number of worker nodes (executors).
    pub node_count: usize,
    /// Cores usable by compute threads on each node.
    pub cores_per_node: usize,
}

impl Topology {
    pub fn new(node_count: usize, cores_per_node: usize) -> Self {
        Self {
            node_count,
            cores_per_node,
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} node(s) x {} core(s)", self.node_count, self.cores_per_node)
    }
}

/// Deployment mode detected from the master descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentMode {
    /// `local[N]`: one node with `N` cores.
    LocalN(usize),
    /// `local[*]`: one node with every physical core.
    LocalStar,
    /// `spark://...` standalone cluster.
    Standalone,
    /// `yarn` resource manager.
    Yarn,
    /// `mesos://...`, coarse-grained only.
    Mesos,
}

impl DeploymentMode {
    /// Detect the deployment mode from a master descriptor.
    pub fn detect(master: &str) -> Result<Self> {
        let lower = master.trim().to_ascii_lowercase();
        if lower.starts_with("local") {
            return Self::parse_local(master, &lower);
        }
        if lower.starts_with("spark") {
            Ok(Self::Standalone)
        } else if lower.starts_with("yarn") {
            Ok(Self::Yarn)
        } else if lower.starts_with("mesos") {
            Ok(Self::Mesos)
        } else {
            Err(EngineError::UnparseableDeploymentDescriptor {
                descriptor: master.to_string(),
                reason: "unsupported master format, expected local[N], local[*], \
                         spark://, yarn or mesos://"
                    .to_string(),
            })
        }
    }

    fn parse_local(master: &str, lower: &str) -> Result<Self> {
        let unparseable = || EngineError::UnparseableDeploymentDescriptor {
            descriptor: master.to_string(),
            reason: "local mode must be local[N] with N > 0, or local[*]".to_string(),
        };

        let inner = lower
            .strip_prefix("local[")
            .and_then(|rest| rest.strip_suffix(']'))
            .ok_or_else(unparseable)?;
        if inner == "*" {
            return Ok(Self::LocalStar);
        }
        if inner.is_empty() || !inner.bytes().all(|b| b.is_ascii_digit()) {
            return Err(unparseable());
        }
        match inner.parse::<usize>() {
            Ok(n) if n > 0 => Ok(Self::LocalN(n)),
            _ => Err(unparseable()),
        }
    }
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalN(n) => write!(f, "local[{n}]"),
            Self::LocalStar => write!(f, "local[*]"),
            Self::Standalone => write!(f, "standalone"),
            Self::Yarn => write!(f, "yarn"),
            Self::Mesos => write!(f, "mesos"),
        }
    }
}

/// Maps submission metadata to a [`Topology`].
#[derive(Debug, Clone, Copy)]
pub struct TopologyResolver {
    physical_cores: usize,
}

impl TopologyResolver {
    /// Create a resolver; `physical_cores` backs `local[*]`.
    pub fn new(physical_cores: usize) -> Self {
        Self { physical_cores }
    }

    /// Resolve the topology.
    ///
    /// Explicit counts win when both are supplied; they are returned verbatim
    /// and validated later by `Engine::init`.
    pub fn resolve(
        &self,
        explicit_nodes: Option<usize>,
        explicit_cores: Option<usize>,
        props: &SubmissionProperties,
    ) -> Result<Topology> {
        if let (Some(nodes), Some(cores)) = (explicit_nodes, explicit_cores) {
            debug!(nodes, cores, "Using explicit topology");
            return Ok(Topology::new(nodes, cores));
        }

        let master = props
            .get(MASTER)
            .ok_or_else(|| EngineError::missing(MASTER, "submit with the --master option"))?;
        let mode = DeploymentMode::detect(master)?;
        let topology = self.resolve_mode(mode, props)?;
        debug!(master, mode = %mode, %topology, "Resolved topology from submission");
        Ok(topology)
    }

    /// Resolve the topology for an already detected mode.
    pub fn resolve_mode(
        &self,
        mode: DeploymentMode,
        props: &SubmissionProperties,
    ) -> Result<Topology> {
        match mode {
            DeploymentMode::LocalN(n) => Ok(Topology::new(1, n)),
            DeploymentMode::LocalStar => Ok(Topology::new(1, self.physical_cores)),
            DeploymentMode::Standalone => resolve_standalone(props),
            DeploymentMode::Yarn => resolve_yarn(props),
            DeploymentMode::Mesos => resolve_mesos(props),
        }
    }
}

fn resolve_standalone(props: &SubmissionProperties) -> Result<Topology> {
    let cores = executor_cores(props)?;
    let nodes = match dynamic_allocation_executors(props)? {
        Some(n) => n,
        None => nodes_from_core_budget(props, cores)?,
    };
    Ok(Topology::new(nodes, cores))
}

fn resolve_yarn(props: &SubmissionProperties) -> Result<Topology> {
    let cores = executor_cores(props)?;
    let nodes = match dynamic_allocation_executors(props)? {
        Some(n) => n,
        None => {
            let raw = props.get(EXECUTOR_INSTANCES).ok_or_else(|| {
                EngineError::missing(
                    EXECUTOR_INSTANCES,
                    "can't find executor number, submit with the --num-executors option",
                )
            })?;
            parse_positive(EXECUTOR_INSTANCES, raw)?
        }
    };
    Ok(Topology::new(nodes, cores))
}

fn resolve_mesos(props: &SubmissionProperties) -> Result<Topology> {
    if props
        .get(MESOS_COARSE)
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("false"))
    {
        return Err(EngineError::UnsupportedAllocationMode(format!(
            "mesos fine-grained mode ({MESOS_COARSE}=false) is not supported, \
             set {MESOS_COARSE}=true"
        )));
    }
    resolve_standalone(props)
}

fn executor_cores(props: &SubmissionProperties) -> Result<usize> {
    let raw = props.get(EXECUTOR_CORES).ok_or_else(|| {
        EngineError::missing(
            EXECUTOR_CORES,
            "can't find executor core number, submit with the --executor-cores option",
        )
    })?;
    parse_positive(EXECUTOR_CORES, raw)
}

fn nodes_from_core_budget(props: &SubmissionProperties, cores: usize) -> Result<usize> {
    let raw = props.get(CORES_MAX).ok_or_else(|| {
        EngineError::missing(
            CORES_MAX,
            "can't find total core number, submit with the --total-executor-cores option",
        )
    })?;
    let total = parse_positive(CORES_MAX, raw)?;
    split_core_budget(total, cores)
}

/// Number of executors a `total` core budget yields at `per_executor` cores
/// each.  The budget must exceed and be a multiple of `per_executor`.
pub fn split_core_budget(total: usize, per_executor: usize) -> Result<usize> {
    if per_executor == 0 || total <= per_executor || total % per_executor != 0 {
        return Err(EngineError::IndivisibleCoreBudget {
            total,
            per_executor,
        });
    }
    Ok(total / per_executor)
}

/// Fixed executor count under dynamic allocation, or `None` when it is off.
///
/// Absent bounds default to 1; differing bounds are rejected since the
/// engine can't tolerate executors joining or leaving mid-run.
fn dynamic_allocation_executors(props: &SubmissionProperties) -> Result<Option<usize>> {
    let enabled = props
        .get(DYN_ALLOC_ENABLED)
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));
    if !enabled {
        return Ok(None);
    }

    let bound = |key: &str| -> Result<usize> {
        props.get(key).map_or(Ok(1), |v| parse_positive(key, v))
    };
    let min = bound(DYN_ALLOC_MIN)?;
    let max = bound(DYN_ALLOC_MAX)?;
    if min != max {
        return Err(EngineError::InconsistentAllocationBounds { min, max });
    }
    Ok(Some(min))
}
