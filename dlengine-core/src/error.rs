//! Engine Error Types
//!
//! Every failure the engine can report to a caller of `init` (or of a read
//! accessor) is one variant of [`EngineError`].  Messages carry the offending
//! value and name the submission option or environment variable that fixes
//! it, since they are read by operators rather than developers.

use thiserror::Error;

/// Shorthand for results produced by the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by topology resolution, sizing and initialization.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A read accessor was called before a successful `init`.
    #[error(
        "engine is not initialized: {what} is unavailable; \
         call Engine::init (or Engine::init_auto) before using the engine"
    )]
    UninitializedAccess {
        /// The accessor that was called.
        what: &'static str,
    },

    /// Non-positive node/core count, or more than one node outside a
    /// distributed session.
    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    /// The master-endpoint descriptor could not be parsed.
    #[error("can't parse master descriptor '{descriptor}': {reason}")]
    UnparseableDeploymentDescriptor {
        /// The descriptor as submitted.
        descriptor: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A property required by the detected deployment mode is absent.
    #[error("can't find required property '{key}'; {hint}")]
    MissingRequiredProperty {
        /// The property key.
        key: String,
        /// The submission option that sets it.
        hint: String,
    },

    /// Dynamic allocation is enabled with different min/max executor counts.
    #[error(
        "spark.dynamicAllocation.minExecutors ({min}) and \
         spark.dynamicAllocation.maxExecutors ({max}) must be identical"
    )]
    InconsistentAllocationBounds {
        /// Configured minimum executor count.
        min: usize,
        /// Configured maximum executor count.
        max: usize,
    },

    /// The total core budget cannot be split evenly across executors.
    #[error(
        "total core number ({total}) can't be divided by the per-executor core \
         number ({per_executor}); pass matching --total-executor-cores and --executor-cores"
    )]
    IndivisibleCoreBudget {
        /// Value of `spark.cores.max`.
        total: usize,
        /// Value of `spark.executor.cores`.
        per_executor: usize,
    },

    /// The cluster manager is configured in a mode the engine can't use.
    #[error("unsupported allocation mode: {0}")]
    UnsupportedAllocationMode(String),

    /// An existing session diverges from the required configuration.
    #[error("invalid session configuration for '{key}': {detail}")]
    ConfigMismatch {
        /// The offending key.
        key: String,
        /// Expected vs. actual value, or why it could not be checked.
        detail: String,
    },

    /// `DL_ENGINE_TYPE` holds a value the engine doesn't know.
    #[error("unknown DL_ENGINE_TYPE '{0}'; unset it or set it to 'mklblas'")]
    UnknownEngineType(String),

    /// A property or environment variable is not a positive integer.
    #[error("invalid value '{value}' for {key}: expected a positive integer")]
    InvalidPropertyValue {
        /// The property key or environment variable name.
        key: String,
        /// The raw value.
        value: String,
    },

    /// The packaged session configuration resource is malformed.
    #[error("malformed session config at line {line}: '{content}'")]
    ConfigSource {
        /// 1-based line number.
        line: usize,
        /// Offending line.
        content: String,
    },

    /// A submission property file has a line that is not `key value`.
    #[error("malformed property line {line}: '{content}' (expected 'key value')")]
    MalformedPropertyLine {
        /// 1-based line number.
        line: usize,
        /// Offending line.
        content: String,
    },

    /// A worker pool could not start its threads.
    #[error("failed to start thread pool '{pool}': {reason}")]
    PoolStart {
        /// Pool name.
        pool: String,
        /// Underlying failure.
        reason: String,
    },
}

impl EngineError {
    pub(crate) fn missing(key: &str, hint: &str) -> Self {
        Self::MissingRequiredProperty {
            key: key.to_string(),
            hint: hint.to_string(),
        }
    }

    pub(crate) fn invalid_value(key: &str, value: &str) -> Self {
        Self::InvalidPropertyValue {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

/// Parse `value` as a positive integer, reporting `key` on failure.
pub(crate) fn parse_positive(key: &str, value: &str) -> Result<usize> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(EngineError::invalid_value(key, value)),
    }
}
