//! Engine Configuration
//!
//! Startup settings read once from the process environment:
//!
//! - `DL_CORE_NUMBER`: overrides physical core detection
//! - `DL_ENGINE_TYPE`: native compute backend (`mklblas`)
//! - `ON_SPARK`: presence alone sets the on-spark flag
//! - `DL_DEFAULT_POOL_SIZE`: overrides the default pool sizing formula

use crate::engine::EngineType;
use crate::error::{parse_positive, Result};
use tracing::debug;

/// Overrides physical core detection.
pub const ENV_CORE_NUMBER: &str = "DL_CORE_NUMBER";
/// Selects the compute backend.
pub const ENV_ENGINE_TYPE: &str = "DL_ENGINE_TYPE";
/// Distributed session flag.
pub const ENV_ON_SPARK: &str = "ON_SPARK";
/// Default pool size tunable.
pub const ENV_DEFAULT_POOL_SIZE: &str = "DL_DEFAULT_POOL_SIZE";

/// Environment-derived engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Cores per node used when no topology is supplied.
    pub physical_cores: usize,
    /// Active compute backend.
    pub engine_type: EngineType,
    /// `true` when `ON_SPARK` is set.
    pub on_spark_env: bool,
    /// Replaces `cores * 50` for the default pool when set.
    pub default_pool_size: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            physical_cores: detect_physical_cores(),
            engine_type: EngineType::default(),
            on_spark_env: false,
            default_pool_size: None,
        }
    }
}

impl EngineConfig {
    /// Read the configuration from the process environment.
    ///
    /// Fails on an unknown `DL_ENGINE_TYPE` or a non-positive numeric
    /// override; both are fatal at startup.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let physical_cores = match lookup(ENV_CORE_NUMBER) {
            Some(v) => parse_positive(ENV_CORE_NUMBER, &v)?,
            None => detect_physical_cores(),
        };

        let engine_type = match lookup(ENV_ENGINE_TYPE) {
            Some(v) => v.parse()?,
            None => EngineType::default(),
        };

        let default_pool_size = lookup(ENV_DEFAULT_POOL_SIZE)
            .map(|v| parse_positive(ENV_DEFAULT_POOL_SIZE, &v))
            .transpose()?;

        let config = Self {
            physical_cores,
            engine_type,
            on_spark_env: lookup(ENV_ON_SPARK).is_some(),
            default_pool_size,
        };
        debug!(?config, "Loaded engine configuration");
        Ok(config)
    }

    /// Pin the physical core count instead of detecting it.
    pub fn with_physical_cores(mut self, cores: usize) -> Self {
        self.physical_cores = cores.max(1);
        self
    }

    /// Override the default pool size.
    pub fn with_default_pool_size(mut self, size: usize) -> Self {
        self.default_pool_size = Some(size);
        self
    }

}

/// Physical cores on this host, never less than 1.
pub fn detect_physical_cores() -> usize {
    num_cpus::get_physical().max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_empty_environment() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.physical_cores, detect_physical_cores());
        assert_eq!(config.engine_type, EngineType::MklBlas);
        assert!(!config.on_spark_env);
        assert_eq!(config.default_pool_size, None);
    }

    #[test]
    fn test_core_number_override() {
        let config = EngineConfig::from_lookup(lookup(&[(ENV_CORE_NUMBER, "6")])).unwrap();
        assert_eq!(config.physical_cores, 6);
    }

    #[test]
    fn test_core_number_must_be_positive() {
        let err = EngineConfig::from_lookup(lookup(&[(ENV_CORE_NUMBER, "0")])).unwrap_err();
        assert!(matches!(err, EngineError::InvalidPropertyValue { .. }));
    }

    #[test]
    fn test_engine_type_case_insensitive() {
        let config = EngineConfig::from_lookup(lookup(&[(ENV_ENGINE_TYPE, "MklBlas")])).unwrap();
        assert_eq!(config.engine_type, EngineType::MklBlas);
    }

    #[test]
    fn test_unknown_engine_type_is_fatal() {
        let err = EngineConfig::from_lookup(lookup(&[(ENV_ENGINE_TYPE, "cuda")])).unwrap_err();
        assert_eq!(err, EngineError::UnknownEngineType("cuda".into()));
    }

    #[test]
    fn test_on_spark_presence_only() {
        let config = EngineConfig::from_lookup(lookup(&[(ENV_ON_SPARK, "false")])).unwrap();
        assert!(config.on_spark_env);
    }

    #[test]
    fn test_default_pool_size_override() {
        let config =
            EngineConfig::from_lookup(lookup(&[(ENV_DEFAULT_POOL_SIZE, "17")])).unwrap();
        assert_eq!(config.default_pool_size, Some(17));
    }

    #[test]
    fn test_detected_cores_are_physical() {
        let cores = detect_physical_cores();
        assert!(cores >= 1);
        assert_eq!(cores, num_cpus::get_physical().max(1));
    }
}
