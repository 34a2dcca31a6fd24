//! Native compute backend selection.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The native numeric-compute backend driving compute-pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EngineType {
    /// Single-threaded MKL BLAS backend.  The backend parallelizes
    /// internally, so it is never wrapped in more than one compute thread.
    #[default]
    MklBlas,
}

impl EngineType {
    /// Number of compute-pool threads for a node with `cores_per_node` cores.
    ///
    /// Multi-threaded backends would return `cores_per_node` here.
    pub fn compute_pool_size(self, _cores_per_node: usize) -> usize {
        match self {
            Self::MklBlas => 1,
        }
    }

    pub(crate) fn to_tag(self) -> u8 {
        match self {
            Self::MklBlas => 0,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::MklBlas),
            _ => None,
        }
    }
}

impl fmt::Display for EngineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MklBlas => write!(f, "mklblas"),
        }
    }
}

impl FromStr for EngineType {
    type Err = EngineError;

    /// Parse a `DL_ENGINE_TYPE` value; empty means the default backend.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "mklblas" => Ok(Self::MklBlas),
            _ => Err(EngineError::UnknownEngineType(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_case_insensitive() {
        assert_eq!("MKLBLAS".parse::<EngineType>().unwrap(), EngineType::MklBlas);
        assert_eq!("MklBlas".parse::<EngineType>().unwrap(), EngineType::MklBlas);
        assert_eq!("".parse::<EngineType>().unwrap(), EngineType::MklBlas);
    }

    #[test]
    fn test_parse_unknown() {
        let err = "openblas".parse::<EngineType>().unwrap_err();
        assert_eq!(err, EngineError::UnknownEngineType("openblas".into()));
    }

    #[test]
    fn test_mklblas_compute_pool_is_single_threaded() {
        for cores in [1, 2, 8, 64, 1024] {
            assert_eq!(EngineType::MklBlas.compute_pool_size(cores), 1);
        }
    }

    #[test]
    fn test_tag_roundtrip() {
        let t = EngineType::MklBlas;
        assert_eq!(EngineType::from_tag(t.to_tag()), Some(t));
        assert_eq!(EngineType::from_tag(1), None);
        assert_eq!(EngineType::from_tag(u8::MAX), None);
        assert_eq!(t.to_string(), "mklblas");
    }
}
