//! Submission Properties
//!
//! Cluster managers hand the driver its granted allocation as a flat bag of
//! string properties (`spark.master`, `spark.executor.cores`, ...).  This
//! module holds that bag and the whitespace-separated `key value` line format
//! shared by property files and the packaged session configuration.

use crate::error::EngineError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Property set by the submission tool in every submitted application.
pub const SUBMIT_MARKER: &str = "SPARK_SUBMIT";
/// Master-endpoint descriptor (`local[4]`, `spark://host:7077`, `yarn`, ...).
pub const MASTER: &str = "spark.master";
/// Cores granted to each executor.
pub const EXECUTOR_CORES: &str = "spark.executor.cores";
/// Total core budget across all executors (standalone and mesos).
pub const CORES_MAX: &str = "spark.cores.max";
/// Executor count (yarn).
pub const EXECUTOR_INSTANCES: &str = "spark.executor.instances";
/// Whether the executor count may change at runtime.
pub const DYN_ALLOC_ENABLED: &str = "spark.dynamicAllocation.enabled";
/// Lower bound on executors under dynamic allocation.
pub const DYN_ALLOC_MIN: &str = "spark.dynamicAllocation.minExecutors";
/// Upper bound on executors under dynamic allocation.
pub const DYN_ALLOC_MAX: &str = "spark.dynamicAllocation.maxExecutors";
/// Mesos coarse-grained flag; `false` selects fine-grained mode.
pub const MESOS_COARSE: &str = "spark.mesos.coarse";

/// Key/value properties describing the current submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionProperties {
    entries: BTreeMap<String, String>,
}

impl SubmissionProperties {
    /// Create an empty property set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a property set from `(key, value)` pairs; later pairs win.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut props = Self::new();
        for (k, v) in pairs {
            props.set(k, v);
        }
        props
    }

    /// Parse property-file text.
    pub fn parse(text: &str) -> crate::error::Result<Self> {
        parse_lines(text)
            .map(Self::from_pairs)
            .map_err(|(line, content)| EngineError::MalformedPropertyLine { line, content })
    }

    /// Load a property file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read properties file {}", path.display()))?;
        let props = Self::parse(&text)
            .with_context(|| format!("Failed to parse properties file {}", path.display()))?;
        debug!(path = %path.display(), count = props.len(), "Loaded submission properties");
        Ok(props)
    }

    /// Set a property, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Look up a property.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Returns `true` when `key` is present, whatever its value.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Iterate over all properties in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Split `key value` lines, skipping blanks and `#` comments.
///
/// Order is preserved.  On a line without a value, returns its 1-based
/// number and content.
pub(crate) fn parse_lines(text: &str) -> std::result::Result<Vec<(String, String)>, (usize, String)> {
    let mut pairs = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.splitn(2, char::is_whitespace);
        let key = parts.next().unwrap_or_default();
        let value = parts.next().map(str::trim).unwrap_or_default();
        if value.is_empty() {
            return Err((idx + 1, raw.to_string()));
        }
        pairs.push((key.to_string(), value.to_string()));
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lines_skips_comments_and_blanks() {
        let text = "# header\n\nspark.master   local[4]\n  spark.executor.cores\t2  \n";
        let pairs = parse_lines(text).unwrap();
        assert_eq!(
            pairs,
            vec![
                ("spark.master".to_string(), "local[4]".to_string()),
                ("spark.executor.cores".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_lines_rejects_missing_value() {
        let err = parse_lines("a 1\nlonely\n").unwrap_err();
        assert_eq!(err, (2, "lonely".to_string()));
    }

    #[test]
    fn test_parse_reports_malformed_line() {
        let err = SubmissionProperties::parse("spark.master yarn\nspark.executor.cores\n").unwrap_err();
        assert_eq!(
            err,
            EngineError::MalformedPropertyLine {
                line: 2,
                content: "spark.executor.cores".to_string(),
            }
        );
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_load_names_file_on_malformed_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"spark.master\n").unwrap();
        let err = SubmissionProperties::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse properties file"));
        assert!(err.downcast_ref::<EngineError>().is_some());
    }

    #[test]
    fn test_from_pairs_last_wins() {
        let props = SubmissionProperties::from_pairs([(MASTER, "yarn"), (MASTER, "local[2]")]);
        assert_eq!(props.get(MASTER), Some("local[2]"));
        assert_eq!(props.len(), 1);
    }

    #[test]
    fn test_marker_presence() {
        let mut props = SubmissionProperties::new();
        assert!(!props.contains(SUBMIT_MARKER));
        props.set(SUBMIT_MARKER, "");
        assert!(props.contains(SUBMIT_MARKER));
    }

    #[test]
    fn test_serde_transparent() {
        let props = SubmissionProperties::from_pairs([(EXECUTOR_CORES, "4")]);
        let json = serde_json::to_string(&props).unwrap();
        assert_eq!(json, r#"{"spark.executor.cores":"4"}"#);
        let back: SubmissionProperties = serde_json::from_str(&json).unwrap();
        assert_eq!(back, props);
    }
}
