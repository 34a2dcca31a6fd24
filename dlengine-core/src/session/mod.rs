//! Cluster Session Configuration
//!
//! The engine's performance model assumes a handful of session settings
//! (no shuffle locality wait, no speculation, ...).  Those settings ship with
//! the crate as a packaged resource and are consumed two ways:
//!
//! - verbatim, to build the [`SessionConfig`] handed back by `Engine::init`
//!   when the caller is about to create a session
//! - by a [`ConfigVerifier`], to check that an already running session
//!   exposes the same values
//!
//! The session itself is external; it is created or joined by the caller.

use crate::error::{EngineError, Result};
use crate::properties::{parse_lines, SubmissionProperties};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Required session settings packaged with the engine.
const PACKAGED_SESSION_CONF: &str = include_str!("../../resources/session.conf");

/// Source of the `(key, value)` pairs a session must carry.
pub trait ConfigSource: Send + Sync {
    /// Required pairs in their declared order.
    fn read_required_pairs(&self) -> Result<Vec<(String, String)>>;
}

/// The settings embedded in the crate, in `key value` line format.
#[derive(Debug, Clone, Copy)]
pub struct PackagedConfig {
    text: &'static str,
}

impl PackagedConfig {
    pub fn new() -> Self {
        Self {
            text: PACKAGED_SESSION_CONF,
        }
    }

    /// Use alternative packaged text (same line format).
    pub fn from_static(text: &'static str) -> Self {
        Self { text }
    }
}

impl Default for PackagedConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigSource for PackagedConfig {
    fn read_required_pairs(&self) -> Result<Vec<(String, String)>> {
        parse_lines(self.text).map_err(|(line, content)| EngineError::ConfigSource { line, content })
    }
}

/// Session configuration the caller should apply when creating a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    entries: Vec<(String, String)>,
}

impl SessionConfig {
    /// Build from a config source, keeping its order.
    pub fn from_source(source: &dyn ConfigSource) -> Result<Self> {
        let entries = source.read_required_pairs()?;
        debug!(count = entries.len(), "Built session configuration");
        Ok(Self { entries })
    }

    /// Look up a setting.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set a setting, replacing an existing value in place.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// All settings in order.
    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Checks that a running session carries the required settings.
///
/// Implementations may talk to the cluster; timeouts and retries are theirs.
#[async_trait]
pub trait ConfigVerifier: Send + Sync {
    /// Fail with [`EngineError::ConfigMismatch`] on the first missing key or
    /// diverging value.
    async fn verify(&self, required: &[(String, String)]) -> Result<()>;
}

/// Verifies against a snapshot of an existing session's properties.
#[derive(Debug, Clone, Default)]
pub struct PropertiesVerifier {
    session: SubmissionProperties,
}

impl PropertiesVerifier {
    pub fn new(session: SubmissionProperties) -> Self {
        Self { session }
    }
}

#[async_trait]
impl ConfigVerifier for PropertiesVerifier {
    async fn verify(&self, required: &[(String, String)]) -> Result<()> {
        for (key, expected) in required {
            match self.session.get(key) {
                Some(actual) if actual == expected => {}
                Some(actual) => {
                    return Err(EngineError::ConfigMismatch {
                        key: key.clone(),
                        detail: format!(
                            "expected '{expected}' but the session has '{actual}'; \
                             create the session from Engine::create_session_config"
                        ),
                    })
                }
                None => {
                    return Err(EngineError::ConfigMismatch {
                        key: key.clone(),
                        detail: format!(
                            "missing from the session, expected '{expected}'; \
                             create the session from Engine::create_session_config"
                        ),
                    })
                }
            }
        }
        info!(checked = required.len(), "Session configuration verified");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required() -> Vec<(String, String)> {
        PackagedConfig::new().read_required_pairs().unwrap()
    }

    #[test]
    fn test_packaged_config_parses_in_order() {
        let pairs = required();
        assert!(!pairs.is_empty());
        assert_eq!(pairs[0].0, "spark.shuffle.reduceLocality.enabled");
        assert_eq!(pairs[0].1, "false");
        assert!(pairs.iter().all(|(k, _)| !k.starts_with('#')));
    }

    #[test]
    fn test_malformed_packaged_config() {
        let source = PackagedConfig::from_static("a 1\n\nbroken\n");
        let err = source.read_required_pairs().unwrap_err();
        assert_eq!(
            err,
            EngineError::ConfigSource {
                line: 3,
                content: "broken".into()
            }
        );
    }

    #[test]
    fn test_session_config_from_source() {
        let config = SessionConfig::from_source(&PackagedConfig::new()).unwrap();
        assert_eq!(config.entries(), required().as_slice());
        assert_eq!(config.get("spark.speculation"), Some("false"));
    }

    #[test]
    fn test_session_config_set_replaces_in_place() {
        let mut config = SessionConfig::default();
        config.set("a", "1");
        config.set("b", "2");
        config.set("a", "3");
        assert_eq!(config.len(), 2);
        assert_eq!(config.entries()[0], ("a".to_string(), "3".to_string()));
    }

    #[tokio::test]
    async fn test_verifier_accepts_matching_session() {
        let session = SubmissionProperties::from_pairs(required());
        let verifier = PropertiesVerifier::new(session);
        verifier.verify(&required()).await.unwrap();
    }

    #[tokio::test]
    async fn test_verifier_reports_mismatch() {
        let mut session = SubmissionProperties::from_pairs(required());
        session.set("spark.speculation", "true");
        let err = PropertiesVerifier::new(session)
            .verify(&required())
            .await
            .unwrap_err();
        match err {
            EngineError::ConfigMismatch { key, detail } => {
                assert_eq!(key, "spark.speculation");
                assert!(detail.contains("'true'"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_verifier_reports_missing_key() {
        let err = PropertiesVerifier::default()
            .verify(&required())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ConfigMismatch { ref detail, .. } if detail.contains("missing")));
    }
}
