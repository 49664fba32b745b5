//! Engine configuration

use autoscript_core::VarName;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Name of the builtin service every engine registers
pub const RELOAD_SERVICE: &str = "reload";

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML: {source}")]
    ParseYaml {
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Domain for exposed services and the builtin reload service
    pub domain: String,

    /// Service names script functions may not claim
    pub reserved_services: Vec<String>,

    /// Upper bound on how long the engine sleeps between time checks
    pub tick_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            domain: "autoscript".to_string(),
            reserved_services: vec![RELOAD_SERVICE.to_string()],
            tick_interval_ms: 1000,
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_str(yaml: &str) -> ConfigResult<Self> {
        let config: EngineConfig =
            serde_yaml::from_str(yaml).map_err(|source| ConfigError::ParseYaml { source })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&contents)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if VarName::new(self.domain.as_str(), "check").is_err() {
            return Err(ConfigError::InvalidValue {
                key: "domain".to_string(),
                reason: format!("'{}' is not a valid domain", self.domain),
            });
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "tick_interval_ms".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// The builtin reload service is always reserved
    pub fn is_reserved(&self, service: &str) -> bool {
        service == RELOAD_SERVICE || self.reserved_services.iter().any(|s| s == service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.domain, "autoscript");
        assert!(config.is_reserved("reload"));
        assert!(!config.is_reserved("func1"));
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = EngineConfig::from_yaml_str("domain: pyscript\nreserved_services: [reload, stop]\n")
            .unwrap();
        assert_eq!(config.domain, "pyscript");
        assert!(config.is_reserved("stop"));
        assert_eq!(config.tick_interval_ms, 1000);
    }

    #[test]
    fn test_reload_stays_reserved() {
        let config = EngineConfig::from_yaml_str("reserved_services: []").unwrap();
        assert!(config.is_reserved("reload"));
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            EngineConfig::from_yaml_str("domain: Bad-Domain"),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "domain"
        ));
        assert!(matches!(
            EngineConfig::from_yaml_str("tick_interval_ms: 0"),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "tick_interval_ms"
        ));
        assert!(matches!(
            EngineConfig::from_yaml_str("domain: [1, 2"),
            Err(ConfigError::ParseYaml { .. })
        ));
    }
}
