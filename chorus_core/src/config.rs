//! Node configuration.
//!
//! A single JSON document configures both sides of the protocol; every field
//! has a default so partial files are accepted.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::registry::RoleRegistry;

/// Default topic tag scoping Chorus traffic on a shared transport.
pub const DEFAULT_TOPIC: &str = "chorus";

/// Top-level configuration shared by master and workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChorusConfig {
    /// Topic tag for all protocol packets
    pub topic: String,
    
    /// Attempts per peer during role assignment (default: 6)
    pub assign_attempts: u32,
    
    /// Per-attempt wait for a role_ack, in milliseconds (default: 5000)
    pub attempt_window_ms: u64,
    
    /// Timeout used by `dispatch_default`, in milliseconds (default: 5000)
    pub default_task_timeout_ms: u64,
    
    /// How often a worker awaiting its role re-checks for a local stop (default: 500)
    pub worker_poll_interval_ms: u64,
    
    /// Ordered role list
    pub roles: RoleRegistry,
}

impl Default for ChorusConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            assign_attempts: 6,
            attempt_window_ms: 5_000,
            default_task_timeout_ms: 5_000,
            worker_poll_interval_ms: 500,
            roles: RoleRegistry::default(),
        }
    }
}

impl ChorusConfig {
    /// Parses and validates a JSON configuration.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: ChorusConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }
    
    /// Reads, parses and validates a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }
    
    /// Checks value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topic.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "topic",
                reason: "must not be empty".to_string(),
            });
        }
        if self.assign_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "assign_attempts",
                reason: "at least one attempt is required".to_string(),
            });
        }
        if self.attempt_window_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "attempt_window_ms",
                reason: "must be positive".to_string(),
            });
        }
        if self.default_task_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "default_task_timeout_ms",
                reason: "must be positive".to_string(),
            });
        }
        if self.worker_poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "worker_poll_interval_ms",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
    
    /// Settings for the master side.
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            topic: self.topic.clone(),
            assign_attempts: self.assign_attempts,
            attempt_window: Duration::from_millis(self.attempt_window_ms),
            default_task_timeout: Duration::from_millis(self.default_task_timeout_ms),
        }
    }
    
    /// Settings for the worker side.
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            topic: self.topic.clone(),
            poll_interval: Duration::from_millis(self.worker_poll_interval_ms),
        }
    }
}

/// Master coordinator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub topic: String,
    pub assign_attempts: u32,
    pub attempt_window: Duration,
    pub default_task_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        ChorusConfig::default().coordinator_config()
    }
}

/// Worker runtime settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub topic: String,
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        ChorusConfig::default().worker_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.topic, "chorus");
        assert_eq!(config.assign_attempts, 6);
        assert_eq!(config.attempt_window, Duration::from_secs(5));
        
        let worker = WorkerConfig::default();
        assert_eq!(worker.poll_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_partial_json() {
        let config = ChorusConfig::from_json_str(
            r#"{"topic": "hive", "assign_attempts": 3, "roles": [{"name": "alpha", "modules": ["diagnostics"]}]}"#,
        )
        .unwrap();
        assert_eq!(config.topic, "hive");
        assert_eq!(config.assign_attempts, 3);
        assert_eq!(config.attempt_window_ms, 5_000);
        assert_eq!(config.roles.len(), 1);
    }

    #[test]
    fn test_invalid_values() {
        let err = ChorusConfig::from_json_str(r#"{"assign_attempts": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "assign_attempts", .. }));
        
        let err = ChorusConfig::from_json_str(r#"{"default_task_timeout_ms": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "default_task_timeout_ms", .. }));
        
        let err = ChorusConfig::from_json_str(r#"{"topic": ""}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "topic", .. }));
        
        assert!(matches!(
            ChorusConfig::from_json_str("{not json").unwrap_err(),
            ConfigError::Parse(_)
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = ChorusConfig::from_file("/nonexistent/chorus.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
