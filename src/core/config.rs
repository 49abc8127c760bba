use std::path::Path;
use serde::{Serialize, Deserialize};

use crate::core::errors::{JobMapError, Result};

/// What `submit` does when the intake queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Wait for the control loop to make room
    #[default]
    Block,
    /// Discard the submission and log a warning
    Drop,
}

/// Coordinator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Name attached to the coordinator's tracing span
    pub name: String,
    /// Capacity of the submission queue
    pub intake_capacity: usize,
    /// Capacity of the completion queue
    pub completion_capacity: usize,
    /// Capacity of the lifecycle event broadcast; oldest events are
    /// overwritten when subscribers fall behind
    pub event_capacity: usize,
    /// Behaviour of `submit` on a full intake queue
    pub overflow_policy: OverflowPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            name: "jobmap".to_string(),
            intake_capacity: 64,
            completion_capacity: 64,
            event_capacity: 256,
            overflow_policy: OverflowPolicy::Block,
        }
    }
}

impl CoordinatorConfig {
    /// Create a new builder for CoordinatorConfig
    pub fn builder() -> CoordinatorConfigBuilder {
        CoordinatorConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(JobMapError::configuration_field("name must not be empty", "name"));
        }
        if self.intake_capacity == 0 {
            return Err(JobMapError::configuration_field(
                "intake_capacity must be greater than 0",
                "intake_capacity",
            ));
        }
        if self.completion_capacity == 0 {
            return Err(JobMapError::configuration_field(
                "completion_capacity must be greater than 0",
                "completion_capacity",
            ));
        }
        if self.event_capacity == 0 {
            return Err(JobMapError::configuration_field(
                "event_capacity must be greater than 0",
                "event_capacity",
            ));
        }
        Ok(())
    }

    /// Configuration for callers that submit in large bursts and would
    /// rather lose a submission than wait
    pub fn bursty() -> Self {
        Self {
            intake_capacity: 4096,
            completion_capacity: 1024,
            overflow_policy: OverflowPolicy::Drop,
            ..Default::default()
        }
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a JSON document
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file; `.json` is parsed as JSON, anything else
    /// as YAML
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| JobMapError::io(format!("read {}", path.display()), e))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&contents),
            _ => Self::from_yaml_str(&contents),
        }
    }
}

/// Builder for CoordinatorConfig
pub struct CoordinatorConfigBuilder {
    config: CoordinatorConfig,
}

impl CoordinatorConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: CoordinatorConfig::default(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set submission queue capacity
    pub fn intake_capacity(mut self, capacity: usize) -> Self {
        self.config.intake_capacity = capacity;
        self
    }

    /// Set completion queue capacity
    pub fn completion_capacity(mut self, capacity: usize) -> Self {
        self.config.completion_capacity = capacity;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.config.overflow_policy = policy;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<CoordinatorConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for CoordinatorConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = CoordinatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.intake_capacity, 64);
        assert_eq!(config.completion_capacity, 64);
        assert_eq!(config.overflow_policy, OverflowPolicy::Block);
    }

    #[test]
    fn test_bursty_config() {
        let config = CoordinatorConfig::bursty();
        assert!(config.validate().is_ok());
        assert_eq!(config.overflow_policy, OverflowPolicy::Drop);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = CoordinatorConfig::default();

        config.intake_capacity = 0;
        assert!(config.validate().is_err());
        config.intake_capacity = 8;

        config.completion_capacity = 0;
        assert!(config.validate().is_err());
        config.completion_capacity = 8;

        config.event_capacity = 0;
        assert!(config.validate().is_err());
        config.event_capacity = 8;

        config.name = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder() {
        let config = CoordinatorConfig::builder()
            .name("renderer")
            .intake_capacity(128)
            .completion_capacity(32)
            .overflow_policy(OverflowPolicy::Drop)
            .build()
            .unwrap();

        assert_eq!(config.name, "renderer");
        assert_eq!(config.intake_capacity, 128);
        assert_eq!(config.completion_capacity, 32);
        assert_eq!(config.event_capacity, 256);
        assert_eq!(config.overflow_policy, OverflowPolicy::Drop);

        assert!(CoordinatorConfig::builder().intake_capacity(0).build().is_err());
    }

    #[test]
    fn test_yaml_fills_defaults() {
        let config = CoordinatorConfig::from_yaml_str(
            "name: thumbnails\nintake_capacity: 16\noverflow_policy: drop\n",
        )
        .unwrap();

        assert_eq!(
            config,
            CoordinatorConfig {
                name: "thumbnails".to_string(),
                intake_capacity: 16,
                overflow_policy: OverflowPolicy::Drop,
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_json_rejects_invalid() {
        let err = CoordinatorConfig::from_json_str(r#"{"completion_capacity": 0}"#).unwrap_err();
        assert_eq!(err.category(), "configuration");

        let err = CoordinatorConfig::from_json_str("not json").unwrap_err();
        assert_eq!(err.category(), "serialization");
    }

    #[test]
    fn test_from_file_by_extension() {
        let dir = std::env::temp_dir();
        let stem = format!("jobmap-config-{}", std::process::id());

        let json_path = dir.join(format!("{stem}.json"));
        std::fs::write(&json_path, r#"{"intake_capacity": 5}"#).unwrap();
        assert_eq!(CoordinatorConfig::from_file(&json_path).unwrap().intake_capacity, 5);

        let yaml_path = dir.join(format!("{stem}.yaml"));
        std::fs::write(&yaml_path, "intake_capacity: 7\n").unwrap();
        assert_eq!(CoordinatorConfig::from_file(&yaml_path).unwrap().intake_capacity, 7);

        let _ = std::fs::remove_file(json_path);
        let _ = std::fs::remove_file(yaml_path);

        let missing = CoordinatorConfig::from_file(dir.join(format!("{stem}.missing")));
        assert_eq!(missing.unwrap_err().category(), "io");
    }
}
