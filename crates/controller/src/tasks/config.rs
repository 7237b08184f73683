//! Controller Configuration
//!
//! Settings for committing `BuildRun` status, read from the mounted
//! `config.yaml`. Every field has a default so a partial file is valid.

use crate::tasks::status::commit::DEFAULT_FIELD_MANAGER;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{api::Api, Client};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main controller configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ControllerConfig {
    /// Status commit configuration
    #[serde(default)]
    pub status: StatusConfig,
}

/// How status changes are written back to the API server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitStrategy {
    /// JSON merge patch of the computed fields, guarded by resourceVersion
    #[default]
    Patch,
    /// Server-side apply of the computed fields, owned by our field manager
    Apply,
    /// Full replace of the status subresource
    Update,
}

/// Status commit configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusConfig {
    #[serde(default)]
    pub strategy: CommitStrategy,

    /// Total write attempts, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff before the first retry, doubled for every further retry
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Upper bound for a whole commit, retries included
    #[serde(default = "default_deadline_seconds")]
    pub deadline_seconds: u64,

    /// Field manager recorded by the API server for our writes
    #[serde(default = "default_field_manager")]
    pub field_manager: String,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    2000
}

fn default_deadline_seconds() -> u64 {
    30
}

fn default_field_manager() -> String {
    DEFAULT_FIELD_MANAGER.to_string()
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            strategy: CommitStrategy::default(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            deadline_seconds: default_deadline_seconds(),
            field_manager: default_field_manager(),
        }
    }
}

impl StatusConfig {
    #[must_use]
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    #[must_use]
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    #[must_use]
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_seconds)
    }
}

impl ControllerConfig {
    /// Validate that the configuration can drive a status commit
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        let status = &self.status;

        if status.max_attempts == 0 {
            return Err(anyhow::anyhow!("status.maxAttempts must be at least 1"));
        }

        if status.max_backoff_ms < status.initial_backoff_ms {
            return Err(anyhow::anyhow!(
                "status.maxBackoffMs ({}) must not be lower than status.initialBackoffMs ({})",
                status.max_backoff_ms,
                status.initial_backoff_ms
            ));
        }

        if status.deadline_seconds == 0 {
            return Err(anyhow::anyhow!("status.deadlineSeconds must be greater than 0"));
        }

        if status.field_manager.trim().is_empty() {
            return Err(anyhow::anyhow!("status.fieldManager must not be empty"));
        }

        Ok(())
    }

    /// Load configuration from mounted `ConfigMap` file
    pub fn from_mounted_file(config_path: &str) -> Result<Self, anyhow::Error> {
        let config_str = std::fs::read_to_string(config_path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {config_path}: {e}"))?;

        Self::from_yaml(&config_str)
    }

    /// Load configuration from a `ConfigMap` through the API server
    pub async fn from_configmap(
        client: &Client,
        namespace: &str,
        name: &str,
    ) -> Result<Self, anyhow::Error> {
        let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
        let cm = api.get(name).await?;

        let data = cm
            .data
            .ok_or_else(|| anyhow::anyhow!("ConfigMap has no data"))?;
        let config_str = data
            .get("config.yaml")
            .ok_or_else(|| anyhow::anyhow!("ConfigMap missing config.yaml"))?;

        Self::from_yaml(config_str)
    }

    fn from_yaml(config_str: &str) -> Result<Self, anyhow::Error> {
        serde_yaml::from_str(config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse config YAML: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = ControllerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.status.strategy, CommitStrategy::Patch);
        assert_eq!(config.status.max_attempts, 5);
        assert_eq!(config.status.deadline(), Duration::from_secs(30));
    }

    #[test]
    fn partial_yaml_fills_in_defaults() {
        let config = ControllerConfig::from_yaml(
            "status:\n  strategy: update\n  maxAttempts: 3\n",
        )
        .unwrap();

        assert_eq!(config.status.strategy, CommitStrategy::Update);
        assert_eq!(config.status.max_attempts, 3);
        assert_eq!(config.status.initial_backoff_ms, 100);
        assert_eq!(config.status.field_manager, "buildrun-controller");
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config = ControllerConfig::from_yaml("{}").unwrap();
        assert_eq!(config.status.max_backoff(), Duration::from_millis(2000));
    }

    #[test]
    fn apply_strategy_is_accepted() {
        let config = ControllerConfig::from_yaml("status:\n  strategy: apply\n").unwrap();
        assert_eq!(config.status.strategy, CommitStrategy::Apply);
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        let err = ControllerConfig::from_yaml("status:\n  strategy: replace\n").unwrap_err();
        assert!(err.to_string().contains("Failed to parse config YAML"));
    }

    #[test]
    fn validate_rejects_zero_attempts() {
        let mut config = ControllerConfig::default();
        config.status.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_inverted_backoff_bounds() {
        let mut config = ControllerConfig::default();
        config.status.initial_backoff_ms = 5000;
        config.status.max_backoff_ms = 100;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("maxBackoffMs"));
    }

    #[test]
    fn validate_rejects_blank_field_manager() {
        let mut config = ControllerConfig::default();
        config.status.field_manager = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_from_mounted_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "status:\n  deadlineSeconds: 10\n  fieldManager: build-sync").unwrap();

        let config = ControllerConfig::from_mounted_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.status.deadline(), Duration::from_secs(10));
        assert_eq!(config.status.field_manager, "build-sync");
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = ControllerConfig::from_mounted_file("/nonexistent/config.yaml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
