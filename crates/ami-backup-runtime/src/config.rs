//! Runtime configuration.
//!
//! Loaded from an optional YAML file; every field has a default, so an
//! empty file (or none at all) is valid. Durations are written the way a
//! person would (`15s`, `8h`, `1h 30m`) or as bare seconds.
//!
//! ```yaml
//! poll_interval: 15s
//! timeout: 8h
//! creator: nightly-backups
//! tag_retry:
//!   attempts: 3
//! overshoot: strict
//! extra_tags:
//!   Team: platform
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use ami_backup_core::naming::DEFAULT_NAME_PREFIX;
use ami_backup_core::{TagSet, DEFAULT_CREATOR, DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT};

use crate::convergence::OvershootPolicy;
use crate::resilience::RetryPolicy;

/// Default instance-metadata endpoint.
pub const DEFAULT_METADATA_ENDPOINT: &str = "http://169.254.169.254";

/// Errors loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Serde adapter for human-readable durations.
pub(crate) mod duration_human {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(text) => {
                humantime::parse_duration(text.trim()).map_err(serde::de::Error::custom)
            }
        }
    }
}

/// Instance-metadata endpoint settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetadataConfig {
    pub endpoint: String,

    #[serde(with = "duration_human")]
    pub timeout: Duration,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_METADATA_ENDPOINT.to_string(),
            timeout: Duration::from_secs(2),
        }
    }
}

/// Configuration for a backup run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Wait between polls of asynchronous provider state
    #[serde(with = "duration_human")]
    pub poll_interval: Duration,

    /// Ceiling for each bounded wait, unless the request overrides it
    #[serde(with = "duration_human")]
    pub timeout: Duration,

    /// Value of the `Creator` tag
    pub creator: String,

    /// Prefix of generated image names
    pub name_prefix: String,

    /// Retry applied to tagging calls
    pub tag_retry: RetryPolicy,

    /// What to do when more snapshots appear than volumes exist
    pub overshoot: OvershootPolicy,

    pub metadata: MetadataConfig,

    /// Static tags added to every created resource
    pub extra_tags: BTreeMap<String, String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            creator: DEFAULT_CREATOR.to_string(),
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
            tag_retry: RetryPolicy::default(),
            overshoot: OvershootPolicy::default(),
            metadata: MetadataConfig::default(),
            extra_tags: BTreeMap::new(),
        }
    }
}

impl RuntimeConfig {
    /// Parse from YAML and validate.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = if yaml.trim().is_empty() {
            RuntimeConfig::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validated()
    }

    /// Load from a YAML file and validate.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Replace zero durations with defaults and check the rest.
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        if self.poll_interval.is_zero() {
            self.poll_interval = DEFAULT_POLL_INTERVAL;
        }
        if self.timeout.is_zero() {
            self.timeout = DEFAULT_TIMEOUT;
        }
        if self.creator.trim().is_empty() {
            return Err(ConfigError::Invalid("creator must not be empty".to_string()));
        }
        if !self.metadata.endpoint.starts_with("http://")
            && !self.metadata.endpoint.starts_with("https://")
        {
            return Err(ConfigError::Invalid(
                "metadata.endpoint must start with http:// or https://".to_string(),
            ));
        }
        TagSet::default()
            .with_extra(&self.extra_tags)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(self)
    }
}
