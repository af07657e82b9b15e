//! Configuration for simulation runs and partitioning metadata.
//!
//! # Configuration File Structure
//!
//! ```yaml
//! simulation:
//!   stop_on_first_failure: false
//!   max_delta_cycles: 1000
//!   power_on_reset_cycles: 2
//!   log_level: info
//!   max_time_ns: 50000
//!
//! partitions:
//!   cpu/alu:
//!     partition: true
//!   cpu:
//!     fetch:
//!       partition: false
//! ```
//!
//! Keys of the `partitions` tree are group names; a key may contain several
//! `/` separated segments. A `partition: <bool>` leaf marks the group reached
//! by the path leading to it.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::types::SimTime;

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown file format: {0}")]
    UnknownFormat(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Simulation run parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationParams {
    /// Stop the run at the first failed expectation
    #[serde(default)]
    pub stop_on_first_failure: bool,

    /// Settle rounds allowed within one instant before giving up
    #[serde(default = "default_max_delta_cycles")]
    pub max_delta_cycles: usize,

    /// Active edges every resettable clock holds its reset after power-on
    #[serde(default)]
    pub power_on_reset_cycles: u32,

    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Hard limit on simulated time in nanoseconds
    #[serde(default)]
    pub max_time_ns: Option<u64>,
}

fn default_max_delta_cycles() -> usize {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            stop_on_first_failure: false,
            max_delta_cycles: default_max_delta_cycles(),
            power_on_reset_cycles: 0,
            log_level: default_log_level(),
            max_time_ns: None,
        }
    }
}

impl SimulationParams {
    /// Hard time limit as exact simulation time.
    pub fn max_time(&self) -> Option<SimTime> {
        self.max_time_ns
            .map(|ns| SimTime::new(ns as i64, 1_000_000_000))
    }
}

/// Nested key-path tree with typed leaves.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigTree(serde_json::Value);

impl ConfigTree {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn is_empty(&self) -> bool {
        match &self.0 {
            serde_json::Value::Null => true,
            serde_json::Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }

    /// Looks up a leaf by `/` separated path.
    pub fn get(&self, path: &str) -> Option<&serde_json::Value> {
        let mut current = &self.0;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Every `partition` leaf with the group path leading to it.
    pub fn partition_entries(&self) -> Vec<(Vec<String>, bool)> {
        let mut entries = Vec::new();
        collect_partitions(&self.0, &mut Vec::new(), &mut entries);
        entries
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

fn collect_partitions(
    value: &serde_json::Value,
    path: &mut Vec<String>,
    entries: &mut Vec<(Vec<String>, bool)>,
) {
    let Some(map) = value.as_object() else {
        return;
    };
    for (key, child) in map {
        if key == "partition" {
            if let Some(flag) = child.as_bool() {
                entries.push((path.clone(), flag));
                continue;
            }
        }
        let depth = path.len();
        path.extend(
            key.split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        );
        collect_partitions(child, path, entries);
        path.truncate(depth);
    }
}

/// Complete simulation configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Run parameters
    #[serde(default)]
    pub simulation: SimulationParams,

    /// Partition flags for the node group hierarchy
    #[serde(default)]
    pub partitions: ConfigTree,
}

impl SimConfig {
    /// Creates a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        let config: SimConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Loads configuration from a JSON string.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: SimConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a file, auto-detecting format.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        match ext.to_lowercase().as_str() {
            "yaml" | "yml" => Self::from_yaml_file(path),
            "json" => Self::from_json_file(path),
            _ => Err(ConfigError::UnknownFormat(ext.to_string())),
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        let params = &self.simulation;
        if params.max_delta_cycles == 0 {
            return Err(ConfigError::Validation(
                "max_delta_cycles must be at least 1".to_string(),
            ));
        }
        if !LOG_LEVELS.contains(&params.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::Validation(format!(
                "Unknown log level: {}",
                params.log_level
            )));
        }
        if params.max_time_ns == Some(0) {
            return Err(ConfigError::Validation(
                "max_time_ns must be positive when set".to_string(),
            ));
        }
        if !self.partitions.is_empty() && !self.partitions.as_value().is_object() {
            return Err(ConfigError::Validation(
                "partitions must be a mapping".to_string(),
            ));
        }
        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn to_yaml_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Converts to YAML string.
    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Converts to JSON string.
    pub fn to_json(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Builder for creating SimConfig programmatically.
#[derive(Default)]
pub struct SimConfigBuilder {
    config: SimConfig,
}

impl SimConfigBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop_on_first_failure(mut self, stop: bool) -> Self {
        self.config.simulation.stop_on_first_failure = stop;
        self
    }

    pub fn max_delta_cycles(mut self, cycles: usize) -> Self {
        self.config.simulation.max_delta_cycles = cycles;
        self
    }

    pub fn power_on_reset_cycles(mut self, cycles: u32) -> Self {
        self.config.simulation.power_on_reset_cycles = cycles;
        self
    }

    /// Sets the log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.simulation.log_level = level.into();
        self
    }

    pub fn max_time_ns(mut self, ns: u64) -> Self {
        self.config.simulation.max_time_ns = Some(ns);
        self
    }

    /// Marks the group at `path` (`/` separated) as partition or not.
    pub fn partition(mut self, path: &str, partition: bool) -> Self {
        if !self.config.partitions.0.is_object() {
            self.config.partitions.0 = serde_json::Value::Object(Default::default());
        }
        let mut current = &mut self.config.partitions.0;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let serde_json::Value::Object(map) = current else {
                break;
            };
            current = map
                .entry(segment.to_string())
                .or_insert_with(|| serde_json::Value::Object(Default::default()));
        }
        if let serde_json::Value::Object(map) = current {
            map.insert("partition".to_string(), serde_json::Value::Bool(partition));
        }
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> ConfigResult<SimConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
