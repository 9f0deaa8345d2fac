//! Configuration for the student import job.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for the import job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Input configuration
    #[serde(default)]
    pub input: InputConfig,

    /// Output configuration
    #[serde(default)]
    pub output: OutputConfig,

    /// Processing configuration
    #[serde(default)]
    pub processing: ProcessingConfig,
}

/// Input file configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Path to the CSV file
    #[serde(default = "default_input_path")]
    pub path: PathBuf,

    /// Field delimiter (single ASCII character)
    #[serde(default = "default_delimiter")]
    pub delimiter: char,

    /// Leading lines to skip (the header)
    #[serde(default = "default_skip_lines")]
    pub skip_lines: usize,

    /// Abort on lines that do not have exactly four fields.
    /// When false, short lines are padded and long lines truncated.
    #[serde(default)]
    pub strict: bool,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            path: default_input_path(),
            delimiter: default_delimiter(),
            skip_lines: default_skip_lines(),
            strict: false,
        }
    }
}

/// Relational store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Database URL understood by sea-orm
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Connection pool size (driver default when unset)
    #[serde(default)]
    pub max_connections: Option<u32>,

    /// Create the `student` table if it does not exist
    #[serde(default = "default_true")]
    pub create_schema: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            max_connections: None,
            create_schema: true,
        }
    }
}

/// Processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Records per chunk (one transaction each)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Maximum chunk writes in flight
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Number of Tokio worker threads
    #[serde(default)]
    pub worker_threads: Option<usize>,

    /// Enable metrics reporting
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Metrics reporting interval in seconds
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,

    /// Optional path to save metrics JSON after run completes
    #[serde(default)]
    pub metrics_output_path: Option<String>,

    /// Retry configuration for chunk writes
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            concurrency: 10,
            worker_threads: None,
            enable_metrics: true,
            metrics_interval_secs: 10,
            metrics_output_path: None,
            retry: RetryConfig::default(),
        }
    }
}

/// Retry configuration for transient sink failures.
///
/// `max_retries: 0` fails a chunk on its first error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum retries after the first attempt
    #[serde(default)]
    pub max_retries: usize,

    /// Initial backoff in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_backoff_ms: 100,
            max_backoff_ms: 10000,
        }
    }
}

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "json" => serde_json::from_str(&contents)?,
            // YAML is a superset of JSON
            _ => serde_yaml::from_str(&contents)?,
        };
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Load configuration from a JSON string.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        Ok(config)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.input.path.as_os_str().is_empty() {
            anyhow::bail!("Input path must not be empty");
        }
        if !self.input.delimiter.is_ascii() {
            anyhow::bail!("Delimiter must be a single ASCII character");
        }
        if self.output.database_url.trim().is_empty() {
            anyhow::bail!("Database URL must not be empty");
        }
        if self.output.max_connections == Some(0) {
            anyhow::bail!("max_connections must be > 0");
        }
        if self.processing.chunk_size == 0 {
            anyhow::bail!("Chunk size must be > 0");
        }
        if self.processing.concurrency == 0 {
            anyhow::bail!("Concurrency must be > 0");
        }
        let retry = &self.processing.retry;
        if retry.initial_backoff_ms > retry.max_backoff_ms {
            anyhow::bail!("initial_backoff_ms must not exceed max_backoff_ms");
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_input_path() -> PathBuf { PathBuf::from("students.csv") }
fn default_delimiter() -> char { ',' }
fn default_skip_lines() -> usize { 1 }
fn default_database_url() -> String { "sqlite://students.db?mode=rwc".to_string() }
fn default_chunk_size() -> usize { 1000 }
fn default_concurrency() -> usize { 10 }
fn default_true() -> bool { true }
fn default_metrics_interval() -> u64 { 10 }
fn default_initial_backoff_ms() -> u64 { 100 }
fn default_max_backoff_ms() -> u64 { 10000 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.input.delimiter, ',');
        assert_eq!(config.input.skip_lines, 1);
        assert!(!config.input.strict);
        assert_eq!(config.processing.chunk_size, 1000);
        assert_eq!(config.processing.concurrency, 10);
        assert_eq!(config.processing.retry.max_retries, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config = Config::from_yaml(
            r#"
input:
  path: "data/students.csv"
processing:
  chunk_size: 250
"#,
        )
        .unwrap();

        assert_eq!(config.input.path, PathBuf::from("data/students.csv"));
        assert_eq!(config.input.skip_lines, 1);
        assert_eq!(config.processing.chunk_size, 250);
        assert_eq!(config.processing.concurrency, 10);
        assert!(config.output.create_schema);
    }

    #[test]
    fn test_json_config() {
        let config = Config::from_json(
            r#"{"output": {"database_url": "sqlite::memory:", "max_connections": 1}}"#,
        )
        .unwrap();
        assert_eq!(config.output.database_url, "sqlite::memory:");
        assert_eq!(config.output.max_connections, Some(1));
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = Config::default();
        let yaml = config.to_yaml().unwrap();
        let parsed = Config::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.processing.chunk_size, config.processing.chunk_size);
        assert_eq!(parsed.output.database_url, config.output.database_url);
    }

    #[test]
    fn test_config_validation_invalid() {
        let mut config = Config::default();
        config.processing.chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.processing.concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.input.delimiter = '§';
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.output.database_url = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.processing.retry.initial_backoff_ms = 20_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_headerless_input_is_valid() {
        let mut config = Config::default();
        config.input.skip_lines = 0;
        assert!(config.validate().is_ok());
    }
}
