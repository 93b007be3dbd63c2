//! Service configuration.
//!
//! Plain JSON, deserialized with serde and then validated in one pass that
//! collects every problem before failing, so operators see the full list.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::convert::ConvertPoolConfig;
use crate::error::ConfigError;
use crate::resolve::{ConventionPrefix, FixedPrefix, PrefixResolver};

fn default_retry_delay_ms() -> u64 {
    1_000
}

fn default_lock_timeout_ms() -> u64 {
    5_000
}

fn default_worker_count() -> usize {
    num_cpus::get().max(1)
}

fn default_queue_depth() -> usize {
    default_worker_count() * 2
}

fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir()
}

fn default_extension() -> String {
    "jp2".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Mount point under which manifest file names are resolved.
    pub source_root: PathBuf,
    /// How file names map to directory prefixes under the source root.
    pub prefix: PrefixPolicy,
    /// Base under which per-item access URLs are published.
    pub access_url_base: String,
    pub converter: ConverterSettings,
    #[serde(default)]
    pub pool: PoolSettings,
    /// Pause before resending to a busy destination.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Bound on job-status-lock acquisition.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

/// Explicitly configured prefix policy; the resolver is constructed from
/// this and injected, never looked up by name at runtime.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum PrefixPolicy {
    Fixed { prefix: String },
    Convention,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverterSettings {
    pub binary: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSettings {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
    #[serde(default = "default_extension")]
    pub artifact_extension: String,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            queue_depth: default_queue_depth(),
            scratch_dir: default_scratch_dir(),
            artifact_extension: default_extension(),
        }
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut problems: Vec<String> = Vec::new();

    if config.source_root.as_os_str().is_empty() {
        problems.push("sourceRoot is required".to_string());
    }
    if config.access_url_base.trim().is_empty() {
        problems.push("accessUrlBase is required".to_string());
    } else if config.access_url_base.ends_with('/') {
        problems.push("accessUrlBase must not end with '/'".to_string());
    }
    if config.converter.binary.as_os_str().is_empty() {
        problems.push("converter.binary is required".to_string());
    }
    if config.pool.worker_count == 0 {
        problems.push("pool.workerCount must be greater than 0".to_string());
    }
    if config.pool.queue_depth == 0 {
        problems.push("pool.queueDepth must be greater than 0".to_string());
    }
    if config.pool.artifact_extension.trim().is_empty() {
        problems.push("pool.artifactExtension is required".to_string());
    }
    if config.retry_delay_ms == 0 {
        problems.push("retryDelayMs must be greater than 0".to_string());
    }
    if config.lock_timeout_ms == 0 {
        problems.push("lockTimeoutMs must be greater than 0".to_string());
    }
    if let PrefixPolicy::Fixed { prefix } = &config.prefix {
        if prefix.contains("..") {
            problems.push("prefix.prefix must not contain '..'".to_string());
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Validation { problems })
    }
}

impl Config {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn build_resolver(&self) -> Arc<dyn PrefixResolver> {
        match &self.prefix {
            PrefixPolicy::Fixed { prefix } => Arc::new(FixedPrefix::new(prefix.clone())),
            PrefixPolicy::Convention => Arc::new(ConventionPrefix::new()),
        }
    }

    pub fn pool_config(&self) -> ConvertPoolConfig {
        ConvertPoolConfig {
            worker_count: self.pool.worker_count,
            queue_depth: self.pool.queue_depth,
            scratch_dir: self.pool.scratch_dir.clone(),
            artifact_extension: self.pool.artifact_extension.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "sourceRoot": "/mnt/masters",
        "prefix": { "mode": "fixed", "prefix": "scans" },
        "accessUrlBase": "https://iiif.example/iiif",
        "converter": { "binary": "/usr/bin/encode_jp2" }
    }"#;

    #[test]
    fn test_minimal_config_with_defaults() {
        let config = load_config_from_str(MINIMAL).unwrap();

        assert_eq!(config.source_root, PathBuf::from("/mnt/masters"));
        assert_eq!(config.retry_delay(), Duration::from_millis(1_000));
        assert_eq!(config.lock_timeout(), Duration::from_millis(5_000));
        assert!(config.pool.worker_count >= 1);
        assert_eq!(config.pool.artifact_extension, "jp2");
        assert!(config.converter.args.is_empty());
    }

    #[test]
    fn test_convention_prefix_policy() {
        let json = r#"{
            "sourceRoot": "/mnt/masters",
            "prefix": { "mode": "convention" },
            "accessUrlBase": "https://iiif.example/iiif",
            "converter": { "binary": "encode", "args": ["-rate", "2.4"] }
        }"#;
        let config = load_config_from_str(json).unwrap();

        assert!(matches!(config.prefix, PrefixPolicy::Convention));
        assert_eq!(config.converter.args, vec!["-rate", "2.4"]);

        let resolver = config.build_resolver();
        assert_eq!(
            resolver.resolve_prefix("coll_0042_p1.tif"),
            Some("coll/0042".to_string())
        );
    }

    #[test]
    fn test_validation_collects_every_problem() {
        let json = r#"{
            "sourceRoot": "",
            "prefix": { "mode": "fixed", "prefix": "ok" },
            "accessUrlBase": "",
            "converter": { "binary": "" },
            "retryDelayMs": 0,
            "pool": { "workerCount": 0 }
        }"#;
        let err = load_config_from_str(json).unwrap_err();

        match err {
            ConfigError::Validation { problems } => {
                assert!(problems.iter().any(|p| p.contains("sourceRoot")));
                assert!(problems.iter().any(|p| p.contains("accessUrlBase")));
                assert!(problems.iter().any(|p| p.contains("converter.binary")));
                assert!(problems.iter().any(|p| p.contains("workerCount")));
                assert!(problems.iter().any(|p| p.contains("retryDelayMs")));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_trailing_slash_in_access_base_rejected() {
        let json = MINIMAL.replace(
            "https://iiif.example/iiif",
            "https://iiif.example/iiif/",
        );
        let err = load_config_from_str(&json).unwrap_err();
        assert!(err.to_string().contains("accessUrlBase"));
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        let err = load_config_from_str("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::ParseJson(_)));
    }
}
