//! Pipeline configuration, loaded via a fallback chain:
//! explicit `--config` path, then `.pmrunner.yml`, then
//! `~/.config/pmrunner/pmrunner.yml`, then built-in defaults.

use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use taskstore::LimitConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub executor: ExecutorConfig,
    pub concurrency: ConcurrencyConfig,
    pub retry: RetryConfig,
    pub limits: LimitConfig,
    pub storage: StorageConfig,
    pub chunking: ChunkingConfig,
}

impl Config {
    /// Load configuration with fallback chain.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("failed to load config from {}", path.display()));
        }

        let local = PathBuf::from(".pmrunner.yml");
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => return Ok(config),
                Err(e) => tracing::warn!("failed to load config from {}: {}", local.display(), e),
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("pmrunner").join("pmrunner.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => tracing::warn!("failed to load config from {}: {}", user_config.display(), e),
                }
            }
        }

        tracing::info!("no config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("failed to parse config file")?;
        tracing::info!("loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Executor (§6.2) invocation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Binary invoked for each Executor call.
    pub binary: String,
    pub timeout_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            binary: "claude".to_string(),
            timeout_ms: 300_000,
        }
    }
}

/// Executor/subagent ceilings (mirrored in `taskstore::LimitConfig`, kept
/// here too so the pipeline can size its own semaphores without reaching
/// into taskstore internals).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub max_executors: usize,
    pub max_subagents: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_executors: 4,
            max_subagents: 9,
        }
    }
}

/// RetryManager backoff parameters (§4.8 defaults).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub jitter_fraction: f64,
    pub rate_limit_initial_delay_ms: u64,
    pub timeout_max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
            jitter_fraction: 0.10,
            rate_limit_initial_delay_ms: 5_000,
            timeout_max_delay_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub state_dir: String,
    pub namespace: Option<String>,
    pub max_iterations: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: ".pmrunner".to_string(),
            namespace: None,
            max_iterations: 5,
        }
    }
}

/// `TaskChunker` fan-out parameters (§4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_parallel: usize,
    /// Stop running further subtasks in a sequential (dependency-ordered)
    /// run as soon as one fails, instead of continuing past it.
    pub fail_fast: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            fail_fast: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.executor.binary, "claude");
        assert_eq!(config.concurrency.max_executors, 4);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.storage.max_iterations, 5);
        assert_eq!(config.chunking.max_parallel, 4);
        assert!(!config.chunking.fail_fast);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "executor:\n  binary: my-agent\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.executor.binary, "my-agent");
        assert_eq!(config.retry.initial_delay_ms, 1_000);
    }
}
