use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::delivery::BatchPolicy;

/// Lower bound on `checkpoint_interval`. Progress callbacks never fire more
/// often than once per this many items.
pub const MIN_CHECKPOINT_INTERVAL: usize = 50;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub root_paths: Vec<String>,
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
    #[serde(default)]
    pub detector: DetectorConfig,
}

/// Tunables for a detection run. Every field has a default so a config file
/// only needs to name what it overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Largest block compared pairwise before it is split into size buckets.
    pub max_block_size: usize,
    /// Capacity of the catch-all block for files with degenerate titles.
    pub catch_all_cap: usize,
    /// How far apart two range starts may be and still count as containment.
    pub containment_start_tolerance: u32,
    /// Edges scoring below this are discarded before grouping.
    pub min_edge_confidence: f64,
    /// Items processed between progress reports and cancellation checks.
    /// At least `MIN_CHECKPOINT_INTERVAL`.
    pub checkpoint_interval: usize,
    /// Upper bound on rows per store commit.
    pub commit_batch_size: usize,
    pub store_lock_timeout_ms: u64,
    pub max_append_chunk: usize,
    pub max_update_chunk: usize,
    pub max_group_chunk: usize,
    pub flush_interval_ms: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            max_block_size: 500,
            catch_all_cap: 200,
            containment_start_tolerance: 1,
            min_edge_confidence: 0.5,
            checkpoint_interval: 64,
            commit_batch_size: 1000,
            store_lock_timeout_ms: 2000,
            max_append_chunk: 1000,
            max_update_chunk: 500,
            max_group_chunk: 500,
            flush_interval_ms: 16,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("max_block_size", self.max_block_size),
            ("catch_all_cap", self.catch_all_cap),
            ("checkpoint_interval", self.checkpoint_interval),
            ("commit_batch_size", self.commit_batch_size),
            ("max_append_chunk", self.max_append_chunk),
            ("max_update_chunk", self.max_update_chunk),
            ("max_group_chunk", self.max_group_chunk),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::Message(format!("{} must be greater than 0", name)));
            }
        }
        if self.max_block_size < 2 {
            return Err(ConfigError::Message(
                "max_block_size must allow at least one pair".to_string(),
            ));
        }
        if self.checkpoint_interval < MIN_CHECKPOINT_INTERVAL {
            return Err(ConfigError::Message(format!(
                "checkpoint_interval must be at least {}, got {}",
                MIN_CHECKPOINT_INTERVAL, self.checkpoint_interval
            )));
        }
        if !(0.0..=1.0).contains(&self.min_edge_confidence) {
            return Err(ConfigError::Message(format!(
                "min_edge_confidence must be within [0, 1], got {}",
                self.min_edge_confidence
            )));
        }
        if self.flush_interval_ms == 0 {
            return Err(ConfigError::Message(
                "flush_interval_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// The checkpoint interval actually used, for configs that skipped
    /// `validate`.
    pub fn checkpoint_every(&self) -> usize {
        self.checkpoint_interval.max(MIN_CHECKPOINT_INTERVAL)
    }

    pub fn store_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.store_lock_timeout_ms)
    }

    pub fn batch_policy(&self) -> BatchPolicy {
        BatchPolicy {
            max_append_chunk: self.max_append_chunk,
            max_update_chunk: self.max_update_chunk,
            max_group_chunk: self.max_group_chunk,
            flush_interval: Duration::from_millis(self.flush_interval_ms),
        }
    }
}

/// Load `Config.{toml,json,yaml,...}` from the working directory (optional)
/// with `DUPE_SIEVE__*` environment overrides.
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    build(ConfigFile::with_name("Config").required(false))
}

pub fn load_configuration_from(path: &Path) -> Result<AppConfig, ConfigError> {
    build(ConfigFile::from(path).required(true))
}

fn build<S>(file: S) -> Result<AppConfig, ConfigError>
where
    S: config::Source + Send + Sync + 'static,
{
    let app_config = Config::builder()
        .add_source(file)
        .add_source(
            Environment::with_prefix("DUPE_SIEVE")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize::<AppConfig>()?;
    app_config.detector.validate()?;
    Ok(app_config)
}
