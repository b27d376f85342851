//! Engine configuration.
//!
//! Settings are layered with figment, later layers winning:
//!
//! 1. built-in defaults,
//! 2. a TOML file (`config.toml` in the platform config directory, or an
//!    explicit path),
//! 3. `DEDUP_*` environment variables, e.g. `DEDUP_HASH_WORKERS=8`.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::duplicates::{
    PipelineConfig, ResolverConfig, DEFAULT_COMMIT_BATCH, DEFAULT_LARGE_FILE_THRESHOLD,
};
use crate::scanner::ScannerConfig;

/// Prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "DEDUP_";

/// Errors while loading or rendering configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// A layer could not be parsed or had the wrong shape.
    #[error("Invalid configuration: {0}")]
    Figment(#[from] Box<figment::Error>),

    /// The configuration could not be rendered as TOML.
    #[error("Failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self::Figment(Box::new(e))
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory listing workers. Unset: available concurrency - 1, minimum 2.
    pub scan_workers: Option<usize>,
    /// Small-file hashing workers. Unset: available concurrency - 1, minimum 1.
    pub hash_workers: Option<usize>,
    /// Large-file hashing workers. Unset: half the hash workers, 1 to 4.
    pub large_file_workers: Option<usize>,
    /// Files at or above this many bytes are hashed by the large-file pool.
    pub large_file_threshold: u64,
    /// Reuse stored fingerprints of unchanged files.
    pub skip_hashed: bool,
    /// Skip files and folders whose name starts with a dot.
    pub skip_hidden: bool,
    /// Ignore files smaller than this many bytes.
    pub min_size: Option<u64>,
    /// Gitignore-style patterns excluded from scans.
    pub ignore_patterns: Vec<String>,
    /// Hash results committed per transaction.
    pub commit_batch_size: usize,
    /// Interval between progress reports, in milliseconds.
    pub progress_interval_ms: u64,
    /// Threads for lazy hashing during duplicate resolution.
    pub resolver_io_threads: usize,
    /// Capacity of the event channel handed to UI consumers.
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scan_workers: None,
            hash_workers: None,
            large_file_workers: None,
            large_file_threshold: DEFAULT_LARGE_FILE_THRESHOLD,
            skip_hashed: false,
            skip_hidden: false,
            min_size: None,
            ignore_patterns: Vec::new(),
            commit_batch_size: DEFAULT_COMMIT_BATCH,
            progress_interval_ms: 100,
            resolver_io_threads: 4,
            event_buffer: 256,
        }
    }
}

impl EngineConfig {
    /// Default configuration file location.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "dedup").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Build the layered figment. `file` overrides the default file location.
    #[must_use]
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        match file.map(Path::to_path_buf).or_else(Self::default_path) {
            Some(path) => {
                log::debug!("Configuration file: {}", path.display());
                figment = figment.merge(Toml::file(path));
            }
            None => log::debug!("No configuration directory available"),
        }
        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    /// Load defaults, then the TOML file, then environment variables.
    ///
    /// A missing file is not an error.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        Ok(Self::figment(file).extract()?)
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Settings for the directory scanner.
    #[must_use]
    pub fn scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            workers: self.scan_workers,
            skip_hidden: self.skip_hidden,
            min_size: self.min_size,
            ignore_patterns: self.ignore_patterns.clone(),
            progress_interval_ms: self.progress_interval_ms,
        }
    }

    /// Settings for the hashing pipeline.
    #[must_use]
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            hash_workers: self.hash_workers,
            large_file_workers: self.large_file_workers,
            large_file_threshold: self.large_file_threshold,
            skip_hashed: self.skip_hashed,
            commit_batch_size: self.commit_batch_size.max(1),
            progress_interval_ms: self.progress_interval_ms.max(1),
        }
    }

    /// Settings for the duplicate resolver.
    #[must_use]
    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig::default().with_io_threads(self.resolver_io_threads)
    }
}
