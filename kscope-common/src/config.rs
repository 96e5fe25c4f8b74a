//! Configuration loading and root folder resolution
//!
//! Resolution order for every setting:
//! 1. Command-line argument (applied by the binary)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the root folder
pub const ROOT_FOLDER_ENV: &str = "KSCOPE_ROOT_FOLDER";

/// Database file name inside the root folder
pub const DATABASE_FILE_NAME: &str = "kaleidoscope.db";

/// Streams whose publish failures must reach the caller
pub const DEFAULT_CRITICAL_STREAMS: [&str; 3] =
    ["media-ai-insights", "face-detection", "face-recognition"];

/// How duplicate post-aggregation triggers are handled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AggregationDedup {
    /// Publish every time the completion check passes
    #[default]
    Off,
    /// Record an idempotency key per post and publish at most once
    IdempotencyKey,
}

impl std::str::FromStr for AggregationDedup {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(Self::Off),
            "idempotency-key" | "idempotency_key" => Ok(Self::IdempotencyKey),
            other => Err(Error::Config(format!(
                "unknown aggregation_dedup mode '{}' (expected 'off' or 'idempotency-key')",
                other
            ))),
        }
    }
}

/// Ingestion service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Root folder holding the database (default: OS data dir)
    pub root_folder: Option<PathBuf>,
    /// Explicit database file, overrides `<root_folder>/kaleidoscope.db`
    pub database_path: Option<PathBuf>,
    /// Consumer group shared by all service instances
    pub consumer_group: String,
    /// Consumer name prefix for this instance (generated when absent)
    pub consumer_name: Option<String>,
    /// Messages read per poll
    pub batch_size: usize,
    /// Delay between polls when a stream is idle
    pub poll_interval_ms: u64,
    /// Idle time after which a pending message is redelivered
    pub redelivery_timeout_ms: u64,
    /// Interval between pending-set depth reports
    pub pending_report_interval_ms: u64,
    /// Streams whose publish failures propagate to the caller
    pub critical_streams: Vec<String>,
    /// Default attempt count for retried publishes
    pub publish_max_attempts: u32,
    /// Duplicate aggregation trigger handling
    pub aggregation_dedup: AggregationDedup,
    /// Also trigger index-sync for freshly detected faces
    pub index_faces_on_detection: bool,
    /// Base URL of the search index HTTP API
    pub search_index_url: Option<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            database_path: None,
            consumer_group: "backend-group".to_string(),
            consumer_name: None,
            batch_size: 10,
            poll_interval_ms: 1000,
            redelivery_timeout_ms: 30_000,
            pending_report_interval_ms: 60_000,
            critical_streams: DEFAULT_CRITICAL_STREAMS.iter().map(|s| s.to_string()).collect(),
            publish_max_attempts: 3,
            aggregation_dedup: AggregationDedup::Off,
            index_faces_on_detection: false,
            search_index_url: None,
        }
    }
}

impl IngestConfig {
    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))
    }

    /// Load configuration from `explicit_path`, or the platform config file
    ///
    /// An explicit path that cannot be read is an error. A missing platform
    /// file is not: the service starts on defaults with a warning.
    /// Environment overrides are applied on top.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut config = match explicit_path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("Cannot read config file {}: {}", path.display(), e))
                })?;
                info!("Loaded configuration from {}", path.display());
                Self::from_toml_str(&content)?
            }
            None => match default_config_file() {
                Some(path) => {
                    let content = std::fs::read_to_string(&path)?;
                    info!("Loaded configuration from {}", path.display());
                    Self::from_toml_str(&content)?
                }
                None => {
                    warn!("No config file found, using compiled defaults");
                    Self::default()
                }
            },
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `KSCOPE_*` environment variables
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            self.root_folder = Some(PathBuf::from(path));
        }
        if let Ok(path) = std::env::var("KSCOPE_DATABASE_PATH") {
            self.database_path = Some(PathBuf::from(path));
        }
        if let Ok(group) = std::env::var("KSCOPE_CONSUMER_GROUP") {
            self.consumer_group = group;
        }
        if let Ok(url) = std::env::var("KSCOPE_SEARCH_INDEX_URL") {
            self.search_index_url = Some(url);
        }
        if let Ok(mode) = std::env::var("KSCOPE_AGGREGATION_DEDUP") {
            self.aggregation_dedup = mode.parse()?;
        }
        Ok(())
    }

    /// Reject values the workers cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.consumer_group.trim().is_empty() {
            return Err(Error::Config("consumer_group must not be empty".to_string()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".to_string()));
        }
        if self.publish_max_attempts == 0 {
            return Err(Error::Config("publish_max_attempts must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Resolved database file location
    pub fn database_path(&self) -> PathBuf {
        match &self.database_path {
            Some(path) => path.clone(),
            None => self
                .root_folder
                .clone()
                .unwrap_or_else(default_root_folder)
                .join(DATABASE_FILE_NAME),
        }
    }

    /// Consumer name for this instance
    ///
    /// Uses a short random suffix when not configured so that restarted
    /// instances do not collide in the consumer group.
    pub fn consumer_name(&self) -> String {
        match &self.consumer_name {
            Some(name) => name.clone(),
            None => {
                let id = uuid::Uuid::new_v4().simple().to_string();
                format!("kscope-ai-{}", &id[..8])
            }
        }
    }

    /// Whether publish failures on `stream` must propagate
    pub fn is_critical(&self, stream: &str) -> bool {
        self.critical_streams.iter().any(|s| s == stream)
    }
}

/// Root folder resolution: CLI argument, environment, TOML value, OS default
pub fn resolve_root_folder(cli_arg: Option<&str>, toml_value: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }
    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
        return PathBuf::from(path);
    }
    if let Some(path) = toml_value {
        return path.to_path_buf();
    }
    default_root_folder()
}

/// Platform config file, if one exists
fn default_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("kaleidoscope").join("ingest.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/kaleidoscope/ingest.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }
    None
}

/// OS-dependent default root folder
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("kaleidoscope"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/kaleidoscope"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("kaleidoscope"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/kaleidoscope"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("kaleidoscope"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\kaleidoscope"))
    } else {
        PathBuf::from("./kaleidoscope_data")
    }
}
