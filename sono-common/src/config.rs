//! Configuration loading and root folder resolution
//!
//! Bootstrap configuration comes from a TOML file; every field has a built-in
//! default so a missing or partial file never prevents startup.
//!
//! # Resolution priority
//!
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub const ENV_CONFIG_PATH: &str = "SONO_CONFIG";
pub const ENV_ROOT_FOLDER: &str = "SONO_ROOT_FOLDER";
pub const ENV_ACOUSTID_API_KEY: &str = "SONO_ACOUSTID_API_KEY";

/// Top-level configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SonoConfig {
    /// Folder holding the cache database (OS data dir when unset)
    pub root_folder: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub cache: CacheConfig,
    pub worker: WorkerConfig,
    pub artwork: ArtworkSettings,
    pub playback: PlaybackConfig,
    pub services: ServicesConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error); `RUST_LOG` overrides
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

/// Metadata cache limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entry count ceiling; crossing it evicts `evict_batch` oldest entries
    pub max_entries: usize,
    pub evict_batch: usize,
    /// Serialized entries larger than this drop their artwork payloads
    pub max_entry_bytes: usize,
    /// Total store capacity in bytes (quota)
    pub quota_bytes: usize,
    /// Entries older than this are removed by the periodic cleanup
    pub max_age_days: u32,
    /// SQLite file name inside the root folder; in-memory store when unset
    pub database_file: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 20,
            evict_batch: 5,
            max_entry_bytes: 1024 * 1024,
            quota_bytes: 5 * 1024 * 1024,
            max_age_days: 30,
            database_file: Some("sonoscope-cache.db".to_string()),
        }
    }
}

impl CacheConfig {
    pub fn max_age(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.max_age_days))
    }
}

/// Verification worker tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Tasks processed concurrently per batch
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    pub max_retries: u32,
    /// Base backoff; attempt n waits `retry_delay_ms * 2^n`
    pub retry_delay_ms: u64,
    pub max_queue_len: usize,
    pub cleanup_interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 3,
            batch_delay_ms: 1000,
            max_retries: 3,
            retry_delay_ms: 5000,
            max_queue_len: 100,
            cleanup_interval_secs: 24 * 60 * 60,
        }
    }
}

impl WorkerConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    /// Backoff before retry number `retry_count + 1`
    pub fn retry_backoff(&self, retry_count: u32) -> Duration {
        let factor = 1u64.checked_shl(retry_count).unwrap_or(u64::MAX);
        Duration::from_millis(self.retry_delay_ms.saturating_mul(factor))
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

/// Per-step switches for the artwork fallback chain
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtworkSettings {
    pub embedded: bool,
    pub musicbrainz: bool,
    pub acoustid: bool,
    pub filename_heuristic: bool,
    pub placeholder: bool,
}

impl Default for ArtworkSettings {
    fn default() -> Self {
        Self {
            embedded: true,
            musicbrainz: true,
            acoustid: true,
            filename_heuristic: true,
            placeholder: true,
        }
    }
}

impl ArtworkSettings {
    /// Only local steps (embedded + placeholder); no network access
    pub fn offline() -> Self {
        Self {
            musicbrainz: false,
            acoustid: false,
            filename_heuristic: false,
            ..Self::default()
        }
    }
}

/// Playback engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Minimum spacing between published state snapshots while playing
    pub publish_interval_ms: u64,
    /// Position polling period
    pub tick_interval_ms: u64,
    pub initial_volume: f32,
    /// Snapshot channel capacity
    pub state_channel_capacity: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            publish_interval_ms: 20,
            tick_interval_ms: 10,
            initial_volume: 1.0,
            state_channel_capacity: 64,
        }
    }
}

impl PlaybackConfig {
    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

/// External lookup services
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    pub user_agent: String,
    pub musicbrainz_url: String,
    pub coverart_url: String,
    pub acoustid_url: String,
    /// AcoustID application key; the fingerprint step is skipped without one
    pub acoustid_api_key: Option<String>,
    /// Chromaprint command-line tool
    pub fpcalc_path: PathBuf,
    pub request_timeout_secs: u64,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("Sonoscope/", env!("CARGO_PKG_VERSION"), " ( https://github.com/sonoscope/sonoscope )")
                .to_string(),
            musicbrainz_url: "https://musicbrainz.org/ws/2".to_string(),
            coverart_url: "https://coverartarchive.org".to_string(),
            acoustid_url: "https://api.acoustid.org/v2/lookup".to_string(),
            acoustid_api_key: None,
            fpcalc_path: PathBuf::from("fpcalc"),
            request_timeout_secs: 30,
        }
    }
}

impl ServicesConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// AcoustID key: environment first, then TOML
    pub fn resolve_acoustid_api_key(&self) -> Option<String> {
        if let Ok(key) = std::env::var(ENV_ACOUSTID_API_KEY) {
            if is_valid_key(&key) {
                info!("AcoustID API key loaded from environment variable");
                return Some(key.trim().to_string());
            }
        }

        if let Some(key) = self.acoustid_api_key.as_deref().filter(|k| is_valid_key(k)) {
            info!("AcoustID API key loaded from TOML config");
            return Some(key.trim().to_string());
        }

        warn!("AcoustID API key not configured; fingerprint artwork lookup disabled");
        None
    }
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

impl SonoConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Load configuration from a file
    ///
    /// A missing file is not an error: a warning is logged and defaults are
    /// used. A file that exists but does not parse is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("Config file not found: {} (using defaults)", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Resolve the config file path and load it
    pub fn resolve(cli_path: Option<&Path>) -> Result<Self> {
        match resolve_config_path(cli_path) {
            Some(path) => Self::load(&path),
            None => {
                info!("No config file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Root folder: CLI → environment → TOML → OS default
    pub fn resolve_root_folder(&self, cli_arg: Option<&Path>) -> PathBuf {
        if let Some(path) = cli_arg {
            return path.to_path_buf();
        }
        if let Ok(path) = std::env::var(ENV_ROOT_FOLDER) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }
        if let Some(path) = &self.root_folder {
            return path.clone();
        }
        default_root_folder()
    }
}

/// Config file path: CLI → `SONO_CONFIG` → `<config dir>/sonoscope/config.toml`
/// (only if it exists)
pub fn resolve_config_path(cli_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }
    if let Ok(path) = std::env::var(ENV_CONFIG_PATH) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    dirs::config_dir()
        .map(|d| d.join("sonoscope").join("config.toml"))
        .filter(|p| p.exists())
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("sonoscope"))
        .unwrap_or_else(|| PathBuf::from("./sonoscope_data"))
}
