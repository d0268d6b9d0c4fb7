//! Client Configuration
//!
//! Loads `ClientConfig` from `$XDG_CONFIG_HOME/atelier/client.toml`.
//!
//! # Configuration Priority
//!
//! Highest first:
//! 1. CLI arguments (applied by the caller through [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [backend]
//! api_url = "https://studio.example.com"
//! request_timeout_secs = 30
//! health_interval_secs = 15
//!
//! [progress]
//! ping_interval_secs = 25
//! backoff_base_ms = 1000
//! backoff_cap_ms = 10000
//!
//! [drip]
//! small_backlog = 50
//! large_backlog = 200
//! slow_ms = 25
//! jitter_ms = 5
//! medium_ms = 15
//! fast_ms = 8
//!
//! [storage]
//! state_dir = "/home/me/.local/share/atelier"
//! draft_debounce_ms = 500
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::drip::DripPacing;
use crate::progress::ProgressSettings;
use crate::storage::DEFAULT_DRAFT_DEBOUNCE;

/// Default backend address
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Where the effective configuration came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Command-line argument
    Cli,
    /// Environment variable
    Env,
    /// TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[backend]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendToml {
    /// HTTP base URL of the backend
    pub api_url: Option<String>,
    /// Connect and envelope request timeout
    pub request_timeout_secs: Option<u64>,
    /// Period of the reachability probe
    pub health_interval_secs: Option<u64>,
}

/// `[progress]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressToml {
    /// Keep-alive period
    pub ping_interval_secs: Option<u64>,
    /// First reconnect delay
    pub backoff_base_ms: Option<u64>,
    /// Longest reconnect delay
    pub backoff_cap_ms: Option<u64>,
}

/// `[drip]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DripToml {
    /// Backlog below which the slow tier applies
    pub small_backlog: Option<usize>,
    /// Backlog at which the fast tier starts
    pub large_backlog: Option<usize>,
    /// Slow tier delay
    pub slow_ms: Option<u64>,
    /// Slow tier jitter
    pub jitter_ms: Option<u64>,
    /// Medium tier delay
    pub medium_ms: Option<u64>,
    /// Fast tier delay
    pub fast_ms: Option<u64>,
}

/// `[storage]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageToml {
    /// Directory for drafts and the offline queue
    pub state_dir: Option<PathBuf>,
    /// Draft mirroring debounce
    pub draft_debounce_ms: Option<u64>,
}

/// Top-level TOML structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientToml {
    /// `[backend]`
    pub backend: BackendToml,
    /// `[progress]`
    pub progress: ProgressToml,
    /// `[drip]`
    pub drip: DripToml,
    /// `[storage]`
    pub storage: StorageToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Effective client configuration
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// HTTP base URL of the backend
    pub api_url: String,
    /// Connect and envelope request timeout
    pub request_timeout: Duration,
    /// Period of the reachability probe
    pub health_interval: Duration,
    /// Progress channel timing
    pub progress: ProgressSettings,
    /// Drip pacing
    pub drip: DripPacing,
    /// Directory for drafts and the offline queue
    pub state_dir: PathBuf,
    /// Draft mirroring debounce
    pub draft_debounce: Duration,
    /// Config file that was loaded, if any
    pub config_file_path: Option<PathBuf>,
    source: ConfigSource,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout: Duration::from_secs(30),
            health_interval: Duration::from_secs(15),
            progress: ProgressSettings::default(),
            drip: DripPacing::default(),
            state_dir: default_state_dir(),
            draft_debounce: DEFAULT_DRAFT_DEBOUNCE,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl ClientConfig {
    /// Primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(ConfigError::ValidationError(format!(
                "api_url must start with http:// or https://, got {}",
                self.api_url
            )));
        }
        if self.health_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "health_interval_secs must be greater than zero".into(),
            ));
        }
        if self.progress.ping_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "ping_interval_secs must be greater than zero".into(),
            ));
        }
        if self.progress.backoff_base > self.progress.backoff_cap {
            return Err(ConfigError::ValidationError(
                "backoff_base_ms must not exceed backoff_cap_ms".into(),
            ));
        }
        if self.drip.small_backlog >= self.drip.large_backlog {
            return Err(ConfigError::ValidationError(
                "drip small_backlog must be below large_backlog".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// `$XDG_CONFIG_HOME/atelier/client.toml`
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("atelier").join("client.toml"))
}

/// `$XDG_DATA_HOME/atelier`, or `.atelier` when no data dir is known
#[must_use]
pub fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|p| p.join("atelier"))
        .unwrap_or_else(|| PathBuf::from(".atelier"))
}

/// Load from the default path, then apply the environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be read or parsed,
/// or if the result fails validation. A missing file is not an error.
pub fn load_config() -> Result<ClientConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load from a specific path, then apply the environment
///
/// # Errors
///
/// Same as [`load_config`].
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ClientConfig, ConfigError> {
    let mut config = ClientConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: ClientToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(path = %config_path.display(), "Loaded configuration from file");
        } else {
            tracing::debug!(path = %config_path.display(), "Config file not found, using defaults");
        }
    }

    apply_env_config(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

fn apply_toml_config(config: &mut ClientConfig, toml: &ClientToml) {
    if let Some(ref url) = toml.backend.api_url {
        config.api_url = url.trim_end_matches('/').to_string();
    }
    if let Some(secs) = toml.backend.request_timeout_secs {
        config.request_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = toml.backend.health_interval_secs {
        config.health_interval = Duration::from_secs(secs);
    }

    if let Some(secs) = toml.progress.ping_interval_secs {
        config.progress.ping_interval = Duration::from_secs(secs);
    }
    if let Some(ms) = toml.progress.backoff_base_ms {
        config.progress.backoff_base = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.progress.backoff_cap_ms {
        config.progress.backoff_cap = Duration::from_millis(ms);
    }

    let drip = &toml.drip;
    if let Some(n) = drip.small_backlog {
        config.drip.small_backlog = n;
    }
    if let Some(n) = drip.large_backlog {
        config.drip.large_backlog = n;
    }
    if let Some(ms) = drip.slow_ms {
        config.drip.slow = Duration::from_millis(ms);
    }
    if let Some(ms) = drip.jitter_ms {
        config.drip.jitter = Duration::from_millis(ms);
    }
    if let Some(ms) = drip.medium_ms {
        config.drip.medium = Duration::from_millis(ms);
    }
    if let Some(ms) = drip.fast_ms {
        config.drip.fast = Duration::from_millis(ms);
    }

    if let Some(ref dir) = toml.storage.state_dir {
        config.state_dir.clone_from(dir);
    }
    if let Some(ms) = toml.storage.draft_debounce_ms {
        config.draft_debounce = Duration::from_millis(ms);
    }
}

/// Apply `ATELIER_*` overrides read through `lookup`
fn apply_env_config<F>(config: &mut ClientConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup("ATELIER_API_URL") {
        config.api_url = url.trim_end_matches('/').to_string();
        config.source = ConfigSource::Env;
    }
    if let Some(dir) = lookup("ATELIER_STATE_DIR") {
        config.state_dir = PathBuf::from(dir);
        config.source = ConfigSource::Env;
    }
    if let Some(secs) = lookup("ATELIER_PING_INTERVAL_SECS").and_then(|v| v.parse::<u64>().ok()) {
        config.progress.ping_interval = Duration::from_secs(secs);
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = lookup("ATELIER_DRAFT_DEBOUNCE_MS").and_then(|v| v.parse::<u64>().ok()) {
        config.draft_debounce = Duration::from_millis(ms);
        config.source = ConfigSource::Env;
    }
    if let Some(secs) = lookup("ATELIER_REQUEST_TIMEOUT_SECS").and_then(|v| v.parse::<u64>().ok())
    {
        config.request_timeout = Duration::from_secs(secs);
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Command-line overrides, applied after [`load_config`]
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Backend URL
    pub api_url: Option<String>,
    /// State directory
    pub state_dir: Option<PathBuf>,
    /// Render tokens without pacing
    pub instant_drip: bool,
}

impl ConfigOverrides {
    /// Apply overrides and re-validate
    ///
    /// # Errors
    ///
    /// Returns a validation error if an override produced an invalid config.
    pub fn apply(&self, config: &mut ClientConfig) -> Result<(), ConfigError> {
        if self.api_url.is_some() || self.state_dir.is_some() || self.instant_drip {
            config.source = ConfigSource::Cli;
        }
        if let Some(ref url) = self.api_url {
            config.api_url = url.trim_end_matches('/').to_string();
        }
        if let Some(ref dir) = self.state_dir {
            config.state_dir.clone_from(dir);
        }
        if self.instant_drip {
            config.drip = DripPacing::instant();
        }
        config.validate()
    }
}

// =============================================================================
// Tests
// =============================================================================
