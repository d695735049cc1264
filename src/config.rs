//! Configuration loading for cardsmith.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. `--config <path>` (CLI flag)
//! 2. `~/.cardsmith/config.toml` (user)
//! 3. `/etc/cardsmith/config.toml` (system)
//!
//! Secrets are loaded separately with mandatory permission checks:
//! 1. `~/.cardsmith/secrets.toml` (user, must be 0600)
//! 2. `/etc/cardsmith/secrets.toml` (system, must be 0600)
//!
//! The generation API key falls back to `CARDSMITH_GENERATION_API_KEY`.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::CacheConfig;
use crate::client::{DEFAULT_BASE_URL, DEFAULT_TIMEOUT};
use crate::coordinator::CoordinatorSettings;
use crate::coordinator::jobs::{DEFAULT_CONCURRENCY, DEFAULT_QUEUE_CAPACITY};
use crate::types::UploadPolicy;
use crate::{CardsmithError, Result};

/// Environment variable holding the generation API key.
pub const API_KEY_ENV_VAR: &str = "CARDSMITH_GENERATION_API_KEY";

/// Pipeline configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub uploads: UploadPolicy,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Generation service connection.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationConfig {
    /// Service base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-call timeout in seconds (default: 120).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

/// Background worker pool.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkersConfig {
    /// Jobs run at once (default: 4).
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Bounded queue capacity (default: 256).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Delay before initial generation, in seconds (default: 30).
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,
    /// Delay before a backfill, in seconds (default: 0).
    #[serde(default)]
    pub backfill_delay_secs: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            queue_capacity: default_queue_capacity(),
            initial_delay_secs: default_initial_delay(),
            backfill_delay_secs: 0,
        }
    }
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_initial_delay() -> u64 {
    30
}

/// Processing cache tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    /// Treat `Processing` records older than this many seconds as
    /// abandoned. Unset: never.
    #[serde(default)]
    pub stale_after_secs: Option<u64>,
    /// How long unused per-key locks are kept, in seconds (default: 600).
    #[serde(default = "default_lock_idle")]
    pub lock_idle_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            stale_after_secs: None,
            lock_idle_secs: default_lock_idle(),
        }
    }
}

fn default_lock_idle() -> u64 {
    600
}

/// Where uploaded files are kept.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    /// Root directory for uploads (default: `<data dir>/cardsmith`).
    #[serde(default)]
    pub files_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// Configured directory, or the platform data directory.
    pub fn files_dir(&self) -> PathBuf {
        self.files_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("cardsmith")
        })
    }
}

/// Secrets configuration (API keys).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Secrets {
    #[serde(default)]
    pub generation: Option<ApiKeySecret>,
}

/// A single API key secret.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeySecret {
    pub api_key: String,
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided)
    /// 2. `~/.cardsmith/config.toml`
    /// 3. `/etc/cardsmith/config.toml`
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_config_path(explicit_path)?;
        let content = fs::read_to_string(&path).map_err(|e| {
            CardsmithError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            CardsmithError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })
    }

    /// Like [`load`](Self::load), but defaults when no file exists and no
    /// path was given.
    pub fn load_or_default(explicit_path: Option<&Path>) -> Result<Self> {
        match explicit_path {
            Some(_) => Self::load(explicit_path),
            None => match Self::resolve_config_path(None) {
                Ok(path) => Self::load(Some(&path)),
                Err(_) => Ok(Self::default()),
            },
        }
    }

    /// Resolve the config file path.
    fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(path.to_path_buf());
            }
            return Err(CardsmithError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".cardsmith").join("config.toml");
            if user_config.exists() {
                return Ok(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/cardsmith/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }

        Err(CardsmithError::Configuration(
            "No config file found. Create ~/.cardsmith/config.toml or /etc/cardsmith/config.toml"
                .to_string(),
        ))
    }

    pub fn cache_config(&self) -> CacheConfig {
        let config = CacheConfig::new().lock_idle_ttl(Duration::from_secs(self.cache.lock_idle_secs));
        match self.cache.stale_after_secs {
            Some(secs) => config.stale_after(Duration::from_secs(secs)),
            None => config,
        }
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings::new()
            .initial_delay(Duration::from_secs(self.workers.initial_delay_secs))
            .backfill_delay(Duration::from_secs(self.workers.backfill_delay_secs))
            .generation_timeout(Duration::from_secs(self.generation.timeout_secs))
    }
}

impl Secrets {
    /// Load secrets from the standard locations with permission checks.
    ///
    /// Resolution order:
    /// 1. `~/.cardsmith/secrets.toml` (if exists, must be 0600)
    /// 2. `/etc/cardsmith/secrets.toml` (if exists, must be 0600)
    ///
    /// Returns empty secrets if no file exists (the key may come from the
    /// environment).
    pub fn load() -> Result<Self> {
        if let Some(home) = dirs::home_dir() {
            let user_secrets = home.join(".cardsmith").join("secrets.toml");
            if user_secrets.exists() {
                return Self::load_from(&user_secrets);
            }
        }

        let system_secrets = PathBuf::from("/etc/cardsmith/secrets.toml");
        if system_secrets.exists() {
            return Self::load_from(&system_secrets);
        }

        Ok(Secrets::default())
    }

    /// Load a specific secrets file, checking its permissions first.
    pub fn load_from(path: &Path) -> Result<Self> {
        Self::check_permissions(path)?;
        let content = fs::read_to_string(path).map_err(|e| {
            CardsmithError::Configuration(format!("Failed to read secrets file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            CardsmithError::Configuration(format!("Failed to parse secrets file {path:?}: {e}"))
        })
    }

    /// Check that the secrets file has secure permissions (0600 or 0400).
    #[cfg(unix)]
    fn check_permissions(path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let metadata = fs::metadata(path).map_err(|e| {
            CardsmithError::Configuration(format!("Failed to stat secrets file {path:?}: {e}"))
        })?;

        let mode = metadata.permissions().mode();
        if mode & 0o077 != 0 {
            return Err(CardsmithError::Configuration(format!(
                "Secrets file {path:?} has insecure permissions {:o}. Must be 0600 or 0400.",
                mode & 0o777
            )));
        }

        Ok(())
    }

    #[cfg(not(unix))]
    fn check_permissions(_path: &Path) -> Result<()> {
        Ok(())
    }

    /// Generation API key, falling back to [`API_KEY_ENV_VAR`].
    pub fn generation_api_key(&self) -> Option<String> {
        self.generation
            .as_ref()
            .map(|s| s.api_key.clone())
            .or_else(|| std::env::var(API_KEY_ENV_VAR).ok())
            .filter(|key| !key.is_empty())
    }
}
