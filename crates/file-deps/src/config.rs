//! Client configuration.
//!
//! Read from `~/.config/desam/client.json` (`%APPDATA%\desam\client.json`
//! on Windows). Missing files and missing fields fall back to defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::FileDepsError;
use crate::retry::RetryPolicy;

/// What a resolution does when a single mapping fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResolveMode {
    /// Keep resolving the other mappings and report per-item failures.
    #[default]
    Partial,
    /// Abort the whole resolution on the first failure.
    AllOrNothing,
}

/// Retry settings as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 250,
            max_delay_ms: 5_000,
            backoff_factor: 2.0,
        }
    }
}

/// Persisted client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// Principal quota and references are tracked for.
    pub principal: String,
    /// Upload chunk size in bytes.
    pub chunk_size: usize,
    /// Maximum concurrent hashing, query and upload tasks.
    pub concurrency: usize,
    /// Timeout of one remote call or chunk hand-off.
    pub call_timeout_ms: u64,
    pub retry: RetrySettings,
    pub mode: ResolveMode,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            principal: String::new(),
            chunk_size: desam_transfer::DEFAULT_CHUNK_SIZE,
            concurrency: 4,
            call_timeout_ms: 30_000,
            retry: RetrySettings::default(),
            mode: ResolveMode::Partial,
        }
    }
}

impl ClientConfig {
    /// Loads the configuration from the default location.
    pub fn load() -> Result<Self, FileDepsError> {
        Self::load_from(&config_path())
    }

    /// Loads the configuration from `path`.
    ///
    /// A missing file yields defaults. An unparsable file is logged and
    /// also yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, FileDepsError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        match serde_json::from_str::<ClientConfig>(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse client config, using defaults"
                );
                Ok(Self::default())
            }
        }
    }

    /// Writes the configuration to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), FileDepsError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        set_permissions_0600(path);
        tracing::debug!(path = %path.display(), "client config saved");
        Ok(())
    }

    /// Converts to the runtime settings of a resolution.
    pub fn resolve_config(&self) -> ResolveConfig {
        ResolveConfig {
            principal: self.principal.clone(),
            chunk_size: if self.chunk_size == 0 {
                desam_transfer::DEFAULT_CHUNK_SIZE
            } else {
                self.chunk_size
            },
            concurrency: self.concurrency.max(1),
            call_timeout: Duration::from_millis(self.call_timeout_ms.max(1)),
            retry: RetryPolicy {
                max_attempts: self.retry.max_attempts.max(1),
                initial_delay: Duration::from_millis(self.retry.initial_delay_ms),
                max_delay: Duration::from_millis(self.retry.max_delay_ms),
                backoff_factor: self.retry.backoff_factor,
            },
            mode: self.mode,
        }
    }
}

/// Runtime settings used by [`FileManager`](crate::FileManager).
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveConfig {
    pub principal: String,
    pub chunk_size: usize,
    pub concurrency: usize,
    pub call_timeout: Duration,
    pub retry: RetryPolicy,
    pub mode: ResolveMode,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        ClientConfig::default().resolve_config()
    }
}

impl ResolveConfig {
    /// Default settings for `principal`.
    pub fn for_principal(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            ..Self::default()
        }
    }
}

/// Default config file location.
pub fn config_path() -> PathBuf {
    config_base_dir().join("desam").join("client.json")
}

fn config_base_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata)
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home).join(".config")
    }
}

fn set_permissions_0600(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}
