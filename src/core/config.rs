use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::core::errors::BridgeError;

/// Slack between the submission deadline and the drain lease for record
/// promotion and queue removal.
pub const LEASE_MARGIN_SECS: u64 = 15;

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "StorageConfig::default_database_url")]
    pub database_url: String,
    pub max_connections: Option<u32>,
    pub connection_timeout_seconds: Option<u64>,
}

impl StorageConfig {
    fn default_database_url() -> String {
        "sqlite://./data/bridge-sync.db?mode=rwc".to_string()
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: Self::default_database_url(),
            max_connections: Some(5),
            connection_timeout_seconds: Some(30),
        }
    }
}

/// Replay / background sync settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Tag registered with the background sync facility.
    #[serde(default = "SyncSettings::default_tag")]
    pub tag: String,

    /// Upper bound for one submission attempt (seconds)
    #[serde(default = "SyncSettings::default_submit_timeout")]
    pub submit_timeout_secs: u64,

    /// A drain lock older than this is considered abandoned (seconds)
    #[serde(default = "SyncSettings::default_lock_stale_after")]
    pub lock_stale_after_secs: u64,

    #[serde(default = "SyncSettings::default_lock_name")]
    pub lock_name: String,

    /// Background wakes that leave work behind are retried this many times in total
    #[serde(default = "SyncSettings::default_background_retry_limit")]
    pub background_retry_limit: u32,

    /// First retry delay, doubled per attempt (seconds)
    #[serde(default = "SyncSettings::default_background_retry_delay")]
    pub background_retry_delay_secs: u64,
}

impl SyncSettings {
    fn default_tag() -> String { "bridge-queue-sync".to_string() }
    fn default_submit_timeout() -> u64 { 45 }
    fn default_lock_stale_after() -> u64 { 120 }
    fn default_lock_name() -> String { "pending-bridge-drain".to_string() }
    fn default_background_retry_limit() -> u32 { 3 }
    fn default_background_retry_delay() -> u64 { 30 }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_secs(self.submit_timeout_secs)
    }

    pub fn lock_stale_after_ms(&self) -> i64 {
        i64::try_from(self.lock_stale_after_secs).unwrap_or(i64::MAX).saturating_mul(1000)
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            tag: Self::default_tag(),
            submit_timeout_secs: Self::default_submit_timeout(),
            lock_stale_after_secs: Self::default_lock_stale_after(),
            lock_name: Self::default_lock_name(),
            background_retry_limit: Self::default_background_retry_limit(),
            background_retry_delay_secs: Self::default_background_retry_delay(),
        }
    }
}

/// History retention
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "RetentionConfig::default_max_age_hours")]
    pub max_age_hours: u64,
}

impl RetentionConfig {
    fn default_max_age_hours() -> u64 { 7 * 24 }

    pub fn max_age_ms(&self) -> i64 {
        hours_to_ms(self.max_age_hours)
    }
}

/// Saturates instead of wrapping, so huge ages never turn into a negative cutoff.
pub fn hours_to_ms(hours: u64) -> i64 {
    i64::try_from(hours).unwrap_or(i64::MAX).saturating_mul(3_600_000)
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { max_age_hours: Self::default_max_age_hours() }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub retention: RetentionConfig,
}

impl SyncConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, BridgeError> {
        let config: SyncConfig = toml::from_str(content)
            .map_err(|e| BridgeError::Config(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise defaults. `DATABASE_URL` wins
    /// over the file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BridgeError> {
        let path = path.as_ref();
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => {
                info!(path = %path.display(), "Loaded bridge-sync config");
                Self::from_toml_str(&content)?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Config file not found, using defaults");
                Self::default()
            }
            Err(e) => {
                return Err(BridgeError::Config(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.trim().is_empty() {
                self.storage.database_url = url.trim().to_string();
            }
        }
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        if !self.storage.database_url.starts_with("sqlite:") {
            return Err(BridgeError::Config("database_url must be a sqlite url".into()));
        }
        if self.storage.max_connections == Some(0) {
            return Err(BridgeError::Config("max_connections must be positive".into()));
        }
        if self.sync.submit_timeout_secs == 0 {
            return Err(BridgeError::Config("submit_timeout_secs must be positive".into()));
        }
        // The lease must outlive one whole submission plus promotion, or a second
        // context can reclaim it mid-entry and execute the same bridge again.
        let min_lease = self.sync.submit_timeout_secs.saturating_add(LEASE_MARGIN_SECS);
        if self.sync.lock_stale_after_secs <= min_lease {
            return Err(BridgeError::Config(format!(
                "lock_stale_after_secs ({}) must exceed submit_timeout_secs + {} ({})",
                self.sync.lock_stale_after_secs, LEASE_MARGIN_SECS, min_lease
            )));
        }
        if self.sync.tag.trim().is_empty() || self.sync.lock_name.trim().is_empty() {
            return Err(BridgeError::Config("sync tag and lock name must be set".into()));
        }
        if self.retention.max_age_hours == 0 {
            return Err(BridgeError::Config("max_age_hours must be positive".into()));
        }
        Ok(())
    }
}
