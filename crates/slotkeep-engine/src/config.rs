use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use slotkeep_types::{DeviceId, UserId};

use crate::error::{EngineError, EngineResult};

/// Backoff settings for transient cloud failures.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    /// Fractional jitter applied to every backoff, `0.0..=1.0`.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

/// Engine configuration, loadable from TOML. Every field has a default.
///
/// ```toml
/// workers = 4
/// cloud_timeout_ms = 5000
/// ambiguity_window_ms = 2000
/// local_root = "saves"
/// user_id = "player-1"
///
/// [retry]
/// max_attempts = 3
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Concurrent tasks for distinct slots.
    pub workers: usize,
    /// Deadline for every individual cloud call.
    pub cloud_timeout_ms: u64,
    pub retry: RetryConfig,
    /// Saves closer together than this are treated as concurrent.
    pub ambiguity_window_ms: u64,
    /// Default grace period for [`shutdown`](crate::PersistenceEngine::shutdown).
    pub shutdown_grace_ms: u64,
    /// Storage write chunk size; cancellation is checked between chunks.
    pub chunk_size: usize,
    /// Directory of the local backend.
    pub local_root: PathBuf,
    /// Directory used as the cloud store when no other client is attached.
    pub cloud_root: Option<PathBuf>,
    pub user_id: String,
    /// Generated at build time when absent.
    pub device_id: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            cloud_timeout_ms: 5_000,
            retry: RetryConfig::default(),
            ambiguity_window_ms: 2_000,
            shutdown_grace_ms: 10_000,
            chunk_size: 64 * 1024,
            local_root: PathBuf::from("saves"),
            cloud_root: None,
            user_id: "default".into(),
            device_id: None,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> EngineResult<Self> {
        let config: Self = toml::from_str(raw).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    pub fn to_toml_string(&self) -> EngineResult<String> {
        toml::to_string_pretty(self).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.workers == 0 {
            return Err(EngineError::Config("workers must be at least 1".into()));
        }
        if self.cloud_timeout_ms == 0 {
            return Err(EngineError::Config("cloud_timeout_ms must be positive".into()));
        }
        if self.chunk_size == 0 {
            return Err(EngineError::Config("chunk_size must be positive".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(EngineError::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.multiplier < 1.0 {
            return Err(EngineError::Config("retry.multiplier must be >= 1.0".into()));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(EngineError::Config("retry.jitter must be within 0.0..=1.0".into()));
        }
        self.user()?;
        if let Some(device) = &self.device_id {
            DeviceId::new(device.as_str())?;
        }
        Ok(())
    }

    pub fn cloud_timeout(&self) -> Duration {
        Duration::from_millis(self.cloud_timeout_ms)
    }

    pub fn ambiguity_window(&self) -> Duration {
        Duration::from_millis(self.ambiguity_window_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn user(&self) -> EngineResult<UserId> {
        Ok(UserId::new(self.user_id.as_str())?)
    }

    /// The configured device, or a freshly generated one.
    pub fn device(&self) -> EngineResult<DeviceId> {
        match &self.device_id {
            Some(id) => Ok(DeviceId::new(id.as_str())?),
            None => Ok(DeviceId::generate()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = EngineConfig::default();
        assert_eq!(c.cloud_timeout(), Duration::from_millis(5_000));
        assert_eq!(c.ambiguity_window(), Duration::from_secs(2));
        assert_eq!(c.retry.max_attempts, 3);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = EngineConfig::from_toml_str(
            r#"
            workers = 2
            user_id = "player-1"
            device_id = "deck"

            [retry]
            max_attempts = 5
            "#,
        )
        .unwrap();
        assert_eq!(c.workers, 2);
        assert_eq!(c.retry.max_attempts, 5);
        assert_eq!(c.retry.initial_backoff_ms, 200);
        assert_eq!(c.cloud_timeout_ms, 5_000);
        assert_eq!(c.device().unwrap().as_str(), "deck");
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(EngineConfig::from_toml_str("workers = 0").is_err());
        assert!(EngineConfig::from_toml_str("[retry]\nmultiplier = 0.5").is_err());
        assert!(EngineConfig::from_toml_str("user_id = \"a/b\"").is_err());
        assert!(EngineConfig::from_toml_str("workers = \"many\"").is_err());
    }

    #[test]
    fn toml_roundtrip() {
        let c = EngineConfig {
            device_id: Some("deck".into()),
            cloud_root: Some(PathBuf::from("/mnt/cloud")),
            ..Default::default()
        };
        let back = EngineConfig::from_toml_str(&c.to_toml_string().unwrap()).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn generated_device_when_unset() {
        let c = EngineConfig::default();
        assert_ne!(c.device().unwrap(), c.device().unwrap());
    }
}
