//! Configuration management with validation and defaults

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level storefront configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RaspaConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub sessions: SessionConfig,
    #[serde(default)]
    pub payments: PaymentConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

/// HTTP server configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            allowed_origins: vec!["*".to_string()],
            request_timeout_secs: 30,
        }
    }
}

/// Ledger storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_directory: String,
    pub write_buffer_size_mb: usize,
    /// Bounded retries for optimistic-transaction commit conflicts.
    pub txn_retry_limit: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_directory: "./db/ledger".to_string(),
            write_buffer_size_mb: 64,
            txn_retry_limit: 16,
        }
    }
}

/// Session authority configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub user_ttl_hours: u64,
    /// Narrower window for admins: higher blast radius.
    pub admin_ttl_hours: u64,
    pub cache_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user_ttl_hours: 24,
            admin_ttl_hours: 8,
            cache_capacity: 10_000,
        }
    }
}

/// Payment window and provider call bounds
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentConfig {
    pub window_minutes: u64,
    pub provider_timeout_ms: u64,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            window_minutes: 60,
            provider_timeout_ms: 5_000,
        }
    }
}

/// Game outcome engine call bounds
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub call_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 5_000,
        }
    }
}

impl RaspaConfig {
    /// Load from a TOML file; missing sections fall back to defaults.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::LoadFailed(format!("{path}: {e}")))?;
        let config: Self =
            toml::from_str(&raw).map_err(|e| ConfigError::LoadFailed(format!("{path}: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate for logical consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sessions.user_ttl_hours == 0 || self.sessions.admin_ttl_hours == 0 {
            return Err(ConfigError::InvalidValue(
                "session TTLs must be > 0".to_string(),
            ));
        }
        if self.sessions.admin_ttl_hours > self.sessions.user_ttl_hours {
            return Err(ConfigError::InvalidValue(
                "admin sessions must not outlive user sessions".to_string(),
            ));
        }
        if self.payments.window_minutes == 0 {
            return Err(ConfigError::InvalidValue(
                "payment window must be > 0".to_string(),
            ));
        }
        if self.payments.provider_timeout_ms == 0 || self.engine.call_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "collaborator timeouts must be > 0".to_string(),
            ));
        }
        if self.storage.txn_retry_limit == 0 {
            return Err(ConfigError::InvalidValue(
                "txn_retry_limit must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn user_session_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.sessions.user_ttl_hours as i64)
    }

    pub fn admin_session_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.sessions.admin_ttl_hours as i64)
    }

    pub fn payment_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.payments.window_minutes as i64)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.payments.provider_timeout_ms)
    }

    pub fn engine_timeout(&self) -> Duration {
        Duration::from_millis(self.engine.call_timeout_ms)
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("failed to load configuration: {0}")]
    LoadFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(RaspaConfig::default().validate().is_ok());
    }

    #[test]
    fn test_spec_ttls() {
        let config = RaspaConfig::default();
        assert_eq!(config.user_session_ttl(), chrono::Duration::hours(24));
        assert_eq!(config.admin_session_ttl(), chrono::Duration::hours(8));
        assert_eq!(config.payment_window(), chrono::Duration::minutes(60));
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let mut config = RaspaConfig::default();
        config.sessions.user_ttl_hours = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_admin_ttl_must_be_narrower() {
        let mut config = RaspaConfig::default();
        config.sessions.admin_ttl_hours = 48;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: RaspaConfig = toml::from_str("[server]\nport = 9000\n").unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.sessions.user_ttl_hours, 24);
    }
}
