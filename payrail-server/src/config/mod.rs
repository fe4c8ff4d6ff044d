//! Configuration module for payrail-server.
//!
//! Handles loading configuration from the TOML file, CLI arguments and
//! environment variables, and converting it into the engine's runtime types.

pub mod file;
pub mod runtime;

use crate::config::file::{DevConfig, FileConfig};
use payrail_core::config::{
    DispatcherConfig, GatewayConfig, RiskPolicy, ServerConfig, WorkerConfig,
};
use rust_decimal::Decimal;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("DATABASE_URL environment variable not set")]
    MissingDatabaseUrl,
}

/// Loaded configuration result containing all parts.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub server: ServerConfig,
    pub gateway: GatewayConfig,
    pub risk: RiskPolicy,
    pub dispatcher: DispatcherConfig,
    pub worker: WorkerConfig,
    pub dev: DevConfig,
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: PathBuf,
    listen_override: Option<SocketAddr>,
}

impl ConfigLoader {
    pub fn new(config_path: impl AsRef<Path>, listen_override: Option<SocketAddr>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            listen_override,
        }
    }

    /// Read the TOML file, apply CLI overrides and validate.
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let config_content = std::fs::read_to_string(&self.config_path)?;
        let mut file_config: FileConfig = toml::from_str(&config_content)?;

        if let Some(listen) = self.listen_override {
            file_config.server.listen = listen;
        }

        validate(&file_config)?;

        Ok(LoadedConfig {
            server: file_config.server.to_runtime(),
            gateway: file_config.gateway.to_runtime(),
            risk: file_config.risk.to_policy(),
            dispatcher: file_config.webhooks.to_runtime(),
            worker: file_config.worker.to_runtime(),
            dev: file_config.dev,
        })
    }

    /// Reload the configuration (used during SIGHUP).
    ///
    /// Only the risk policy is applied live; the other sections take
    /// effect on restart.
    pub fn reload(&self) -> Result<LoadedConfig, ConfigError> {
        self.load()
    }
}

fn validate(config: &FileConfig) -> Result<(), ConfigError> {
    let risk = &config.risk;
    if risk.block_above > 100 || risk.fallback_score > 100 {
        return Err(ConfigError::ValidationError(
            "risk scores must be within 0..=100".to_owned(),
        ));
    }
    if risk.review_above > risk.block_above {
        return Err(ConfigError::ValidationError(format!(
            "risk.review_above ({}) must not exceed risk.block_above ({})",
            risk.review_above, risk.block_above
        )));
    }
    if risk.off_hours.start_hour > 23 || risk.off_hours.end_hour > 24 {
        return Err(ConfigError::ValidationError(
            "risk.off_hours hours must be UTC hours".to_owned(),
        ));
    }
    if risk.max_factor_share.is_sign_negative() || risk.max_factor_share > Decimal::ONE {
        return Err(ConfigError::ValidationError(
            "risk.max_factor_share must be within 0..=1".to_owned(),
        ));
    }

    let retry = &config.gateway.retry;
    if retry.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "gateway.retry.max_attempts must be at least 1".to_owned(),
        ));
    }
    if retry.multiplier.is_nan() || retry.multiplier < 1.0 {
        return Err(ConfigError::ValidationError(
            "gateway.retry.multiplier must be at least 1.0".to_owned(),
        ));
    }
    if config.gateway.circuit_breaker.failure_threshold == 0 {
        return Err(ConfigError::ValidationError(
            "gateway.circuit_breaker.failure_threshold must be at least 1".to_owned(),
        ));
    }
    if config.gateway.call_timeout_ms == 0 {
        return Err(ConfigError::ValidationError(
            "gateway.call_timeout_ms must be positive".to_owned(),
        ));
    }

    let webhooks = &config.webhooks;
    if webhooks.batch_size == 0 || webhooks.concurrency == 0 || webhooks.backoff_base == 0 {
        return Err(ConfigError::ValidationError(
            "webhooks.batch_size, concurrency and backoff_base must be positive".to_owned(),
        ));
    }
    if webhooks.poll_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "webhooks.poll_interval_ms must be positive".to_owned(),
        ));
    }

    if config.worker.max_concurrency == 0 {
        return Err(ConfigError::ValidationError(
            "worker.max_concurrency must be at least 1".to_owned(),
        ));
    }
    if config.worker.stale_processing_secs == 0 {
        return Err(ConfigError::ValidationError(
            "worker.stale_processing_secs must be positive".to_owned(),
        ));
    }

    for subscription in &config.dev.subscriptions {
        if subscription.events.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "subscription for {} has no events",
                subscription.url
            )));
        }
    }
    Ok(())
}

/// Get the database URL from the environment.
pub fn get_database_url() -> Result<String, ConfigError> {
    std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &str) -> FileConfig {
        let toml_str = format!("[gateway]\nbase_url = \"http://127.0.0.1:9090/\"\n{extra}");
        toml::from_str(&toml_str).unwrap()
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate(&parse("")).is_ok());
    }

    #[test]
    fn test_example_config_is_valid() {
        let config: FileConfig =
            toml::from_str(include_str!("../../../payrail.example.toml")).unwrap();
        assert!(validate(&config).is_ok());
        assert_eq!(config.risk.to_policy(), RiskPolicy::default());
        assert_eq!(config.dev.subscriptions[0].events.len(), 4);
    }

    #[test]
    fn test_review_above_block_is_rejected() {
        let config = parse("[risk]\nblock_above = 50\nreview_above = 70\n");
        assert!(matches!(
            validate(&config),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_zero_retry_attempts_is_rejected() {
        let config = parse("[gateway.retry]\nmax_attempts = 0\n");
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_worker_concurrency_is_rejected() {
        let config = parse("[worker]\nmax_concurrency = 0\n");
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_stale_threshold_is_rejected() {
        let config = parse("[worker]\nstale_processing_secs = 0\n");
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_loader_applies_listen_override() {
        let dir = std::env::temp_dir().join(format!("payrail-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("payrail.toml");
        std::fs::write(
            &path,
            "[server]\nlisten = \"127.0.0.1:3000\"\n\n[gateway]\nbase_url = \"http://127.0.0.1:9090/\"\n\n[risk]\nblock_above = 70\n",
        )
        .unwrap();

        let override_addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let loaded = ConfigLoader::new(&path, Some(override_addr)).load().unwrap();
        assert_eq!(loaded.server.listen, override_addr);
        assert_eq!(loaded.risk.block_above, 70);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_loader_reports_missing_file() {
        let loader = ConfigLoader::new("/nonexistent/payrail.toml", None);
        assert!(matches!(loader.load(), Err(ConfigError::IoError(_))));
    }
}
