//! TOML file configuration structures.
//!
//! These structs directly map to the `payrail.toml` file format. Only
//! `[gateway] base_url` is required; everything else falls back to the
//! engine defaults.

use payrail_core::config::{DispatcherConfig, RiskPolicy, WorkerConfig};
use payrail_core::gateway::{CircuitBreakerConfig, RetryPolicy};
use payrail_core::risk::{AccountAgeTier, AmountTier, OffHours, VelocityTier};
use payrail_sdk::objects::EventName;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use url::Url;
use uuid::Uuid;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub webhooks: WebhookConfig,
    #[serde(default)]
    pub worker: WorkerSection,
    /// Fixtures loaded into the in-memory stores; ignored with Postgres.
    #[serde(default)]
    pub dev: DevConfig,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The address and port to listen on (e.g., "0.0.0.0:8080").
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Settlement gateway section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// `charges` and `refunds` are resolved against this URL.
    pub base_url: Url,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSection,
}

fn default_call_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetrySection {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_backoff_ms: policy.initial_backoff.as_millis() as u64,
            max_backoff_ms: policy.max_backoff.as_millis() as u64,
            multiplier: policy.multiplier,
            jitter: policy.jitter,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSection {
    pub failure_threshold: u32,
    pub failure_window_secs: u64,
    pub cooldown_secs: u64,
}

impl Default for CircuitBreakerSection {
    fn default() -> Self {
        let breaker = CircuitBreakerConfig::default();
        Self {
            failure_threshold: breaker.failure_threshold,
            failure_window_secs: breaker.failure_window.as_secs(),
            cooldown_secs: breaker.cooldown.as_secs(),
        }
    }
}

/// Risk scoring section. Reloaded on SIGHUP.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub block_above: u8,
    pub review_above: u8,
    pub max_factor_share: Decimal,
    pub fallback_score: u8,
    pub velocity_window_secs: u64,
    pub missing_method_points: u32,
    pub off_hours: OffHoursSection,
    pub amount_tiers: Vec<AmountTierSection>,
    pub account_age_tiers: Vec<AccountAgeTierSection>,
    pub velocity_tiers: Vec<VelocityTierSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OffHoursSection {
    pub start_hour: u8,
    pub end_hour: u8,
    pub points: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmountTierSection {
    pub above: Decimal,
    pub points: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountAgeTierSection {
    pub younger_than_days: u32,
    pub points: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VelocityTierSection {
    pub at_least: u32,
    pub points: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        let policy = RiskPolicy::default();
        Self {
            block_above: policy.block_above,
            review_above: policy.review_above,
            max_factor_share: policy.max_factor_share,
            fallback_score: policy.fallback_score,
            velocity_window_secs: policy.velocity_window.as_secs(),
            missing_method_points: policy.missing_method_points,
            off_hours: OffHoursSection {
                start_hour: policy.off_hours.start_hour,
                end_hour: policy.off_hours.end_hour,
                points: policy.off_hours.points,
            },
            amount_tiers: policy
                .amount_tiers
                .iter()
                .map(|t| AmountTierSection {
                    above: t.above,
                    points: t.points,
                })
                .collect(),
            account_age_tiers: policy
                .account_age_tiers
                .iter()
                .map(|t| AccountAgeTierSection {
                    younger_than_days: t.younger_than_days,
                    points: t.points,
                })
                .collect(),
            velocity_tiers: policy
                .velocity_tiers
                .iter()
                .map(|t| VelocityTierSection {
                    at_least: t.at_least,
                    points: t.points,
                })
                .collect(),
        }
    }
}

impl RiskConfig {
    pub fn to_policy(&self) -> RiskPolicy {
        RiskPolicy {
            block_above: self.block_above,
            review_above: self.review_above,
            max_factor_share: self.max_factor_share,
            fallback_score: self.fallback_score,
            velocity_window: std::time::Duration::from_secs(self.velocity_window_secs),
            amount_tiers: self
                .amount_tiers
                .iter()
                .map(|t| AmountTier {
                    above: t.above,
                    points: t.points,
                })
                .collect(),
            account_age_tiers: self
                .account_age_tiers
                .iter()
                .map(|t| AccountAgeTier {
                    younger_than_days: t.younger_than_days,
                    points: t.points,
                })
                .collect(),
            velocity_tiers: self
                .velocity_tiers
                .iter()
                .map(|t| VelocityTier {
                    at_least: t.at_least,
                    points: t.points,
                })
                .collect(),
            missing_method_points: self.missing_method_points,
            off_hours: OffHours {
                start_hour: self.off_hours.start_hour,
                end_hour: self.off_hours.end_hour,
                points: self.off_hours.points,
            },
        }
    }
}

/// Webhook dispatcher section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub request_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub batch_size: usize,
    pub concurrency: usize,
    pub claim_lease_secs: u64,
    pub backoff_unit_secs: u64,
    pub backoff_base: u32,
    pub backoff_max_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        let dispatcher = DispatcherConfig::default();
        Self {
            request_timeout_ms: dispatcher.request_timeout.as_millis() as u64,
            poll_interval_ms: dispatcher.poll_interval.as_millis() as u64,
            batch_size: dispatcher.batch_size,
            concurrency: dispatcher.concurrency,
            claim_lease_secs: dispatcher.claim_lease.as_secs(),
            backoff_unit_secs: dispatcher.backoff.unit.as_secs(),
            backoff_base: dispatcher.backoff.base,
            backoff_max_secs: dispatcher.backoff.max.as_secs(),
        }
    }
}

/// Payment worker section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSection {
    pub max_concurrency: usize,
    pub account_cache_ttl_secs: u64,
    /// PROCESSING payments older than this are failed by the startup sweep.
    pub stale_processing_secs: u64,
}

impl Default for WorkerSection {
    fn default() -> Self {
        let worker = WorkerConfig::default();
        Self {
            max_concurrency: worker.max_concurrency,
            account_cache_ttl_secs: worker.account_cache_ttl.as_secs(),
            stale_processing_secs: worker.stale_processing_after.as_secs(),
        }
    }
}

/// Seed data for `--in-memory` runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DevConfig {
    #[serde(default)]
    pub accounts: Vec<DevAccount>,
    #[serde(default)]
    pub subscriptions: Vec<DevSubscription>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevAccount {
    pub id: Uuid,
    pub balance: Decimal,
    /// Account age at startup.
    #[serde(default = "default_account_age_days")]
    pub age_days: u32,
}

fn default_account_age_days() -> u32 {
    365
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevSubscription {
    pub account_id: Uuid,
    pub url: Url,
    pub events: Vec<EventName>,
    pub secret: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_max_attempts() -> u32 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_minimal_file_uses_defaults() {
        let toml_str = r#"
[gateway]
base_url = "http://127.0.0.1:9090/"
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen.port(), 8080);
        assert_eq!(config.risk.to_policy(), RiskPolicy::default());
        assert_eq!(config.gateway.retry.max_attempts, 3);
        assert_eq!(config.webhooks.backoff_base, 5);
        assert!(config.dev.accounts.is_empty());
    }

    #[test]
    fn test_gateway_url_is_required() {
        assert!(toml::from_str::<FileConfig>("[server]\nlisten = \"127.0.0.1:3000\"\n").is_err());
    }

    #[test]
    fn test_full_config_parsing() {
        let toml_str = r#"
[server]
listen = "127.0.0.1:3000"

[gateway]
base_url = "https://settle.example.com/v1/"
api_key = "sk_test"
call_timeout_ms = 2500

[gateway.retry]
max_attempts = 4
jitter = false

[gateway.circuit_breaker]
failure_threshold = 3
cooldown_secs = 10

[risk]
block_above = 75
review_above = 50
max_factor_share = "0.5"

[risk.off_hours]
start_hour = 22
end_hour = 5
points = 15

[[risk.amount_tiers]]
above = "2000"
points = 25

[webhooks]
batch_size = 16
backoff_unit_secs = 30

[worker]
max_concurrency = 4

[[dev.accounts]]
id = "5f0c7f8e-1b7a-4a4e-9c55-0d2a1f0b6c11"
balance = "500.00"

[[dev.subscriptions]]
account_id = "5f0c7f8e-1b7a-4a4e-9c55-0d2a1f0b6c11"
url = "https://merchant.example.com/hooks"
events = ["payment.completed", "payment.refunded"]
secret = "whsec_dev"
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen.port(), 3000);
        assert_eq!(config.gateway.base_url.host_str(), Some("settle.example.com"));
        assert_eq!(config.gateway.api_key.as_deref(), Some("sk_test"));
        assert_eq!(config.gateway.retry.max_attempts, 4);
        assert!(!config.gateway.retry.jitter);
        assert_eq!(config.gateway.retry.multiplier, 2.0);
        assert_eq!(config.gateway.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.gateway.circuit_breaker.failure_window_secs, 60);

        let policy = config.risk.to_policy();
        assert_eq!(policy.block_above, 75);
        assert_eq!(policy.max_factor_share, dec!(0.5));
        assert_eq!(policy.off_hours.start_hour, 22);
        assert_eq!(policy.amount_tiers.len(), 1);
        assert_eq!(policy.amount_tiers[0].above, dec!(2000));
        // Tier tables that are not given keep their defaults.
        assert_eq!(policy.velocity_tiers, RiskPolicy::default().velocity_tiers);

        assert_eq!(config.webhooks.batch_size, 16);
        assert_eq!(config.webhooks.concurrency, 8);
        assert_eq!(config.worker.max_concurrency, 4);

        assert_eq!(config.dev.accounts[0].balance, dec!(500.00));
        assert_eq!(config.dev.accounts[0].age_days, 365);
        assert_eq!(
            config.dev.subscriptions[0].events,
            vec![EventName::PaymentCompleted, EventName::PaymentRefunded]
        );
        assert_eq!(config.dev.subscriptions[0].max_attempts, 5);
    }

    #[test]
    fn test_unknown_event_name_is_rejected() {
        let toml_str = r#"
[gateway]
base_url = "http://127.0.0.1:9090/"

[[dev.subscriptions]]
account_id = "5f0c7f8e-1b7a-4a4e-9c55-0d2a1f0b6c11"
url = "https://merchant.example.com/hooks"
events = ["payment.exploded"]
secret = "whsec_dev"
"#;
        assert!(toml::from_str::<FileConfig>(toml_str).is_err());
    }
}
