//! Conversion of the file sections into the engine's runtime configs.

use crate::config::file;
use payrail_core::config::{
    DispatcherConfig, GatewayConfig, ServerConfig, WebhookBackoff, WorkerConfig,
};
use payrail_core::gateway::{CircuitBreakerConfig, RetryPolicy};
use std::time::Duration;

impl file::ServerConfig {
    pub fn to_runtime(&self) -> ServerConfig {
        ServerConfig {
            listen: self.listen,
        }
    }
}

impl file::GatewayConfig {
    pub fn to_runtime(&self) -> GatewayConfig {
        GatewayConfig {
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            call_timeout: Duration::from_millis(self.call_timeout_ms),
            retry: RetryPolicy {
                max_attempts: self.retry.max_attempts,
                initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
                max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
                multiplier: self.retry.multiplier,
                jitter: self.retry.jitter,
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: self.circuit_breaker.failure_threshold,
                failure_window: Duration::from_secs(self.circuit_breaker.failure_window_secs),
                cooldown: Duration::from_secs(self.circuit_breaker.cooldown_secs),
            },
        }
    }
}

impl file::WebhookConfig {
    pub fn to_runtime(&self) -> DispatcherConfig {
        DispatcherConfig {
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            batch_size: self.batch_size,
            concurrency: self.concurrency,
            claim_lease: Duration::from_secs(self.claim_lease_secs),
            backoff: WebhookBackoff {
                unit: Duration::from_secs(self.backoff_unit_secs),
                base: self.backoff_base,
                max: Duration::from_secs(self.backoff_max_secs),
            },
        }
    }
}

impl file::WorkerSection {
    pub fn to_runtime(&self) -> WorkerConfig {
        WorkerConfig {
            max_concurrency: self.max_concurrency,
            account_cache_ttl: Duration::from_secs(self.account_cache_ttl_secs),
            stale_processing_after: Duration::from_secs(self.stale_processing_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::file::FileConfig;
    use payrail_core::config::{DispatcherConfig, WorkerConfig};
    use payrail_core::gateway::{CircuitBreakerConfig, RetryPolicy};
    use std::time::Duration;

    #[test]
    fn test_defaults_round_trip_into_engine_defaults() {
        let config: FileConfig =
            toml::from_str("[gateway]\nbase_url = \"http://127.0.0.1:9090/\"\n").unwrap();

        let gateway = config.gateway.to_runtime();
        assert_eq!(gateway.retry, RetryPolicy::default());
        assert_eq!(gateway.circuit_breaker, CircuitBreakerConfig::default());
        assert_eq!(gateway.call_timeout, Duration::from_secs(5));
        assert_eq!(config.webhooks.to_runtime(), DispatcherConfig::default());
        assert_eq!(config.worker.to_runtime(), WorkerConfig::default());
    }

    #[test]
    fn test_durations_use_their_units() {
        let config: FileConfig = toml::from_str(
            r#"
[gateway]
base_url = "http://127.0.0.1:9090/"
call_timeout_ms = 750

[gateway.retry]
initial_backoff_ms = 50

[webhooks]
poll_interval_ms = 250
backoff_unit_secs = 2

[worker]
stale_processing_secs = 120
"#,
        )
        .unwrap();

        let gateway = config.gateway.to_runtime();
        assert_eq!(gateway.call_timeout, Duration::from_millis(750));
        assert_eq!(gateway.retry.initial_backoff, Duration::from_millis(50));

        let dispatcher = config.webhooks.to_runtime();
        assert_eq!(dispatcher.poll_interval, Duration::from_millis(250));
        assert_eq!(dispatcher.backoff.unit, Duration::from_secs(2));
        assert_eq!(dispatcher.backoff.delay_after(2), Duration::from_secs(10));

        let worker = config.worker.to_runtime();
        assert_eq!(worker.stale_processing_after, Duration::from_secs(120));
    }
}
