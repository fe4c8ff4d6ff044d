use crate::gateway::{CircuitBreakerConfig, RetryPolicy};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    /// Base URL; `charges` and `refunds` are resolved against it.
    pub base_url: Url,
    pub api_key: Option<String>,
    /// Hard bound on a single call, independent of retry backoff.
    pub call_timeout: Duration,
    pub retry: RetryPolicy,
    pub circuit_breaker: CircuitBreakerConfig,
}
