use std::time::Duration;

/// Schedule between webhook tries: `unit × base^(attempt-1)`, capped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookBackoff {
    pub unit: Duration,
    pub base: u32,
    pub max: Duration,
}

impl Default for WebhookBackoff {
    fn default() -> Self {
        Self {
            unit: Duration::from_secs(60),
            base: 5,
            max: Duration::from_secs(6 * 3600),
        }
    }
}

impl WebhookBackoff {
    /// Delay before the next try after `attempt` (1-based) failed tries.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        self.base
            .checked_pow(exponent)
            .and_then(|factor| self.unit.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Timeout of a single webhook POST.
    pub request_timeout: Duration,
    /// How often due retries are picked up when no events arrive.
    pub poll_interval: Duration,
    /// Attempts claimed per batch.
    pub batch_size: usize,
    /// Concurrent POSTs within a batch.
    pub concurrency: usize,
    /// How long a claimed attempt stays invisible to other claims.
    pub claim_lease: Duration,
    pub backoff: WebhookBackoff,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(5),
            batch_size: 64,
            concurrency: 8,
            claim_lease: Duration::from_secs(120),
            backoff: WebhookBackoff::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule_is_1_5_25_minutes() {
        let backoff = WebhookBackoff::default();
        assert_eq!(backoff.delay_after(1), Duration::from_secs(60));
        assert_eq!(backoff.delay_after(2), Duration::from_secs(300));
        assert_eq!(backoff.delay_after(3), Duration::from_secs(1500));
    }

    #[test]
    fn test_schedule_is_capped() {
        let backoff = WebhookBackoff {
            max: Duration::from_secs(600),
            ..WebhookBackoff::default()
        };
        assert_eq!(backoff.delay_after(3), Duration::from_secs(600));
        assert_eq!(backoff.delay_after(u32::MAX), Duration::from_secs(600));
    }
}
