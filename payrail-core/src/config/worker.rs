use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Upper bound on concurrently running `process` calls.
    pub max_concurrency: usize,
    /// How long account snapshots stay cached.
    pub account_cache_ttl: Duration,
    /// A PROCESSING payment untouched this long at startup is failed.
    pub stale_processing_after: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 16,
            account_cache_ttl: Duration::from_secs(60),
            stale_processing_after: Duration::from_secs(15 * 60),
        }
    }
}
