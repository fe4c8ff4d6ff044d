//! Circuit breaker guarding the settlement gateway.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls fail fast until the cooldown elapses.
    Open,
    /// One trial call is in flight or allowed.
    HalfOpen,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Failures further apart than this do not accumulate.
    pub failure_window: Duration,
    /// How long the circuit stays open before admitting a trial call.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("circuit breaker is open")]
pub struct CircuitOpen;

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    streak_started_at: Option<Instant>,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
    total_failures: AtomicU64,
    total_rejections: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                streak_started_at: None,
                opened_at: None,
                trial_in_flight: false,
            }),
            total_failures: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state, after applying an elapsed cooldown.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.promote_if_cooled_down(&mut inner, Instant::now());
        inner.state
    }

    /// Consecutive failures of the current streak.
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// Every failure ever recorded; never reset.
    pub fn total_failures(&self) -> u64 {
        self.total_failures.load(Ordering::Relaxed)
    }

    /// Calls refused while open (or while a half-open trial was running).
    pub fn total_rejections(&self) -> u64 {
        self.total_rejections.load(Ordering::Relaxed)
    }

    /// Ask to make one call.
    ///
    /// The returned permit must be settled with [`CallPermit::succeeded`] or
    /// [`CallPermit::failed`]; dropping it unsettled counts as a failure.
    pub fn try_acquire(&self) -> Result<CallPermit<'_>, CircuitOpen> {
        let mut inner = self.inner.lock();
        self.promote_if_cooled_down(&mut inner, Instant::now());
        match inner.state {
            CircuitState::Closed => Ok(CallPermit::new(self, false)),
            CircuitState::HalfOpen if !inner.trial_in_flight => {
                inner.trial_in_flight = true;
                Ok(CallPermit::new(self, true))
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                self.total_rejections.fetch_add(1, Ordering::Relaxed);
                Err(CircuitOpen)
            }
        }
    }

    fn promote_if_cooled_down(&self, inner: &mut BreakerState, now: Instant) {
        if inner.state == CircuitState::Open
            && inner
                .opened_at
                .is_some_and(|at| now.duration_since(at) >= self.config.cooldown)
        {
            info!("Circuit breaker half-open, admitting one trial call");
            inner.state = CircuitState::HalfOpen;
            inner.trial_in_flight = false;
        }
    }

    fn record_success(&self, trial: bool) {
        let mut inner = self.inner.lock();
        if trial {
            info!("Gateway trial call succeeded, circuit breaker closing");
            inner.state = CircuitState::Closed;
            inner.opened_at = None;
            inner.trial_in_flight = false;
        }
        inner.consecutive_failures = 0;
        inner.streak_started_at = None;
    }

    fn record_failure(&self, trial: bool) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let mut inner = self.inner.lock();

        if trial {
            warn!(cooldown = ?self.config.cooldown, "Gateway trial call failed, circuit breaker re-opening");
            inner.state = CircuitState::Open;
            inner.opened_at = Some(now);
            inner.trial_in_flight = false;
            inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
            return;
        }

        let within_window = inner
            .streak_started_at
            .is_some_and(|start| now.duration_since(start) <= self.config.failure_window);
        if within_window {
            inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        } else {
            inner.consecutive_failures = 1;
            inner.streak_started_at = Some(now);
        }

        if inner.state == CircuitState::Closed
            && inner.consecutive_failures >= self.config.failure_threshold
        {
            warn!(
                failures = inner.consecutive_failures,
                cooldown = ?self.config.cooldown,
                "Circuit breaker opening"
            );
            inner.state = CircuitState::Open;
            inner.opened_at = Some(now);
        }
    }
}

/// Admission for a single gateway call.
#[must_use = "settle the permit with succeeded() or failed()"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl<'a> CallPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            settled: false,
        }
    }

    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn succeeded(mut self) {
        self.settled = true;
        self.breaker.record_success(self.trial);
    }

    pub fn failed(mut self) {
        self.settled = true;
        self.breaker.record_failure(self.trial);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.record_failure(self.trial);
        }
    }
}
