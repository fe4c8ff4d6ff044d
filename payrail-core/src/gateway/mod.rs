//! Settlement gateway access.
//!
//! [`SettlementGateway`] is the raw transport to the one external gateway;
//! [`GatewayClient`] wraps it with the retry policy, the circuit breaker and
//! a hard per-call timeout. The engine only ever talks to the client.

pub mod circuit_breaker;
pub mod client;
pub mod http;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitOpen, CircuitState};
pub use client::{GatewayClient, GatewayOperation};
pub use http::HttpSettlementGateway;
pub use retry::RetryPolicy;

use crate::entities::payment::Payment;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;

/// A single failed call. Every variant is transient; definitive answers are
/// `Ok(true)` / `Ok(false)`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayCallError {
    #[error("gateway call timed out after {0:?}")]
    Timeout(Duration),

    #[error("gateway transport error: {0}")]
    Transport(String),

    #[error("gateway responded with status {0}")]
    Status(u16),

    #[error("malformed gateway response: {0}")]
    Malformed(String),
}

/// The gateway could not give a definitive answer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayUnavailable {
    #[error("gateway unavailable: circuit breaker is open")]
    CircuitOpen,

    #[error("gateway unavailable after {attempts} attempt(s): {last_error}")]
    RetriesExhausted {
        attempts: u32,
        last_error: GatewayCallError,
    },
}

#[async_trait]
pub trait SettlementGateway: Send + Sync {
    /// `Ok(true)` when the charge is approved, `Ok(false)` when declined.
    async fn charge(&self, payment: &Payment) -> Result<bool, GatewayCallError>;

    /// `Ok(true)` when the refund is confirmed, `Ok(false)` when declined.
    async fn refund(&self, payment: &Payment, amount: Decimal) -> Result<bool, GatewayCallError>;
}
