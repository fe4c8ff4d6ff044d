use super::{
    CircuitBreaker, GatewayCallError, GatewayUnavailable, RetryPolicy, SettlementGateway,
};
use crate::entities::payment::Payment;
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayOperation {
    Charge,
    Refund,
}

impl GatewayOperation {
    fn as_str(self) -> &'static str {
        match self {
            GatewayOperation::Charge => "charge",
            GatewayOperation::Refund => "refund",
        }
    }
}

/// Retry, breaker and timeout discipline around the settlement gateway.
#[derive(Clone)]
pub struct GatewayClient {
    gateway: Arc<dyn SettlementGateway>,
    retry: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
    call_timeout: Duration,
}

impl GatewayClient {
    pub fn new(
        gateway: Arc<dyn SettlementGateway>,
        retry: RetryPolicy,
        breaker: Arc<CircuitBreaker>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            retry,
            breaker,
            call_timeout,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub async fn charge(&self, payment: &Payment) -> Result<bool, GatewayUnavailable> {
        self.call(GatewayOperation::Charge, &payment.reference, || {
            self.gateway.charge(payment)
        })
        .await
    }

    pub async fn refund(&self, payment: &Payment, amount: Decimal) -> Result<bool, GatewayUnavailable> {
        self.call(GatewayOperation::Refund, &payment.reference, || {
            self.gateway.refund(payment, amount)
        })
        .await
    }

    async fn call<F, Fut>(
        &self,
        operation: GatewayOperation,
        reference: &str,
        f: F,
    ) -> Result<bool, GatewayUnavailable>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<bool, GatewayCallError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let Ok(permit) = self.breaker.try_acquire() else {
                warn!(
                    payment = %reference,
                    operation = operation.as_str(),
                    attempt,
                    "Gateway call rejected by open circuit breaker"
                );
                return Err(GatewayUnavailable::CircuitOpen);
            };

            let result = match tokio::time::timeout(self.call_timeout, f()).await {
                Ok(result) => result,
                Err(_) => Err(GatewayCallError::Timeout(self.call_timeout)),
            };

            match result {
                Ok(answer) => {
                    permit.succeeded();
                    debug!(
                        payment = %reference,
                        operation = operation.as_str(),
                        attempt,
                        approved = answer,
                        "Gateway answered"
                    );
                    return Ok(answer);
                }
                Err(error) => {
                    permit.failed();
                    if !self.retry.should_retry(attempt) {
                        warn!(
                            payment = %reference,
                            operation = operation.as_str(),
                            attempt,
                            error = %error,
                            "Gateway call failed, giving up"
                        );
                        return Err(GatewayUnavailable::RetriesExhausted {
                            attempts: attempt,
                            last_error: error,
                        });
                    }
                    let backoff = self.retry.backoff_after(attempt);
                    warn!(
                        payment = %reference,
                        operation = operation.as_str(),
                        attempt,
                        error = %error,
                        backoff = ?backoff,
                        "Gateway call failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}
