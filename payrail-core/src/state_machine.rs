//! The single choke point for payment status changes.

use crate::context::RequestContext;
use crate::entities::payment::{Payment, PaymentStatus, StatusChange, StatusHistoryEntry};
use crate::error::PaymentError;
use crate::ports::PaymentRepository;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::debug;

pub const CREATED_REASON: &str = "payment created";

#[derive(Clone)]
pub struct PaymentStateMachine {
    repo: Arc<dyn PaymentRepository>,
}

impl PaymentStateMachine {
    pub fn new(repo: Arc<dyn PaymentRepository>) -> Self {
        Self { repo }
    }

    pub fn check(from: PaymentStatus, to: PaymentStatus) -> Result<(), PaymentError> {
        if from.can_transition_to(to) {
            Ok(())
        } else {
            Err(PaymentError::InvalidStateTransition { from, to })
        }
    }

    /// The first history entry of every payment (null from-status).
    pub fn creation_entry(payment: &Payment, ctx: &RequestContext) -> StatusHistoryEntry {
        StatusHistoryEntry {
            payment_reference: payment.reference.clone(),
            sequence: 1,
            from_status: None,
            to_status: PaymentStatus::Pending,
            reason: CREATED_REASON.to_string(),
            actor: ctx.actor().to_string(),
            correlation_id: ctx.correlation_id(),
            created_at: payment.created_at,
        }
    }

    /// Move `payment` to `target`, appending a history entry.
    ///
    /// The edge is validated against the status the caller observed and
    /// applied as compare-and-set on it, so a writer that got there first
    /// turns this into `InvalidStateTransition` carrying the current status.
    pub async fn transition(
        &self,
        ctx: &RequestContext,
        payment: &Payment,
        target: PaymentStatus,
        reason: &str,
    ) -> Result<Payment, PaymentError> {
        Self::check(payment.status, target)?;

        let change = StatusChange {
            reference: payment.reference.clone(),
            from: payment.status,
            to: target,
            reason: reason.to_string(),
            actor: ctx.actor().to_string(),
            correlation_id: ctx.correlation_id(),
            at: OffsetDateTime::now_utc(),
        };

        match self.repo.apply_transition(&change).await? {
            Some(updated) => {
                debug!(
                    payment = %updated.reference,
                    from = %change.from,
                    to = %change.to,
                    reason,
                    "Payment status changed"
                );
                Ok(updated)
            }
            None => match self.repo.get(&payment.reference).await? {
                Some(current) => Err(PaymentError::InvalidStateTransition {
                    from: current.status,
                    to: target,
                }),
                None => Err(PaymentError::PaymentNotFound(payment.reference.clone())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryPaymentRepository;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use uuid::Uuid;

    async fn seeded() -> (PaymentStateMachine, Arc<InMemoryPaymentRepository>, Payment, RequestContext) {
        let repo = Arc::new(InMemoryPaymentRepository::default());
        let ctx = RequestContext::new("test");
        let now = OffsetDateTime::now_utc();
        let payment = Payment {
            reference: Payment::new_reference(),
            account_id: Uuid::new_v4(),
            amount: dec!(10.00),
            currency: "USD".into(),
            status: PaymentStatus::Pending,
            risk_score: None,
            payment_method_id: None,
            expires_at: None,
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        };
        repo.insert(&payment, &PaymentStateMachine::creation_entry(&payment, &ctx))
            .await
            .unwrap();
        (PaymentStateMachine::new(repo.clone()), repo, payment, ctx)
    }

    #[tokio::test]
    async fn test_transition_appends_history() {
        let (machine, repo, payment, ctx) = seeded().await;

        let processing = machine
            .transition(&ctx, &payment, PaymentStatus::Processing, "processing started")
            .await
            .unwrap();
        assert_eq!(processing.status, PaymentStatus::Processing);

        let history = repo.history(&payment.reference).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].from_status, None);
        assert_eq!(history[1].sequence, 2);
        assert_eq!(history[1].from_status, Some(PaymentStatus::Pending));
        assert_eq!(history[1].to_status, PaymentStatus::Processing);
        assert_eq!(history[1].correlation_id, ctx.correlation_id());
    }

    #[tokio::test]
    async fn test_invalid_edge_leaves_payment_untouched() {
        let (machine, repo, payment, ctx) = seeded().await;

        let err = machine
            .transition(&ctx, &payment, PaymentStatus::Completed, "skip ahead")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PaymentError::InvalidStateTransition {
                from: PaymentStatus::Pending,
                to: PaymentStatus::Completed
            }
        ));
        assert_eq!(repo.history(&payment.reference).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_snapshot_loses_the_race() {
        let (machine, _repo, payment, ctx) = seeded().await;
        machine
            .transition(&ctx, &payment, PaymentStatus::Cancelled, "customer request")
            .await
            .unwrap();

        // `payment` still says PENDING.
        let err = machine
            .transition(&ctx, &payment, PaymentStatus::Processing, "processing started")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PaymentError::InvalidStateTransition {
                from: PaymentStatus::Cancelled,
                to: PaymentStatus::Processing
            }
        ));
    }
}
