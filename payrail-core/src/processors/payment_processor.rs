//! PaymentProcessor.
//!
//! Drives a payment through its lifecycle:
//! - `create_payment`: validate, insert PENDING, enqueue a `ProcessRequest`
//! - `process`: PENDING → PROCESSING → risk gate → funds check → gateway
//!   charge → ledger debit → COMPLETED, or FAILED with a typed reason
//! - `refund`: COMPLETED → REFUNDED after the gateway confirms
//! - `cancel`: PENDING → CANCELLED
//! - `recover`: requeue PENDING and fail stale PROCESSING payments at startup
//!
//! Every operation on one payment runs under that payment's lock. Once a
//! payment is PROCESSING the rest of `process` runs on its own task, so a
//! caller that gives up never leaves the payment stranded there.

use crate::config::{ConfigStore, RiskPolicy};
use crate::context::RequestContext;
use crate::entities::{AuditRecord, NewPayment, Payment, PaymentStatus, StatusHistoryEntry};
use crate::error::{LedgerError, PaymentError};
use crate::events::{DomainEvent, EventSenders, ProcessRequest};
use crate::gateway::{GatewayClient, GatewayUnavailable};
use crate::ports::{AccountDirectory, AuditSink, LedgerAdapter, PaymentRepository};
use crate::risk::{RiskAssessment, RiskDecision, RiskInput};
use crate::state_machine::PaymentStateMachine;
use crate::utils::KeyedLocks;
use payrail_sdk::objects::EventName;
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{Instrument, error, info, warn};

pub const RISK_REVIEW_TAG: &str = "risk_review";
pub const RISK_DEGRADED_TAG: &str = "risk_degraded";
/// History reason when settlement ended without a business decision.
pub const INTERNAL_ERROR_REASON: &str = "internal error";

/// Why `process` ended a payment without completing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    RiskRejected { score: u8 },
    InsufficientFunds,
    GatewayDeclined,
    GatewayUnavailable(GatewayUnavailable),
    /// The payment expired before processing and is now CANCELLED.
    Expired,
}

impl FailureReason {
    /// Reason recorded in the status history.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::RiskRejected { .. } => "risk rejected",
            FailureReason::InsufficientFunds => "insufficient funds",
            FailureReason::GatewayDeclined => "gateway declined",
            FailureReason::GatewayUnavailable(_) => "gateway unavailable",
            FailureReason::Expired => "expired",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a `process` call that reached a decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub payment: Payment,
    /// `None` when the payment completed.
    pub failure: Option<FailureReason>,
}

impl ProcessOutcome {
    pub fn is_completed(&self) -> bool {
        self.failure.is_none() && self.payment.status == PaymentStatus::Completed
    }

    /// Fold a business rejection into the error taxonomy.
    pub fn into_result(self) -> Result<Payment, PaymentError> {
        let Some(reason) = self.failure else {
            return Ok(self.payment);
        };
        Err(match reason {
            FailureReason::RiskRejected { score } => PaymentError::RiskRejected { score },
            FailureReason::InsufficientFunds => PaymentError::InsufficientFunds,
            FailureReason::GatewayDeclined => PaymentError::GatewayDeclined,
            FailureReason::GatewayUnavailable(e) => PaymentError::GatewayUnavailable(e),
            FailureReason::Expired => PaymentError::PaymentExpired(self.payment.reference),
        })
    }
}

/// What a `recover` sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// PENDING payments queued for processing again.
    pub requeued: usize,
    /// Stale PROCESSING payments moved to FAILED.
    pub failed: usize,
}

/// Collaborators of the processor.
pub struct PaymentProcessorDeps {
    pub payments: Arc<dyn PaymentRepository>,
    pub ledger: Arc<dyn LedgerAdapter>,
    pub accounts: Arc<dyn AccountDirectory>,
    pub audit: Arc<dyn AuditSink>,
    pub gateway: GatewayClient,
    pub risk_policy: ConfigStore<RiskPolicy>,
    pub events: EventSenders,
}

struct Inner {
    payments: Arc<dyn PaymentRepository>,
    ledger: Arc<dyn LedgerAdapter>,
    accounts: Arc<dyn AccountDirectory>,
    audit: Arc<dyn AuditSink>,
    gateway: GatewayClient,
    risk_policy: ConfigStore<RiskPolicy>,
    events: EventSenders,
    state_machine: PaymentStateMachine,
    locks: KeyedLocks,
}

#[derive(Clone)]
pub struct PaymentProcessor {
    inner: Arc<Inner>,
}

impl PaymentProcessor {
    pub fn new(deps: PaymentProcessorDeps) -> Self {
        let state_machine = PaymentStateMachine::new(deps.payments.clone());
        Self {
            inner: Arc::new(Inner {
                payments: deps.payments,
                ledger: deps.ledger,
                accounts: deps.accounts,
                audit: deps.audit,
                gateway: deps.gateway,
                risk_policy: deps.risk_policy,
                events: deps.events,
                state_machine,
                locks: KeyedLocks::new(),
            }),
        }
    }

    pub fn gateway(&self) -> &GatewayClient {
        &self.inner.gateway
    }

    // -- reads ---------------------------------------------------------------

    pub async fn payment(&self, reference: &str) -> Result<Payment, PaymentError> {
        self.inner
            .payments
            .get(reference)
            .await?
            .ok_or_else(|| PaymentError::PaymentNotFound(reference.to_owned()))
    }

    pub async fn history(&self, reference: &str) -> Result<Vec<StatusHistoryEntry>, PaymentError> {
        let history = self.inner.payments.history(reference).await?;
        if history.is_empty() {
            return Err(PaymentError::PaymentNotFound(reference.to_owned()));
        }
        Ok(history)
    }

    // -- create --------------------------------------------------------------

    pub async fn create_payment(
        &self,
        ctx: &RequestContext,
        new: NewPayment,
    ) -> Result<Payment, PaymentError> {
        self.create_inner(ctx, new).instrument(ctx.span().clone()).await
    }

    async fn create_inner(&self, ctx: &RequestContext, new: NewPayment) -> Result<Payment, PaymentError> {
        let now = OffsetDateTime::now_utc();
        validate_new_payment(&new, now)?;

        let account = self
            .inner
            .accounts
            .get_account(new.account_id)
            .await?
            .ok_or_else(|| PaymentError::Validation(format!("unknown account {}", new.account_id)))?;
        if !account.is_active() {
            return Err(PaymentError::Validation(format!(
                "account {} is not active",
                new.account_id
            )));
        }

        let payment = Payment {
            reference: Payment::new_reference(),
            account_id: new.account_id,
            amount: new.amount,
            currency: new.currency,
            status: PaymentStatus::Pending,
            risk_score: None,
            payment_method_id: new.payment_method_id,
            expires_at: new.expires_at,
            metadata: new.metadata,
            created_at: now,
            updated_at: now,
        };
        let created = PaymentStateMachine::creation_entry(&payment, ctx);
        self.inner.payments.insert(&payment, &created).await?;

        info!(
            payment = %payment.reference,
            account = %payment.account_id,
            amount = %payment.amount,
            currency = %payment.currency,
            "Payment created"
        );
        self.audit(
            ctx,
            "payment.created",
            &payment,
            json!({ "amount": payment.amount.to_string(), "currency": payment.currency.as_str() }),
        );

        let request = ProcessRequest {
            reference: payment.reference.clone(),
            correlation_id: ctx.correlation_id(),
        };
        if self.inner.events.process_request.send(request).await.is_err() {
            warn!(
                payment = %payment.reference,
                "Processing queue closed; payment stays PENDING until processed explicitly"
            );
        }

        Ok(payment)
    }

    // -- process -------------------------------------------------------------

    /// Run a PENDING payment to a decision.
    ///
    /// Business rejections come back as `Ok` with a [`FailureReason`]; the
    /// payment is FAILED (or CANCELLED when expired). Unexpected errors after
    /// PROCESSING first move the payment to FAILED, then propagate.
    pub async fn process(
        &self,
        ctx: &RequestContext,
        reference: &str,
    ) -> Result<ProcessOutcome, PaymentError> {
        self.process_inner(ctx, reference)
            .instrument(ctx.span().clone())
            .await
    }

    async fn process_inner(
        &self,
        ctx: &RequestContext,
        reference: &str,
    ) -> Result<ProcessOutcome, PaymentError> {
        let guard = self.inner.locks.lock(reference).await;
        let payment = self.payment(reference).await?;

        if payment.status != PaymentStatus::Pending {
            return Err(PaymentError::InvalidStateTransition {
                from: payment.status,
                to: PaymentStatus::Processing,
            });
        }

        if payment.is_expired(OffsetDateTime::now_utc()) {
            let reason = FailureReason::Expired;
            let cancelled = self
                .transition(ctx, &payment, PaymentStatus::Cancelled, reason.as_str())
                .await?;
            info!(payment = %reference, "Payment expired before processing");
            self.emit(ctx, EventName::PaymentCancelled, &cancelled).await;
            return Ok(ProcessOutcome {
                payment: cancelled,
                failure: Some(reason),
            });
        }

        let processing = self
            .transition(ctx, &payment, PaymentStatus::Processing, "processing started")
            .await?;

        let this = self.clone();
        let task_ctx = ctx.clone();
        let settlement = tokio::spawn(
            async move {
                let _guard = guard;
                this.settle(&task_ctx, processing).await
            }
            .instrument(ctx.span().clone()),
        );

        match settlement.await {
            Ok(result) => result,
            Err(join_error) => {
                error!(payment = %reference, error = %join_error, "Settlement task aborted");
                // The task's guard is gone; take the lock again for the cleanup.
                let _guard = self.inner.locks.lock(reference).await;
                self.fail_if_processing(ctx, reference).await;
                Err(PaymentError::Internal(format!(
                    "settlement task aborted: {join_error}"
                )))
            }
        }
    }

    async fn settle(&self, ctx: &RequestContext, payment: Payment) -> Result<ProcessOutcome, PaymentError> {
        match self.try_settle(ctx, &payment).await {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                error!(payment = %payment.reference, error = %error, "Settlement failed unexpectedly");
                self.fail_if_processing(ctx, &payment.reference).await;
                Err(error)
            }
        }
    }

    async fn try_settle(&self, ctx: &RequestContext, payment: &Payment) -> Result<ProcessOutcome, PaymentError> {
        let policy = self.inner.risk_policy.snapshot().await;
        let assessment = self.assess_risk(&policy, payment).await;

        let mut tags = HashMap::new();
        if assessment.decision == RiskDecision::Review {
            tags.insert(RISK_REVIEW_TAG.to_owned(), "true".to_owned());
        }
        if assessment.degraded {
            tags.insert(RISK_DEGRADED_TAG.to_owned(), "true".to_owned());
        }
        self.inner
            .payments
            .record_risk_score(&payment.reference, assessment.score, &tags)
            .await?;

        if assessment.decision == RiskDecision::Block {
            return self
                .reject(ctx, payment, FailureReason::RiskRejected { score: assessment.score })
                .await;
        }

        let balance = self.inner.ledger.get_balance(payment.account_id).await?;
        if balance < payment.amount {
            return self
                .reject(ctx, payment, FailureReason::InsufficientFunds)
                .await;
        }

        let approved = match self.inner.gateway.charge(payment).await {
            Ok(approved) => approved,
            Err(unavailable) => {
                return self
                    .reject(ctx, payment, FailureReason::GatewayUnavailable(unavailable))
                    .await;
            }
        };
        if !approved {
            return self.reject(ctx, payment, FailureReason::GatewayDeclined).await;
        }

        match self
            .inner
            .ledger
            .debit(payment.account_id, payment.amount, &payment.reference)
            .await
        {
            Ok(balance) => {
                info!(payment = %payment.reference, balance = %balance, "Account debited");
            }
            Err(LedgerError::InsufficientFunds { .. }) => {
                warn!(
                    payment = %payment.reference,
                    "Balance no longer covers an approved charge, refunding it"
                );
                self.compensate_charge(payment).await;
                return self
                    .reject(ctx, payment, FailureReason::InsufficientFunds)
                    .await;
            }
            Err(e) => {
                self.compensate_charge(payment).await;
                return Err(e.into());
            }
        }

        match self
            .transition(ctx, payment, PaymentStatus::Completed, "gateway approved")
            .await
        {
            Ok(completed) => {
                info!(
                    payment = %completed.reference,
                    risk_score = assessment.score,
                    "Payment completed"
                );
                self.emit(ctx, EventName::PaymentCompleted, &completed).await;
                Ok(ProcessOutcome {
                    payment: completed,
                    failure: None,
                })
            }
            Err(e) => {
                self.reverse_debit(payment).await;
                self.compensate_charge(payment).await;
                Err(e)
            }
        }
    }

    async fn assess_risk(&self, policy: &RiskPolicy, payment: &Payment) -> RiskAssessment {
        let account = match self.inner.accounts.get_account(payment.account_id).await {
            Ok(Some(account)) => account,
            Ok(None) => {
                warn!(payment = %payment.reference, "Account vanished, using fallback risk score");
                return policy.fallback();
            }
            Err(e) => {
                warn!(payment = %payment.reference, error = %e, "Account lookup failed, using fallback risk score");
                return policy.fallback();
            }
        };

        let now = OffsetDateTime::now_utc();
        let recent_payments = match self
            .inner
            .payments
            .count_created_since(payment.account_id, now - policy.velocity_window)
            .await
        {
            Ok(count) => count,
            Err(e) => {
                warn!(payment = %payment.reference, error = %e, "Velocity lookup failed, using fallback risk score");
                return policy.fallback();
            }
        };

        let input = RiskInput {
            amount: payment.amount,
            account_age: now - account.created_at,
            has_payment_method: payment.payment_method_id.is_some(),
            hour_of_day: now.hour(),
            recent_payments,
        };
        let assessment = policy.assess(&input);
        if assessment.degraded {
            warn!(
                payment = %payment.reference,
                score = assessment.score,
                "Risk scoring degraded, using fallback score"
            );
        }
        assessment
    }

    /// End a PROCESSING payment as FAILED for a business reason.
    async fn reject(
        &self,
        ctx: &RequestContext,
        payment: &Payment,
        reason: FailureReason,
    ) -> Result<ProcessOutcome, PaymentError> {
        let failed = self
            .transition(ctx, payment, PaymentStatus::Failed, reason.as_str())
            .await?;
        info!(payment = %payment.reference, reason = %reason, "Payment failed");
        self.emit(ctx, EventName::PaymentFailed, &failed).await;
        Ok(ProcessOutcome {
            payment: failed,
            failure: Some(reason),
        })
    }

    /// Last resort after an unexpected error: never leave PROCESSING behind.
    async fn fail_if_processing(&self, ctx: &RequestContext, reference: &str) -> bool {
        let current = match self.inner.payments.get(reference).await {
            Ok(Some(current)) if current.status == PaymentStatus::Processing => current,
            Ok(_) => return false,
            Err(e) => {
                error!(payment = %reference, error = %e, "Cannot load payment to fail it; it may remain PROCESSING");
                return false;
            }
        };
        match self
            .transition(ctx, &current, PaymentStatus::Failed, INTERNAL_ERROR_REASON)
            .await
        {
            Ok(failed) => {
                self.emit(ctx, EventName::PaymentFailed, &failed).await;
                true
            }
            Err(e) => {
                error!(payment = %reference, error = %e, "Cannot fail payment; it may remain PROCESSING");
                false
            }
        }
    }

    async fn compensate_charge(&self, payment: &Payment) {
        match self.inner.gateway.refund(payment, payment.amount).await {
            Ok(true) => info!(payment = %payment.reference, "Charge refunded"),
            Ok(false) => error!(
                payment = %payment.reference,
                "Gateway declined compensating refund; manual reconciliation required"
            ),
            Err(e) => error!(
                payment = %payment.reference,
                error = %e,
                "Compensating refund failed; manual reconciliation required"
            ),
        }
    }

    async fn reverse_debit(&self, payment: &Payment) {
        if let Err(e) = self
            .inner
            .ledger
            .credit(payment.account_id, payment.amount, &payment.reference)
            .await
        {
            error!(
                payment = %payment.reference,
                error = %e,
                "Reversing debit failed; manual reconciliation required"
            );
        }
    }

    // -- refund --------------------------------------------------------------

    /// Refund a COMPLETED payment. On `RefundNotApplied` it stays COMPLETED.
    pub async fn refund(
        &self,
        ctx: &RequestContext,
        reference: &str,
        amount: Decimal,
        reason: &str,
    ) -> Result<Payment, PaymentError> {
        self.refund_inner(ctx, reference, amount, reason)
            .instrument(ctx.span().clone())
            .await
    }

    async fn refund_inner(
        &self,
        ctx: &RequestContext,
        reference: &str,
        amount: Decimal,
        reason: &str,
    ) -> Result<Payment, PaymentError> {
        if amount <= Decimal::ZERO {
            return Err(PaymentError::Validation("refund amount must be positive".into()));
        }
        let reason = non_empty_reason(reason)?;

        let guard = self.inner.locks.lock(reference).await;
        let payment = self.payment(reference).await?;
        PaymentStateMachine::check(payment.status, PaymentStatus::Refunded)?;
        if amount > payment.amount {
            return Err(PaymentError::Validation(format!(
                "refund amount {amount} exceeds payment amount {}",
                payment.amount
            )));
        }

        let this = self.clone();
        let task_ctx = ctx.clone();
        let task = tokio::spawn(
            async move {
                let _guard = guard;
                this.settle_refund(&task_ctx, payment, amount, &reason).await
            }
            .instrument(ctx.span().clone()),
        );
        task.await
            .map_err(|e| PaymentError::Internal(format!("refund task aborted: {e}")))?
    }

    async fn settle_refund(
        &self,
        ctx: &RequestContext,
        payment: Payment,
        amount: Decimal,
        reason: &str,
    ) -> Result<Payment, PaymentError> {
        match self.inner.gateway.refund(&payment, amount).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(payment = %payment.reference, "Gateway declined refund");
                return Err(PaymentError::RefundNotApplied("declined by gateway".into()));
            }
            Err(e) => {
                warn!(payment = %payment.reference, error = %e, "Refund not applied");
                return Err(PaymentError::RefundNotApplied(e.to_string()));
            }
        }

        if let Err(e) = self
            .inner
            .ledger
            .credit(payment.account_id, amount, &payment.reference)
            .await
        {
            error!(
                payment = %payment.reference,
                error = %e,
                "Gateway refunded but ledger credit failed; manual reconciliation required"
            );
            return Err(e.into());
        }

        match self
            .transition(ctx, &payment, PaymentStatus::Refunded, reason)
            .await
        {
            Ok(refunded) => {
                info!(payment = %refunded.reference, amount = %amount, "Payment refunded");
                self.emit(ctx, EventName::PaymentRefunded, &refunded).await;
                Ok(refunded)
            }
            Err(e) => {
                if let Err(reverse) = self
                    .inner
                    .ledger
                    .debit(payment.account_id, amount, &payment.reference)
                    .await
                {
                    error!(
                        payment = %payment.reference,
                        error = %reverse,
                        "Reversing refund credit failed; manual reconciliation required"
                    );
                }
                Err(e)
            }
        }
    }

    // -- recovery ------------------------------------------------------------

    /// Pick up the work a previous run left behind.
    ///
    /// The processing queue lives in memory, so PENDING payments are queued
    /// again. A PROCESSING payment untouched for `stale_after` lost its
    /// settlement task with the process that ran it and is moved to FAILED.
    /// Run this once at startup, after the worker is listening.
    pub async fn recover(
        &self,
        ctx: &RequestContext,
        stale_after: Duration,
    ) -> Result<RecoveryReport, PaymentError> {
        async {
            let now = OffsetDateTime::now_utc();
            let cutoff = now - stale_after;
            let mut report = RecoveryReport::default();

            let stale = self
                .inner
                .payments
                .list_by_status(PaymentStatus::Processing, cutoff)
                .await?;
            for payment in stale {
                let _guard = self.inner.locks.lock(&payment.reference).await;
                // Re-read under the lock; a live settlement may have moved on.
                match self.inner.payments.get(&payment.reference).await? {
                    Some(current) if current.updated_at <= cutoff => {}
                    _ => continue,
                }
                warn!(
                    payment = %payment.reference,
                    since = %payment.updated_at,
                    "Payment stuck in PROCESSING, failing it"
                );
                if self.fail_if_processing(ctx, &payment.reference).await {
                    report.failed += 1;
                }
            }

            let pending = self
                .inner
                .payments
                .list_by_status(PaymentStatus::Pending, now)
                .await?;
            for payment in pending {
                let request = ProcessRequest {
                    reference: payment.reference.clone(),
                    correlation_id: ctx.correlation_id(),
                };
                if self.inner.events.process_request.send(request).await.is_err() {
                    warn!("Processing queue closed, stopping recovery");
                    break;
                }
                report.requeued += 1;
            }

            info!(
                requeued = report.requeued,
                failed = report.failed,
                "Recovery sweep finished"
            );
            Ok(report)
        }
        .instrument(ctx.span().clone())
        .await
    }

    // -- cancel --------------------------------------------------------------

    pub async fn cancel(
        &self,
        ctx: &RequestContext,
        reference: &str,
        reason: &str,
    ) -> Result<Payment, PaymentError> {
        async {
            let reason = non_empty_reason(reason)?;
            let _guard = self.inner.locks.lock(reference).await;
            let payment = self.payment(reference).await?;
            let cancelled = self
                .transition(ctx, &payment, PaymentStatus::Cancelled, &reason)
                .await?;
            info!(payment = %reference, reason = %reason, "Payment cancelled");
            self.emit(ctx, EventName::PaymentCancelled, &cancelled).await;
            Ok(cancelled)
        }
        .instrument(ctx.span().clone())
        .await
    }

    // -- helpers -------------------------------------------------------------

    async fn transition(
        &self,
        ctx: &RequestContext,
        payment: &Payment,
        target: PaymentStatus,
        reason: &str,
    ) -> Result<Payment, PaymentError> {
        let updated = self
            .inner
            .state_machine
            .transition(ctx, payment, target, reason)
            .await?;
        self.audit(
            ctx,
            "payment.status_changed",
            &updated,
            json!({ "from": payment.status.as_str(), "to": target.as_str(), "reason": reason }),
        );
        Ok(updated)
    }

    async fn emit(&self, ctx: &RequestContext, name: EventName, payment: &Payment) {
        let event = DomainEvent::for_payment(name, payment, ctx.correlation_id());
        if self.inner.events.domain_event.send(event).await.is_err() {
            error!(payment = %payment.reference, event = %name, "Domain event dropped: dispatcher is gone");
        }
    }

    /// Fire-and-forget; a failing sink never affects the payment.
    fn audit(&self, ctx: &RequestContext, action: &'static str, payment: &Payment, details: serde_json::Value) {
        let record = AuditRecord {
            action,
            entity_type: "payment",
            entity_id: payment.reference.clone(),
            details,
            actor: ctx.actor().to_owned(),
            correlation_id: ctx.correlation_id(),
            recorded_at: OffsetDateTime::now_utc(),
        };
        let sink = self.inner.audit.clone();
        tokio::spawn(
            async move {
                if let Err(e) = sink.record(&record).await {
                    warn!(action = record.action, entity = %record.entity_id, error = %e, "Audit record dropped");
                }
            }
            .instrument(ctx.span().clone()),
        );
    }
}

fn validate_new_payment(new: &NewPayment, now: OffsetDateTime) -> Result<(), PaymentError> {
    if new.amount <= Decimal::ZERO {
        return Err(PaymentError::Validation("amount must be positive".into()));
    }
    if new.currency.len() != 3 || !new.currency.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(PaymentError::Validation(format!(
            "currency must be three upper-case letters, got {:?}",
            new.currency
        )));
    }
    if new.expires_at.is_some_and(|at| at <= now) {
        return Err(PaymentError::Validation("expiry must be in the future".into()));
    }
    Ok(())
}

fn non_empty_reason(reason: &str) -> Result<String, PaymentError> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(PaymentError::Validation("reason must not be empty".into()));
    }
    Ok(reason.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use time::macros::datetime;
    use uuid::Uuid;

    fn new_payment() -> NewPayment {
        NewPayment {
            account_id: Uuid::new_v4(),
            amount: dec!(10.00),
            currency: "USD".into(),
            payment_method_id: None,
            expires_at: None,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_validation_rejects_bad_input() {
        let now = datetime!(2024-01-01 0:00 UTC);
        assert!(validate_new_payment(&new_payment(), now).is_ok());

        for bad in [
            NewPayment { amount: dec!(0), ..new_payment() },
            NewPayment { amount: dec!(-1), ..new_payment() },
            NewPayment { currency: "usd".into(), ..new_payment() },
            NewPayment { currency: "USDT".into(), ..new_payment() },
            NewPayment { expires_at: Some(now), ..new_payment() },
        ] {
            assert!(matches!(
                validate_new_payment(&bad, now),
                Err(PaymentError::Validation(_))
            ));
        }
    }

    #[test]
    fn test_failure_reasons_map_to_history_text() {
        assert_eq!(FailureReason::RiskRejected { score: 90 }.as_str(), "risk rejected");
        assert_eq!(FailureReason::InsufficientFunds.to_string(), "insufficient funds");
        assert_eq!(
            FailureReason::GatewayUnavailable(GatewayUnavailable::CircuitOpen).as_str(),
            "gateway unavailable"
        );
    }

    #[test]
    fn test_expired_outcome_names_the_payment() {
        let now = datetime!(2024-01-01 0:00 UTC);
        let payment = Payment {
            reference: "pay_expired".to_owned(),
            account_id: Uuid::new_v4(),
            amount: dec!(10.00),
            currency: "USD".into(),
            status: PaymentStatus::Cancelled,
            risk_score: None,
            payment_method_id: None,
            expires_at: Some(now),
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        };
        let outcome = ProcessOutcome {
            payment,
            failure: Some(FailureReason::Expired),
        };
        assert!(matches!(
            outcome.into_result(),
            Err(PaymentError::PaymentExpired(reference)) if reference == "pay_expired"
        ));
    }

    #[test]
    fn test_blank_reason_is_rejected() {
        assert!(non_empty_reason("  ").is_err());
        assert_eq!(non_empty_reason(" duplicate ").unwrap(), "duplicate");
    }
}
