use crate::entities::payment::{Payment, PaymentStatus};
use compact_str::CompactString;
use payrail_sdk::objects::{EventName, WebhookPayload};
use rust_decimal::Decimal;
use time::OffsetDateTime;
use uuid::Uuid;

/// Emitted by the payment processor after a terminal-ish status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainEvent {
    pub name: EventName,
    pub payment_reference: String,
    pub account_id: Uuid,
    pub amount: Decimal,
    pub currency: CompactString,
    pub status: PaymentStatus,
    pub occurred_at: OffsetDateTime,
    pub correlation_id: Uuid,
}

impl DomainEvent {
    pub fn for_payment(name: EventName, payment: &Payment, correlation_id: Uuid) -> Self {
        Self {
            name,
            payment_reference: payment.reference.clone(),
            account_id: payment.account_id,
            amount: payment.amount,
            currency: payment.currency.clone(),
            status: payment.status,
            occurred_at: payment.updated_at,
            correlation_id,
        }
    }

    /// The wire payload delivered to subscribers.
    pub fn webhook_payload(&self) -> WebhookPayload {
        WebhookPayload {
            event: self.name,
            payment_reference: self.payment_reference.clone(),
            amount: self.amount.to_string(),
            currency: self.currency.clone(),
            status: self.status.into(),
            timestamp: self.occurred_at.unix_timestamp(),
        }
    }
}

/// Asks the payment worker to run `process` for a freshly created payment.
///
/// Carries only the reference; the worker re-reads the payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRequest {
    pub reference: String,
    pub correlation_id: Uuid,
}
