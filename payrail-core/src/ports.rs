//! Interfaces the engine consumes.
//!
//! Postgres implementations live in `store::postgres`, in-memory ones in
//! `store::memory`.

use crate::entities::{
    AccountSnapshot, AuditRecord, DeliveryOutcome, Payment, PaymentStatus, StatusChange,
    StatusHistoryEntry, WebhookDeliveryAttempt, WebhookDeliveryTry, WebhookSubscription,
};
use crate::error::{LedgerError, StoreError};
use async_trait::async_trait;
use payrail_sdk::objects::EventName;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Store a new payment together with its creation history entry.
    async fn insert(&self, payment: &Payment, created: &StatusHistoryEntry) -> Result<(), StoreError>;

    async fn get(&self, reference: &str) -> Result<Option<Payment>, StoreError>;

    /// Compare-and-set the status on `change.from` and append the history
    /// entry in the same unit of work. `Ok(None)` when the payment is not in
    /// `change.from` (or does not exist); nothing is written then.
    async fn apply_transition(&self, change: &StatusChange) -> Result<Option<Payment>, StoreError>;

    /// Persist the risk score and merge `tags` into the payment metadata.
    async fn record_risk_score(
        &self,
        reference: &str,
        score: u8,
        tags: &HashMap<String, String>,
    ) -> Result<(), StoreError>;

    /// History ordered by sequence number.
    async fn history(&self, reference: &str) -> Result<Vec<StatusHistoryEntry>, StoreError>;

    async fn count_created_since(&self, account_id: Uuid, since: OffsetDateTime) -> Result<u32, StoreError>;

    /// Payments in `status` last updated at or before `updated_before`,
    /// oldest first.
    async fn list_by_status(
        &self,
        status: PaymentStatus,
        updated_before: OffsetDateTime,
    ) -> Result<Vec<Payment>, StoreError>;
}

/// Account balances. Each call is a single atomic operation.
#[async_trait]
pub trait LedgerAdapter: Send + Sync {
    async fn get_balance(&self, account_id: Uuid) -> Result<Decimal, LedgerError>;

    /// Fails with `InsufficientFunds` and no side effect when the balance
    /// does not cover `amount`. Returns the new balance.
    async fn debit(&self, account_id: Uuid, amount: Decimal, reference: &str) -> Result<Decimal, LedgerError>;

    async fn credit(&self, account_id: Uuid, amount: Decimal, reference: &str) -> Result<Decimal, LedgerError>;
}

#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn get_account(&self, account_id: Uuid) -> Result<Option<AccountSnapshot>, StoreError>;
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn list_active_subscriptions(
        &self,
        account_id: Uuid,
        event: EventName,
    ) -> Result<Vec<WebhookSubscription>, StoreError>;

    async fn get_subscription(&self, id: Uuid) -> Result<Option<WebhookSubscription>, StoreError>;
}

#[async_trait]
pub trait DeliveryRepository: Send + Sync {
    async fn insert_attempts(&self, attempts: &[WebhookDeliveryAttempt]) -> Result<(), StoreError>;

    /// Claim up to `limit` due attempts, leasing each for `lease`.
    async fn claim_due(
        &self,
        now: OffsetDateTime,
        lease: Duration,
        limit: usize,
    ) -> Result<Vec<WebhookDeliveryAttempt>, StoreError>;

    /// Update the attempt and append the try row as one unit of work.
    async fn record_outcome(&self, outcome: &DeliveryOutcome) -> Result<(), StoreError>;

    async fn get_attempt(&self, id: Uuid) -> Result<Option<WebhookDeliveryAttempt>, StoreError>;

    async fn tries(&self, attempt_id: Uuid) -> Result<Vec<WebhookDeliveryTry>, StoreError>;
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: &AuditRecord) -> Result<(), StoreError>;
}

/// Injected cache; never a process-wide singleton.
#[async_trait]
pub trait Cache<K, V>: Send + Sync
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    async fn get(&self, key: &K) -> Option<V>;
    async fn put(&self, key: K, value: V, ttl: Duration);
    async fn invalidate(&self, key: &K);
}
