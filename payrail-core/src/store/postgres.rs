//! Postgres implementations of the ports, executed through the query
//! objects in `entities`.

use crate::entities::account::{ApplyLedgerMovement, GetAccountSnapshot, GetLedgerBalance};
use crate::entities::audit::InsertAuditRecord;
use crate::entities::payment::{
    ApplyStatusChange, CountRecentPayments, GetPaymentByReference, InsertPaymentWithHistory,
    ListPaymentsByStatus, ListStatusHistory, RecordRiskScore,
};
use crate::entities::webhook::{
    ClaimDueDeliveryAttempts, GetDeliveryAttempt, GetSubscription, InsertDeliveryAttempts,
    ListActiveSubscriptions, ListDeliveryTries, RecordDeliveryOutcome,
};
use crate::entities::{
    AccountSnapshot, AuditRecord, DeliveryOutcome, LedgerMovementKind, Payment, PaymentStatus,
    StatusChange, StatusHistoryEntry, WebhookDeliveryAttempt, WebhookDeliveryTry,
    WebhookSubscription,
};
use crate::error::{LedgerError, StoreError};
use crate::framework::DatabaseProcessor;
use crate::ports::{
    AccountDirectory, AuditSink, DeliveryRepository, LedgerAdapter, PaymentRepository,
    SubscriptionStore,
};
use async_trait::async_trait;
use kanau::processor::Processor;
use payrail_sdk::objects::EventName;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

/// Every port backed by one Postgres pool.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    db: DatabaseProcessor,
}

impl PostgresStore {
    pub fn new(db: DatabaseProcessor) -> Self {
        Self { db }
    }
}

fn duplicate_or_database(error: sqlx::Error, what: &str) -> StoreError {
    match &error {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Duplicate(what.to_owned()),
        _ => StoreError::Database(error),
    }
}

#[async_trait]
impl PaymentRepository for PostgresStore {
    async fn insert(&self, payment: &Payment, created: &StatusHistoryEntry) -> Result<(), StoreError> {
        self.db
            .process(InsertPaymentWithHistory {
                payment: payment.clone(),
                created: created.clone(),
            })
            .await
            .map_err(|e| duplicate_or_database(e, &payment.reference))
    }

    async fn get(&self, reference: &str) -> Result<Option<Payment>, StoreError> {
        self.db
            .process(GetPaymentByReference {
                reference: reference.to_owned(),
            })
            .await?
            .map(Payment::try_from)
            .transpose()
    }

    async fn apply_transition(&self, change: &StatusChange) -> Result<Option<Payment>, StoreError> {
        self.db
            .process(ApplyStatusChange {
                change: change.clone(),
            })
            .await?
            .map(Payment::try_from)
            .transpose()
    }

    async fn record_risk_score(
        &self,
        reference: &str,
        score: u8,
        tags: &HashMap<String, String>,
    ) -> Result<(), StoreError> {
        self.db
            .process(RecordRiskScore {
                reference: reference.to_owned(),
                score,
                tags: tags.clone(),
                at: OffsetDateTime::now_utc(),
            })
            .await?;
        Ok(())
    }

    async fn history(&self, reference: &str) -> Result<Vec<StatusHistoryEntry>, StoreError> {
        Ok(self
            .db
            .process(ListStatusHistory {
                reference: reference.to_owned(),
            })
            .await?)
    }

    async fn count_created_since(&self, account_id: Uuid, since: OffsetDateTime) -> Result<u32, StoreError> {
        let count = self
            .db
            .process(CountRecentPayments { account_id, since })
            .await?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn list_by_status(
        &self,
        status: PaymentStatus,
        updated_before: OffsetDateTime,
    ) -> Result<Vec<Payment>, StoreError> {
        self.db
            .process(ListPaymentsByStatus {
                status,
                updated_before,
            })
            .await?
            .into_iter()
            .map(Payment::try_from)
            .collect()
    }
}

#[async_trait]
impl LedgerAdapter for PostgresStore {
    async fn get_balance(&self, account_id: Uuid) -> Result<Decimal, LedgerError> {
        self.db
            .process(GetLedgerBalance { account_id })
            .await
            .map_err(StoreError::from)?
            .ok_or(LedgerError::UnknownAccount(account_id))
    }

    async fn debit(&self, account_id: Uuid, amount: Decimal, reference: &str) -> Result<Decimal, LedgerError> {
        let applied = self
            .db
            .process(ApplyLedgerMovement {
                account_id,
                payment_reference: reference.to_owned(),
                kind: LedgerMovementKind::Debit,
                amount,
            })
            .await
            .map_err(StoreError::from)?;
        match applied {
            Some(balance) => Ok(balance),
            None => {
                // Distinguish a short balance from a missing account.
                self.get_balance(account_id).await?;
                Err(LedgerError::InsufficientFunds {
                    account_id,
                    requested: amount,
                })
            }
        }
    }

    async fn credit(&self, account_id: Uuid, amount: Decimal, reference: &str) -> Result<Decimal, LedgerError> {
        self.db
            .process(ApplyLedgerMovement {
                account_id,
                payment_reference: reference.to_owned(),
                kind: LedgerMovementKind::Credit,
                amount,
            })
            .await
            .map_err(StoreError::from)?
            .ok_or(LedgerError::UnknownAccount(account_id))
    }
}

#[async_trait]
impl AccountDirectory for PostgresStore {
    async fn get_account(&self, account_id: Uuid) -> Result<Option<AccountSnapshot>, StoreError> {
        Ok(self.db.process(GetAccountSnapshot { account_id }).await?)
    }
}

#[async_trait]
impl SubscriptionStore for PostgresStore {
    async fn list_active_subscriptions(
        &self,
        account_id: Uuid,
        event: EventName,
    ) -> Result<Vec<WebhookSubscription>, StoreError> {
        self.db
            .process(ListActiveSubscriptions { account_id, event })
            .await?
            .into_iter()
            .map(WebhookSubscription::try_from)
            .collect()
    }

    async fn get_subscription(&self, id: Uuid) -> Result<Option<WebhookSubscription>, StoreError> {
        self.db
            .process(GetSubscription { id })
            .await?
            .map(WebhookSubscription::try_from)
            .transpose()
    }
}

#[async_trait]
impl DeliveryRepository for PostgresStore {
    async fn insert_attempts(&self, attempts: &[WebhookDeliveryAttempt]) -> Result<(), StoreError> {
        self.db
            .process(InsertDeliveryAttempts {
                attempts: attempts.to_vec(),
            })
            .await?;
        Ok(())
    }

    async fn claim_due(
        &self,
        now: OffsetDateTime,
        lease: Duration,
        limit: usize,
    ) -> Result<Vec<WebhookDeliveryAttempt>, StoreError> {
        self.db
            .process(ClaimDueDeliveryAttempts {
                now,
                lease_until: now + lease,
                limit: i64::try_from(limit).unwrap_or(i64::MAX),
            })
            .await?
            .into_iter()
            .map(WebhookDeliveryAttempt::try_from)
            .collect()
    }

    async fn record_outcome(&self, outcome: &DeliveryOutcome) -> Result<(), StoreError> {
        self.db
            .process(RecordDeliveryOutcome {
                outcome: outcome.clone(),
            })
            .await?;
        Ok(())
    }

    async fn get_attempt(&self, id: Uuid) -> Result<Option<WebhookDeliveryAttempt>, StoreError> {
        self.db
            .process(GetDeliveryAttempt { id })
            .await?
            .map(WebhookDeliveryAttempt::try_from)
            .transpose()
    }

    async fn tries(&self, attempt_id: Uuid) -> Result<Vec<WebhookDeliveryTry>, StoreError> {
        self.db
            .process(ListDeliveryTries { attempt_id })
            .await?
            .into_iter()
            .map(WebhookDeliveryTry::try_from)
            .collect()
    }
}

#[async_trait]
impl AuditSink for PostgresStore {
    async fn record(&self, record: &AuditRecord) -> Result<(), StoreError> {
        self.db
            .process(InsertAuditRecord {
                record: record.clone(),
            })
            .await?;
        Ok(())
    }
}
