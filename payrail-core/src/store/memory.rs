//! In-memory implementations of every port.
//!
//! Back the test suites and the server's `--in-memory` mode. Each method
//! takes one lock for its whole unit of work, which gives the same
//! atomicity the Postgres transactions give.

use crate::entities::{
    AccountSnapshot, AuditRecord, DeliveryOutcome, LedgerMovement, LedgerMovementKind, Payment,
    PaymentStatus, StatusChange, StatusHistoryEntry, WebhookDeliveryAttempt, WebhookDeliveryTry,
    WebhookSubscription,
};
use crate::error::{LedgerError, StoreError};
use crate::ports::{
    AccountDirectory, AuditSink, DeliveryRepository, LedgerAdapter, PaymentRepository,
    SubscriptionStore,
};
use async_trait::async_trait;
use payrail_sdk::objects::EventName;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Payments
// ---------------------------------------------------------------------------

#[derive(Default)]
struct PaymentTables {
    payments: HashMap<String, Payment>,
    history: HashMap<String, Vec<StatusHistoryEntry>>,
}

#[derive(Default)]
pub struct InMemoryPaymentRepository {
    tables: RwLock<PaymentTables>,
}

#[async_trait]
impl PaymentRepository for InMemoryPaymentRepository {
    async fn insert(&self, payment: &Payment, created: &StatusHistoryEntry) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.payments.contains_key(&payment.reference) {
            return Err(StoreError::Duplicate(payment.reference.clone()));
        }
        tables
            .payments
            .insert(payment.reference.clone(), payment.clone());
        tables
            .history
            .insert(payment.reference.clone(), vec![created.clone()]);
        Ok(())
    }

    async fn get(&self, reference: &str) -> Result<Option<Payment>, StoreError> {
        Ok(self.tables.read().await.payments.get(reference).cloned())
    }

    async fn apply_transition(&self, change: &StatusChange) -> Result<Option<Payment>, StoreError> {
        let mut guard = self.tables.write().await;
        let tables = &mut *guard;
        let Some(payment) = tables.payments.get_mut(&change.reference) else {
            return Ok(None);
        };
        if payment.status != change.from {
            return Ok(None);
        }
        payment.status = change.to;
        payment.updated_at = change.at;
        let updated = payment.clone();

        let history = tables.history.entry(change.reference.clone()).or_default();
        let sequence = history.last().map_or(1, |entry| entry.sequence + 1);
        history.push(change.history_entry(sequence));
        Ok(Some(updated))
    }

    async fn record_risk_score(
        &self,
        reference: &str,
        score: u8,
        tags: &HashMap<String, String>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if let Some(payment) = tables.payments.get_mut(reference) {
            payment.risk_score = Some(score);
            payment
                .metadata
                .extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
            payment.updated_at = OffsetDateTime::now_utc();
        }
        Ok(())
    }

    async fn history(&self, reference: &str) -> Result<Vec<StatusHistoryEntry>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .history
            .get(reference)
            .cloned()
            .unwrap_or_default())
    }

    async fn count_created_since(&self, account_id: Uuid, since: OffsetDateTime) -> Result<u32, StoreError> {
        let tables = self.tables.read().await;
        let count = tables
            .payments
            .values()
            .filter(|p| p.account_id == account_id && p.created_at >= since)
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn list_by_status(
        &self,
        status: PaymentStatus,
        updated_before: OffsetDateTime,
    ) -> Result<Vec<Payment>, StoreError> {
        let tables = self.tables.read().await;
        let mut found: Vec<_> = tables
            .payments
            .values()
            .filter(|p| p.status == status && p.updated_at <= updated_before)
            .cloned()
            .collect();
        found.sort_by_key(|p| p.created_at);
        Ok(found)
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Default)]
struct LedgerBook {
    balances: HashMap<Uuid, Decimal>,
    movements: Vec<LedgerMovement>,
}

#[derive(Default)]
pub struct InMemoryLedger {
    book: Mutex<LedgerBook>,
}

impl InMemoryLedger {
    pub async fn open_account(&self, account_id: Uuid, balance: Decimal) {
        self.book.lock().await.balances.insert(account_id, balance);
    }

    /// Every debit and credit applied so far, oldest first.
    pub async fn movements(&self) -> Vec<LedgerMovement> {
        self.book.lock().await.movements.clone()
    }

    async fn apply(
        &self,
        account_id: Uuid,
        amount: Decimal,
        reference: &str,
        kind: LedgerMovementKind,
    ) -> Result<Decimal, LedgerError> {
        let mut book = self.book.lock().await;
        let balance = book
            .balances
            .get_mut(&account_id)
            .ok_or(LedgerError::UnknownAccount(account_id))?;
        let next = match kind {
            LedgerMovementKind::Debit if *balance < amount => {
                return Err(LedgerError::InsufficientFunds {
                    account_id,
                    requested: amount,
                });
            }
            LedgerMovementKind::Debit => *balance - amount,
            LedgerMovementKind::Credit => *balance + amount,
        };
        *balance = next;
        book.movements.push(LedgerMovement {
            account_id,
            payment_reference: reference.to_owned(),
            kind,
            amount,
            created_at: OffsetDateTime::now_utc(),
        });
        Ok(next)
    }
}

#[async_trait]
impl LedgerAdapter for InMemoryLedger {
    async fn get_balance(&self, account_id: Uuid) -> Result<Decimal, LedgerError> {
        self.book
            .lock()
            .await
            .balances
            .get(&account_id)
            .copied()
            .ok_or(LedgerError::UnknownAccount(account_id))
    }

    async fn debit(&self, account_id: Uuid, amount: Decimal, reference: &str) -> Result<Decimal, LedgerError> {
        self.apply(account_id, amount, reference, LedgerMovementKind::Debit)
            .await
    }

    async fn credit(&self, account_id: Uuid, amount: Decimal, reference: &str) -> Result<Decimal, LedgerError> {
        self.apply(account_id, amount, reference, LedgerMovementKind::Credit)
            .await
    }
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryAccountDirectory {
    accounts: RwLock<HashMap<Uuid, AccountSnapshot>>,
    lookups: AtomicU64,
}

impl InMemoryAccountDirectory {
    pub async fn upsert(&self, account: AccountSnapshot) {
        self.accounts.write().await.insert(account.account_id, account);
    }

    /// How many times `get_account` reached this directory.
    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl AccountDirectory for InMemoryAccountDirectory {
    async fn get_account(&self, account_id: Uuid) -> Result<Option<AccountSnapshot>, StoreError> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        Ok(self.accounts.read().await.get(&account_id).cloned())
    }
}

// ---------------------------------------------------------------------------
// Webhook subscriptions and deliveries
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemorySubscriptionStore {
    subscriptions: RwLock<Vec<WebhookSubscription>>,
}

impl InMemorySubscriptionStore {
    /// Insert, or replace the subscription with the same id.
    pub async fn add(&self, subscription: WebhookSubscription) {
        let mut subscriptions = self.subscriptions.write().await;
        match subscriptions.iter_mut().find(|s| s.id == subscription.id) {
            Some(existing) => *existing = subscription,
            None => subscriptions.push(subscription),
        }
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn list_active_subscriptions(
        &self,
        account_id: Uuid,
        event: EventName,
    ) -> Result<Vec<WebhookSubscription>, StoreError> {
        Ok(self
            .subscriptions
            .read()
            .await
            .iter()
            .filter(|s| s.account_id == account_id && s.subscribes_to(event))
            .cloned()
            .collect())
    }

    async fn get_subscription(&self, id: Uuid) -> Result<Option<WebhookSubscription>, StoreError> {
        Ok(self
            .subscriptions
            .read()
            .await
            .iter()
            .find(|s| s.id == id)
            .cloned())
    }
}

#[derive(Default)]
struct DeliveryTables {
    attempts: Vec<WebhookDeliveryAttempt>,
    tries: Vec<WebhookDeliveryTry>,
}

#[derive(Default)]
pub struct InMemoryDeliveryRepository {
    tables: Mutex<DeliveryTables>,
}

impl InMemoryDeliveryRepository {
    pub async fn attempts(&self) -> Vec<WebhookDeliveryAttempt> {
        self.tables.lock().await.attempts.clone()
    }
}

#[async_trait]
impl DeliveryRepository for InMemoryDeliveryRepository {
    async fn insert_attempts(&self, attempts: &[WebhookDeliveryAttempt]) -> Result<(), StoreError> {
        self.tables
            .lock()
            .await
            .attempts
            .extend(attempts.iter().cloned());
        Ok(())
    }

    async fn claim_due(
        &self,
        now: OffsetDateTime,
        lease: Duration,
        limit: usize,
    ) -> Result<Vec<WebhookDeliveryAttempt>, StoreError> {
        let mut tables = self.tables.lock().await;
        let mut claimed = Vec::new();
        for attempt in tables
            .attempts
            .iter_mut()
            .filter(|a| a.is_due(now))
            .take(limit)
        {
            attempt.next_retry_at = Some(now + lease);
            claimed.push(attempt.clone());
        }
        Ok(claimed)
    }

    async fn record_outcome(&self, outcome: &DeliveryOutcome) -> Result<(), StoreError> {
        let mut guard = self.tables.lock().await;
        let tables = &mut *guard;
        if let Some(attempt) = tables
            .attempts
            .iter_mut()
            .find(|a| a.id == outcome.attempt_id)
        {
            outcome.apply_to(attempt);
        }
        tables.tries.push(outcome.delivery_try());
        Ok(())
    }

    async fn get_attempt(&self, id: Uuid) -> Result<Option<WebhookDeliveryAttempt>, StoreError> {
        Ok(self
            .tables
            .lock()
            .await
            .attempts
            .iter()
            .find(|a| a.id == id)
            .cloned())
    }

    async fn tries(&self, attempt_id: Uuid) -> Result<Vec<WebhookDeliveryTry>, StoreError> {
        Ok(self
            .tables
            .lock()
            .await
            .tries
            .iter()
            .filter(|t| t.attempt_id == attempt_id)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl InMemoryAuditSink {
    pub async fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn record(&self, record: &AuditRecord) -> Result<(), StoreError> {
        self.records.lock().await.push(record.clone());
        Ok(())
    }
}
