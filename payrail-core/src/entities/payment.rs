use crate::error::StoreError;
use crate::framework::DatabaseProcessor;
use compact_str::CompactString;
use kanau::processor::Processor;
use payrail_sdk::objects::{
    PaymentResponse, PaymentStatus as SdkPaymentStatus, StatusHistoryResponse,
};
use rust_decimal::Decimal;
use sqlx::types::Json;
use std::collections::HashMap;
use time::OffsetDateTime;
use uuid::Uuid;

/// Payment status for database operations.
///
/// This is the sqlx::Type version. For API/DTO use, see `payrail_sdk::objects::PaymentStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "lowercase", type_name = "payment_status")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Refunded,
}

impl PaymentStatus {
    /// The lifecycle graph. Self-loops are never allowed.
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Completed, Refunded)
        )
    }

    /// FAILED, CANCELLED and REFUNDED accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PaymentStatus::Failed | PaymentStatus::Cancelled | PaymentStatus::Refunded
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_str().to_ascii_uppercase())
    }
}

impl From<PaymentStatus> for SdkPaymentStatus {
    fn from(value: PaymentStatus) -> Self {
        match value {
            PaymentStatus::Pending => SdkPaymentStatus::Pending,
            PaymentStatus::Processing => SdkPaymentStatus::Processing,
            PaymentStatus::Completed => SdkPaymentStatus::Completed,
            PaymentStatus::Failed => SdkPaymentStatus::Failed,
            PaymentStatus::Cancelled => SdkPaymentStatus::Cancelled,
            PaymentStatus::Refunded => SdkPaymentStatus::Refunded,
        }
    }
}

impl From<SdkPaymentStatus> for PaymentStatus {
    fn from(value: SdkPaymentStatus) -> Self {
        match value {
            SdkPaymentStatus::Pending => PaymentStatus::Pending,
            SdkPaymentStatus::Processing => PaymentStatus::Processing,
            SdkPaymentStatus::Completed => PaymentStatus::Completed,
            SdkPaymentStatus::Failed => PaymentStatus::Failed,
            SdkPaymentStatus::Cancelled => PaymentStatus::Cancelled,
            SdkPaymentStatus::Refunded => PaymentStatus::Refunded,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    pub reference: String,
    pub account_id: Uuid,
    pub amount: Decimal,
    pub currency: CompactString,
    pub status: PaymentStatus,
    pub risk_score: Option<u8>,
    pub payment_method_id: Option<String>,
    pub expires_at: Option<OffsetDateTime>,
    pub metadata: HashMap<String, String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Payment {
    /// A new, globally unique payment reference (`pay_` + time-ordered uuid).
    pub fn new_reference() -> String {
        format!("pay_{}", Uuid::now_v7().simple())
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

impl From<&Payment> for PaymentResponse {
    fn from(p: &Payment) -> Self {
        PaymentResponse {
            reference: p.reference.clone(),
            account_id: p.account_id,
            amount: p.amount,
            currency: p.currency.clone(),
            status: p.status.into(),
            risk_score: p.risk_score,
            payment_method_id: p.payment_method_id.clone(),
            metadata: p.metadata.clone(),
            expires_at: p.expires_at.map(OffsetDateTime::unix_timestamp),
            created_at: p.created_at.unix_timestamp(),
            updated_at: p.updated_at.unix_timestamp(),
        }
    }
}

/// Validated input for `create_payment`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPayment {
    pub account_id: Uuid,
    pub amount: Decimal,
    pub currency: CompactString,
    pub payment_method_id: Option<String>,
    pub expires_at: Option<OffsetDateTime>,
    pub metadata: HashMap<String, String>,
}

/// One immutable row of a payment's status history.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct StatusHistoryEntry {
    pub payment_reference: String,
    pub sequence: i64,
    pub from_status: Option<PaymentStatus>,
    pub to_status: PaymentStatus,
    pub reason: String,
    pub actor: String,
    pub correlation_id: Uuid,
    pub created_at: OffsetDateTime,
}

impl From<&StatusHistoryEntry> for StatusHistoryResponse {
    fn from(e: &StatusHistoryEntry) -> Self {
        StatusHistoryResponse {
            sequence: e.sequence,
            from_status: e.from_status.map(Into::into),
            to_status: e.to_status.into(),
            reason: e.reason.clone(),
            actor: e.actor.clone(),
            correlation_id: e.correlation_id,
            created_at: e.created_at.unix_timestamp(),
        }
    }
}

/// A requested status change, applied as compare-and-set on `from`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub reference: String,
    pub from: PaymentStatus,
    pub to: PaymentStatus,
    pub reason: String,
    pub actor: String,
    pub correlation_id: Uuid,
    pub at: OffsetDateTime,
}

impl StatusChange {
    /// The history entry this change appends, given its sequence number.
    pub fn history_entry(&self, sequence: i64) -> StatusHistoryEntry {
        StatusHistoryEntry {
            payment_reference: self.reference.clone(),
            sequence,
            from_status: Some(self.from),
            to_status: self.to,
            reason: self.reason.clone(),
            actor: self.actor.clone(),
            correlation_id: self.correlation_id,
            created_at: self.at,
        }
    }
}

// ---------------------------------------------------------------------------
// Postgres rows and query objects
// ---------------------------------------------------------------------------

const PAYMENT_COLUMNS: &str = "reference, account_id, amount, currency, status, risk_score, \
    payment_method_id, expires_at, metadata, created_at, updated_at";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PaymentRow {
    pub reference: String,
    pub account_id: Uuid,
    pub amount: Decimal,
    pub currency: CompactString,
    pub status: PaymentStatus,
    pub risk_score: Option<i16>,
    pub payment_method_id: Option<String>,
    pub expires_at: Option<OffsetDateTime>,
    pub metadata: Json<HashMap<String, String>>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = StoreError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let risk_score = row
            .risk_score
            .map(u8::try_from)
            .transpose()
            .map_err(|_| StoreError::Corrupt(format!("risk score out of range on {}", row.reference)))?;
        Ok(Payment {
            reference: row.reference,
            account_id: row.account_id,
            amount: row.amount,
            currency: row.currency,
            status: row.status,
            risk_score,
            payment_method_id: row.payment_method_id,
            expires_at: row.expires_at,
            metadata: row.metadata.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone)]
/// Insert a payment together with its creation history entry.
pub struct InsertPaymentWithHistory {
    pub payment: Payment,
    pub created: StatusHistoryEntry,
}

impl Processor<InsertPaymentWithHistory> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertPaymentWithHistory")]
    async fn process(&self, insert: InsertPaymentWithHistory) -> Result<(), sqlx::Error> {
        let InsertPaymentWithHistory { payment, created } = insert;
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO payments
                (reference, account_id, amount, currency, status, risk_score,
                 payment_method_id, expires_at, metadata, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&payment.reference)
        .bind(payment.account_id)
        .bind(payment.amount)
        .bind(payment.currency.as_str())
        .bind(payment.status)
        .bind(payment.risk_score.map(i16::from))
        .bind(&payment.payment_method_id)
        .bind(payment.expires_at)
        .bind(Json(&payment.metadata))
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&mut *tx)
        .await?;
        insert_history(&mut tx, &created).await?;
        tx.commit().await?;
        Ok(())
    }
}

async fn insert_history(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    entry: &StatusHistoryEntry,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO payment_status_history
            (payment_reference, sequence, from_status, to_status, reason, actor, correlation_id, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(&entry.payment_reference)
    .bind(entry.sequence)
    .bind(entry.from_status)
    .bind(entry.to_status)
    .bind(&entry.reason)
    .bind(&entry.actor)
    .bind(entry.correlation_id)
    .bind(entry.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[derive(Debug, Clone)]
/// Compare-and-set the status and append the matching history entry.
///
/// Returns `None` when the payment is no longer in `change.from`; nothing
/// is written in that case.
pub struct ApplyStatusChange {
    pub change: StatusChange,
}

impl Processor<ApplyStatusChange> for DatabaseProcessor {
    type Output = Option<PaymentRow>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ApplyStatusChange")]
    async fn process(&self, query: ApplyStatusChange) -> Result<Option<PaymentRow>, sqlx::Error> {
        let change = query.change;
        let mut tx = self.pool.begin().await?;
        let sql = format!(
            "UPDATE payments SET status = $3, updated_at = $4 \
             WHERE reference = $1 AND status = $2 RETURNING {PAYMENT_COLUMNS}"
        );
        let row: Option<PaymentRow> = sqlx::query_as(&sql)
            .bind(&change.reference)
            .bind(change.from)
            .bind(change.to)
            .bind(change.at)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };
        // The row lock taken by the UPDATE serializes sequence allocation.
        let sequence: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(sequence), 0) + 1 FROM payment_status_history WHERE payment_reference = $1",
        )
        .bind(&change.reference)
        .fetch_one(&mut *tx)
        .await?;
        insert_history(&mut tx, &change.history_entry(sequence)).await?;
        tx.commit().await?;
        Ok(Some(row))
    }
}

#[derive(Debug, Clone)]
pub struct GetPaymentByReference {
    pub reference: String,
}

impl Processor<GetPaymentByReference> for DatabaseProcessor {
    type Output = Option<PaymentRow>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetPaymentByReference")]
    async fn process(&self, query: GetPaymentByReference) -> Result<Option<PaymentRow>, sqlx::Error> {
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE reference = $1");
        sqlx::query_as(&sql)
            .bind(&query.reference)
            .fetch_optional(&self.pool)
            .await
    }
}

#[derive(Debug, Clone)]
/// Payments sitting in one status since at least `updated_before`.
pub struct ListPaymentsByStatus {
    pub status: PaymentStatus,
    pub updated_before: OffsetDateTime,
}

impl Processor<ListPaymentsByStatus> for DatabaseProcessor {
    type Output = Vec<PaymentRow>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListPaymentsByStatus")]
    async fn process(&self, query: ListPaymentsByStatus) -> Result<Vec<PaymentRow>, sqlx::Error> {
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE status = $1 AND updated_at <= $2 ORDER BY created_at"
        );
        sqlx::query_as(&sql)
            .bind(query.status)
            .bind(query.updated_before)
            .fetch_all(&self.pool)
            .await
    }
}

#[derive(Debug, Clone)]
pub struct ListStatusHistory {
    pub reference: String,
}

impl Processor<ListStatusHistory> for DatabaseProcessor {
    type Output = Vec<StatusHistoryEntry>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListStatusHistory")]
    async fn process(&self, query: ListStatusHistory) -> Result<Vec<StatusHistoryEntry>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT payment_reference, sequence, from_status, to_status, reason, actor,
                   correlation_id, created_at
            FROM payment_status_history
            WHERE payment_reference = $1
            ORDER BY sequence
            "#,
        )
        .bind(&query.reference)
        .fetch_all(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Number of payments an account created since `since` (risk velocity).
pub struct CountRecentPayments {
    pub account_id: Uuid,
    pub since: OffsetDateTime,
}

impl Processor<CountRecentPayments> for DatabaseProcessor {
    type Output = i64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:CountRecentPayments")]
    async fn process(&self, query: CountRecentPayments) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM payments WHERE account_id = $1 AND created_at >= $2")
            .bind(query.account_id)
            .bind(query.since)
            .fetch_one(&self.pool)
            .await
    }
}

#[derive(Debug, Clone)]
/// Persist the risk score and merge risk tags into the metadata.
pub struct RecordRiskScore {
    pub reference: String,
    pub score: u8,
    pub tags: HashMap<String, String>,
    pub at: OffsetDateTime,
}

impl Processor<RecordRiskScore> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:RecordRiskScore")]
    async fn process(&self, query: RecordRiskScore) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET risk_score = $2, metadata = metadata || $3, updated_at = $4
            WHERE reference = $1
            "#,
        )
        .bind(&query.reference)
        .bind(i16::from(query.score))
        .bind(Json(&query.tags))
        .bind(query.at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
