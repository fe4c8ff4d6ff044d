use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use rust_decimal::Decimal;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "lowercase", type_name = "account_status")]
pub enum AccountStatus {
    Active,
    Suspended,
    Closed,
}

/// Read-only view of an account owned by an external system.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct AccountSnapshot {
    pub account_id: Uuid,
    pub status: AccountStatus,
    pub created_at: OffsetDateTime,
}

impl AccountSnapshot {
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "lowercase", type_name = "ledger_movement_kind")]
pub enum LedgerMovementKind {
    Debit,
    Credit,
}

/// Journal row written alongside every balance change.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct LedgerMovement {
    pub account_id: Uuid,
    pub payment_reference: String,
    pub kind: LedgerMovementKind,
    pub amount: Decimal,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct GetAccountSnapshot {
    pub account_id: Uuid,
}

impl Processor<GetAccountSnapshot> for DatabaseProcessor {
    type Output = Option<AccountSnapshot>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetAccountSnapshot")]
    async fn process(&self, query: GetAccountSnapshot) -> Result<Option<AccountSnapshot>, sqlx::Error> {
        sqlx::query_as("SELECT account_id, status, created_at FROM accounts WHERE account_id = $1")
            .bind(query.account_id)
            .fetch_optional(&self.pool)
            .await
    }
}

#[derive(Debug, Clone)]
pub struct GetLedgerBalance {
    pub account_id: Uuid,
}

impl Processor<GetLedgerBalance> for DatabaseProcessor {
    type Output = Option<Decimal>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetLedgerBalance")]
    async fn process(&self, query: GetLedgerBalance) -> Result<Option<Decimal>, sqlx::Error> {
        sqlx::query_scalar("SELECT balance FROM ledger_balances WHERE account_id = $1")
            .bind(query.account_id)
            .fetch_optional(&self.pool)
            .await
    }
}

#[derive(Debug, Clone)]
/// Move money on one account and journal the movement.
///
/// A debit only applies when the balance covers it; `None` means no row
/// changed (insufficient balance or unknown account).
pub struct ApplyLedgerMovement {
    pub account_id: Uuid,
    pub payment_reference: String,
    pub kind: LedgerMovementKind,
    pub amount: Decimal,
}

impl Processor<ApplyLedgerMovement> for DatabaseProcessor {
    type Output = Option<Decimal>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ApplyLedgerMovement")]
    async fn process(&self, movement: ApplyLedgerMovement) -> Result<Option<Decimal>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let sql = match movement.kind {
            LedgerMovementKind::Debit => {
                "UPDATE ledger_balances SET balance = balance - $2 \
                 WHERE account_id = $1 AND balance >= $2 RETURNING balance"
            }
            LedgerMovementKind::Credit => {
                "UPDATE ledger_balances SET balance = balance + $2 \
                 WHERE account_id = $1 RETURNING balance"
            }
        };
        let balance: Option<Decimal> = sqlx::query_scalar(sql)
            .bind(movement.account_id)
            .bind(movement.amount)
            .fetch_optional(&mut *tx)
            .await?;
        if balance.is_none() {
            tx.rollback().await?;
            return Ok(None);
        }
        sqlx::query(
            r#"
            INSERT INTO ledger_movements (account_id, payment_reference, kind, amount)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(movement.account_id)
        .bind(&movement.payment_reference)
        .bind(movement.kind)
        .bind(movement.amount)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(balance)
    }
}
