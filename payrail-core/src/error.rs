//! Error taxonomy shared by the engine.

use crate::entities::payment::PaymentStatus;
use crate::gateway::GatewayUnavailable;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Persistence failures, independent of the backing store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("duplicate record: {0}")]
    Duplicate(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Failures reported by the ledger adapter.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("insufficient funds on account {account_id}: requested {requested}")]
    InsufficientFunds { account_id: Uuid, requested: Decimal },

    #[error("unknown ledger account: {0}")]
    UnknownAccount(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors surfaced by the payment lifecycle operations.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// Bad input; the caller's fault, never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("payment not found: {0}")]
    PaymentNotFound(String),

    /// Logic error or lost race; surfaced, never retried.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: PaymentStatus, to: PaymentStatus },

    /// The payment expired before processing began; it is now cancelled.
    #[error("payment expired: {0}")]
    PaymentExpired(String),

    /// Business rejection; the payment is FAILED.
    #[error("insufficient funds")]
    InsufficientFunds,

    /// Business rejection; the payment is FAILED and the gateway was never called.
    #[error("rejected by risk assessment (score {score})")]
    RiskRejected { score: u8 },

    /// The gateway answered with a definitive decline; the payment is FAILED.
    #[error("declined by gateway")]
    GatewayDeclined,

    /// Transient gateway failure that outlived the retry policy; the payment is FAILED.
    #[error(transparent)]
    GatewayUnavailable(#[from] GatewayUnavailable),

    /// The refund did not take effect; the payment is still COMPLETED.
    #[error("refund not applied: {0}")]
    RefundNotApplied(String),

    #[error(transparent)]
    Ledger(LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PaymentError {
    /// Whether this error reports a terminal business outcome rather than a fault.
    pub fn is_business_rejection(&self) -> bool {
        matches!(
            self,
            PaymentError::InsufficientFunds
                | PaymentError::RiskRejected { .. }
                | PaymentError::GatewayDeclined
                | PaymentError::GatewayUnavailable(_)
                | PaymentError::PaymentExpired(_)
        )
    }
}

impl From<LedgerError> for PaymentError {
    fn from(value: LedgerError) -> Self {
        match value {
            LedgerError::InsufficientFunds { .. } => PaymentError::InsufficientFunds,
            LedgerError::Store(e) => PaymentError::Store(e),
            other => PaymentError::Ledger(other),
        }
    }
}
