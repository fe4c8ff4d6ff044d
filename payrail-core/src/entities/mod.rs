pub mod account;
pub mod audit;
pub mod payment;
pub mod webhook;

pub use account::{AccountSnapshot, AccountStatus, LedgerMovement, LedgerMovementKind};
pub use audit::AuditRecord;
pub use payment::{NewPayment, Payment, PaymentStatus, StatusChange, StatusHistoryEntry};
pub use webhook::{
    DeliveryOutcome, DeliveryState, WebhookDeliveryAttempt, WebhookDeliveryTry,
    WebhookSubscription,
};
