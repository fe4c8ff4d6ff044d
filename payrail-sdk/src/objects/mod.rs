pub mod payment;
pub mod webhook;

pub use payment::{
    CancelPaymentRequest, CreatePaymentRequest, PaymentResponse, PaymentStatus,
    ProcessPaymentResponse, RefundPaymentRequest, StatusHistoryResponse,
};
pub use webhook::{DeliveryAttemptResponse, EventName, UnknownEventName, WebhookPayload};
