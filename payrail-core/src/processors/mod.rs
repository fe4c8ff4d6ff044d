//! Processors of the event-driven pipeline.
//!
//! - `PaymentProcessor`: lifecycle operations, emits `DomainEvent` and
//!   `ProcessRequest`
//! - `PaymentWorker`: receives `ProcessRequest`, runs `process`
//! - `WebhookDispatcher`: receives `DomainEvent`, delivers webhooks

pub mod payment_processor;
pub mod payment_worker;
pub mod webhook_dispatcher;
pub mod webhook_transport;

pub use payment_processor::{
    FailureReason, PaymentProcessor, PaymentProcessorDeps, ProcessOutcome, RecoveryReport,
};
pub use payment_worker::PaymentWorker;
pub use webhook_dispatcher::{DeliveryEngine, WebhookDispatcher};
pub use webhook_transport::{
    DispatchError, ReqwestWebhookTransport, WebhookRequest, WebhookResponse, WebhookTransport,
};
