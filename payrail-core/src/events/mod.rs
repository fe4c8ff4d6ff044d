//! Event system connecting the processors.
//!
//! # Event Flow
//!
//! 1. `create_payment` emits `ProcessRequest` -> `PaymentWorker`
//! 2. `PaymentWorker` runs `PaymentProcessor::process`
//! 3. `PaymentProcessor` emits `DomainEvent` -> `WebhookDispatcher`
//! 4. `WebhookDispatcher` persists delivery attempts and delivers them
//!
//! Process requests carry identifiers only; the worker re-reads the payment.

pub mod channels;
pub mod types;

pub use channels::{
    DEFAULT_CHANNEL_BUFFER, DomainEventReceiver, DomainEventSender, EventSenders,
    ProcessRequestReceiver, ProcessRequestSender, domain_event_channel, process_request_channel,
};

pub use types::{DomainEvent, ProcessRequest};
