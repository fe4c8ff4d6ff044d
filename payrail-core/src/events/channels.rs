//! Event channel factories and handles.

use super::types::{DomainEvent, ProcessRequest};
use tokio::sync::mpsc;

/// Default buffer size for event channels.
///
/// Senders wait once the buffer is full, so a slow consumer applies
/// backpressure instead of growing memory.
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

pub type DomainEventSender = mpsc::Sender<DomainEvent>;
pub type DomainEventReceiver = mpsc::Receiver<DomainEvent>;

pub type ProcessRequestSender = mpsc::Sender<ProcessRequest>;
pub type ProcessRequestReceiver = mpsc::Receiver<ProcessRequest>;

/// Processor → webhook dispatcher.
pub fn domain_event_channel() -> (DomainEventSender, DomainEventReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}

/// `create_payment` → payment worker.
pub fn process_request_channel() -> (ProcessRequestSender, ProcessRequestReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}

/// Container for the senders the payment processor emits on.
#[derive(Clone)]
pub struct EventSenders {
    pub domain_event: DomainEventSender,
    pub process_request: ProcessRequestSender,
}

impl EventSenders {
    pub fn new(domain_event: DomainEventSender, process_request: ProcessRequestSender) -> Self {
        Self {
            domain_event,
            process_request,
        }
    }
}
