//! Application state shared across all request handlers.

use payrail_core::processors::{DeliveryEngine, PaymentProcessor};

/// Application state that is shared across all request handlers.
///
/// This is cloneable and cheap to pass around (everything is behind Arc).
#[derive(Clone)]
pub struct AppState {
    /// Payment lifecycle operations.
    pub processor: PaymentProcessor,
    /// Webhook delivery bookkeeping, used for manual redelivery.
    pub deliveries: DeliveryEngine,
}

impl AppState {
    pub fn new(processor: PaymentProcessor, deliveries: DeliveryEngine) -> Self {
        Self {
            processor,
            deliveries,
        }
    }
}
