//! Webhook payload types for payment outcome events.

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::payment::PaymentStatus;

/// Names of the events a subscriber can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventName {
    #[serde(rename = "payment.completed")]
    PaymentCompleted,
    #[serde(rename = "payment.failed")]
    PaymentFailed,
    #[serde(rename = "payment.cancelled")]
    PaymentCancelled,
    #[serde(rename = "payment.refunded")]
    PaymentRefunded,
}

impl EventName {
    pub const ALL: [EventName; 4] = [
        EventName::PaymentCompleted,
        EventName::PaymentFailed,
        EventName::PaymentCancelled,
        EventName::PaymentRefunded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::PaymentCompleted => "payment.completed",
            EventName::PaymentFailed => "payment.failed",
            EventName::PaymentCancelled => "payment.cancelled",
            EventName::PaymentRefunded => "payment.refunded",
        }
    }
}

impl std::fmt::Display for EventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown event name: {0}")]
pub struct UnknownEventName(pub String);

impl FromStr for EventName {
    type Err = UnknownEventName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventName::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| UnknownEventName(s.to_owned()))
    }
}

/// Body POSTed to subscriber endpoints.
///
/// `payment_reference` and `event` together let subscribers deduplicate,
/// since delivery is at-least-once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub event: EventName,
    pub payment_reference: String,
    pub amount: String,
    pub currency: CompactString,
    pub status: PaymentStatus,
    pub timestamp: i64,
}

/// State of one webhook delivery attempt, as returned by the redelivery API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryAttemptResponse {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub event: EventName,
    pub payment_reference: Option<String>,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub next_retry_at: Option<i64>,
    pub delivered_at: Option<i64>,
    pub failed_at: Option<i64>,
    pub last_response_code: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_name_round_trip_through_str() {
        for event in EventName::ALL {
            assert_eq!(event.as_str().parse::<EventName>().ok(), Some(event));
        }
        assert!("payment.unknown".parse::<EventName>().is_err());
    }

    #[test]
    fn test_payload_uses_camel_case_keys() {
        let payload = WebhookPayload {
            event: EventName::PaymentCompleted,
            payment_reference: "pay_abc".to_string(),
            amount: "50.00".to_string(),
            currency: "USD".into(),
            status: PaymentStatus::Completed,
            timestamp: 1_700_000_000,
        };
        let json: serde_json::Value = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["event"], "payment.completed");
        assert_eq!(json["paymentReference"], "pay_abc");
        assert_eq!(json["amount"], "50.00");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["timestamp"], 1_700_000_000);
    }
}
