//! HTTP delivery of signed webhook bodies.

use crate::error::StoreError;
use async_trait::async_trait;
use payrail_sdk::objects::EventName;
use payrail_sdk::signature::{EVENT_HEADER, SIGNATURE_HEADER, signature_header};
use std::time::Duration;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

/// Response bodies are stored up to this many characters.
pub const MAX_STORED_BODY: usize = 1024;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("delivery attempt not found: {0}")]
    AttemptNotFound(Uuid),

    #[error("delivery attempt {0} is still being retried")]
    AttemptInFlight(Uuid),
}

/// One signed POST, ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookRequest {
    pub url: Url,
    pub event: EventName,
    pub body: String,
    pub signature: String,
}

impl WebhookRequest {
    pub fn signed(url: Url, event: EventName, body: String, secret: &str) -> Self {
        let signature = signature_header(body.as_bytes(), secret.as_bytes());
        Self {
            url,
            event,
            body,
            signature,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookResponse {
    pub status: u16,
    pub body: String,
}

impl WebhookResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait WebhookTransport: Send + Sync {
    /// `Ok` for any HTTP response; `Err` when none was received.
    async fn send(&self, request: &WebhookRequest) -> Result<WebhookResponse, DispatchError>;
}

pub struct ReqwestWebhookTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestWebhookTransport {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl WebhookTransport for ReqwestWebhookTransport {
    async fn send(&self, request: &WebhookRequest) -> Result<WebhookResponse, DispatchError> {
        let response = self
            .client
            .post(request.url.clone())
            .timeout(self.timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, &request.signature)
            .header(EVENT_HEADER, request.event.as_str())
            .body(request.body.clone())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DispatchError::Timeout(self.timeout)
                } else {
                    DispatchError::Request(e)
                }
            })?;

        let status = response.status().as_u16();
        // An unreadable body still counts as a response.
        let body = response.text().await.unwrap_or_default();
        Ok(WebhookResponse {
            status,
            body: truncate_body(body),
        })
    }
}

pub fn truncate_body(body: String) -> String {
    match body.char_indices().nth(MAX_STORED_BODY) {
        Some((cut, _)) => body[..cut].to_owned(),
        None => body,
    }
}
