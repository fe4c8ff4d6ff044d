use super::{GatewayCallError, SettlementGateway};
use crate::entities::payment::Payment;
use async_trait::async_trait;
use compact_str::CompactString;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SettlementRequest<'a> {
    reference: &'a str,
    account_id: Uuid,
    amount: Decimal,
    currency: &'a CompactString,
}

#[derive(Debug, Deserialize)]
struct SettlementResponse {
    approved: bool,
}

/// The settlement gateway's JSON-over-HTTP endpoint.
///
/// `POST {base}/charges` and `POST {base}/refunds`. A 2xx answer carries
/// `{"approved": bool}`; any other 4xx except 408 and 429 is a decline;
/// everything else is transient. The payment reference is sent as the
/// idempotency key so a retried call never settles twice.
///
/// A 2xx whose body does not parse is `Malformed` and therefore retried,
/// even though the gateway may already have settled. That retry is only
/// safe because it carries the same `Idempotency-Key`: the gateway must
/// answer it with the original decision instead of charging again.
#[derive(Debug, Clone)]
pub struct HttpSettlementGateway {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
}

impl HttpSettlementGateway {
    pub fn new(client: reqwest::Client, base_url: Url, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url,
            api_key,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, GatewayCallError> {
        self.base_url
            .join(path)
            .map_err(|e| GatewayCallError::Transport(format!("invalid gateway url: {e}")))
    }

    async fn post(
        &self,
        path: &str,
        idempotency_key: String,
        body: &SettlementRequest<'_>,
    ) -> Result<bool, GatewayCallError> {
        let mut request = self
            .client
            .post(self.endpoint(path)?)
            .header("Idempotency-Key", idempotency_key)
            .json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GatewayCallError::Transport(e.to_string()))?;
        let status = response.status();

        if status.is_success() {
            let parsed: SettlementResponse = response
                .json()
                .await
                .map_err(|e| GatewayCallError::Malformed(e.to_string()))?;
            return Ok(parsed.approved);
        }
        if is_definitive_decline(status) {
            return Ok(false);
        }
        Err(GatewayCallError::Status(status.as_u16()))
    }
}

fn is_definitive_decline(status: StatusCode) -> bool {
    status.is_client_error()
        && status != StatusCode::REQUEST_TIMEOUT
        && status != StatusCode::TOO_MANY_REQUESTS
}

#[async_trait]
impl SettlementGateway for HttpSettlementGateway {
    async fn charge(&self, payment: &Payment) -> Result<bool, GatewayCallError> {
        let body = SettlementRequest {
            reference: &payment.reference,
            account_id: payment.account_id,
            amount: payment.amount,
            currency: &payment.currency,
        };
        self.post("charges", payment.reference.clone(), &body).await
    }

    async fn refund(&self, payment: &Payment, amount: Decimal) -> Result<bool, GatewayCallError> {
        let body = SettlementRequest {
            reference: &payment.reference,
            account_id: payment.account_id,
            amount,
            currency: &payment.currency,
        };
        self.post("refunds", format!("{}:refund", payment.reference), &body)
            .await
    }
}
