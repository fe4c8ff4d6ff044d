//! HTTP adapter over the payment lifecycle operations.
//!
//! # Endpoints
//!
//! - `POST /payments`                          – create a payment
//! - `GET  /payments/{reference}`              – current state
//! - `GET  /payments/{reference}/history`      – status history
//! - `POST /payments/{reference}/process`      – run the settlement synchronously
//! - `POST /payments/{reference}/refund`       – refund a completed payment
//! - `POST /payments/{reference}/cancel`       – cancel a pending payment
//! - `POST /webhooks/attempts/{id}/redeliver`  – reset a delivery attempt
//!
//! Every endpoint accepts an optional `X-Correlation-Id` header.

use axum::{
    Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use payrail_core::PaymentError;
use payrail_core::processors::DispatchError;

use crate::state::AppState;

pub mod extractors;
mod payments;
mod webhooks;

/// Build the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/payments", post(payments::create_payment))
        .route("/payments/{reference}", get(payments::get_payment))
        .route("/payments/{reference}/history", get(payments::get_history))
        .route("/payments/{reference}/process", post(payments::process_payment))
        .route("/payments/{reference}/refund", post(payments::refund_payment))
        .route("/payments/{reference}/cancel", post(payments::cancel_payment))
        .route(
            "/webhooks/attempts/{attempt_id}/redeliver",
            post(webhooks::redeliver_attempt),
        )
}

// ---------------------------------------------------------------------------
// Error handling
// ---------------------------------------------------------------------------

/// Errors that can occur in API handlers.
#[derive(Debug)]
pub enum ApiError {
    Payment(PaymentError),
    Webhook(DispatchError),
}

impl From<PaymentError> for ApiError {
    fn from(value: PaymentError) -> Self {
        ApiError::Payment(value)
    }
}

impl From<DispatchError> for ApiError {
    fn from(value: DispatchError) -> Self {
        ApiError::Webhook(value)
    }
}

/// HTTP status for a lifecycle error. `None` means a server-side fault whose
/// details stay in the logs.
fn payment_status(error: &PaymentError) -> Option<StatusCode> {
    match error {
        PaymentError::Validation(_) => Some(StatusCode::BAD_REQUEST),
        PaymentError::PaymentNotFound(_) => Some(StatusCode::NOT_FOUND),
        PaymentError::InvalidStateTransition { .. } | PaymentError::PaymentExpired(_) => {
            Some(StatusCode::CONFLICT)
        }
        PaymentError::InsufficientFunds
        | PaymentError::RiskRejected { .. }
        | PaymentError::GatewayDeclined => Some(StatusCode::UNPROCESSABLE_ENTITY),
        PaymentError::GatewayUnavailable(_) => Some(StatusCode::SERVICE_UNAVAILABLE),
        PaymentError::RefundNotApplied(_) => Some(StatusCode::BAD_GATEWAY),
        PaymentError::Ledger(_) | PaymentError::Store(_) | PaymentError::Internal(_) => None,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Payment(e) => match payment_status(&e) {
                Some(status) => (status, e.to_string()).into_response(),
                None => {
                    tracing::error!(error = %e, "Payment API internal error");
                    (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
                }
            },
            ApiError::Webhook(DispatchError::AttemptNotFound(id)) => (
                StatusCode::NOT_FOUND,
                format!("delivery attempt not found: {id}"),
            )
                .into_response(),
            ApiError::Webhook(DispatchError::AttemptInFlight(id)) => (
                StatusCode::CONFLICT,
                format!("delivery attempt {id} is still being retried"),
            )
                .into_response(),
            ApiError::Webhook(e) => {
                tracing::error!(error = %e, "Webhook API internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use payrail_core::entities::PaymentStatus;
    use payrail_core::gateway::GatewayUnavailable;

    #[test]
    fn test_caller_errors_map_to_4xx() {
        assert_eq!(
            payment_status(&PaymentError::Validation("amount".into())),
            Some(StatusCode::BAD_REQUEST)
        );
        assert_eq!(
            payment_status(&PaymentError::PaymentNotFound("pay_x".into())),
            Some(StatusCode::NOT_FOUND)
        );
        assert_eq!(
            payment_status(&PaymentError::InvalidStateTransition {
                from: PaymentStatus::Completed,
                to: PaymentStatus::Cancelled,
            }),
            Some(StatusCode::CONFLICT)
        );
        assert_eq!(
            payment_status(&PaymentError::RiskRejected { score: 90 }),
            Some(StatusCode::UNPROCESSABLE_ENTITY)
        );
    }

    #[test]
    fn test_gateway_and_internal_errors() {
        assert_eq!(
            payment_status(&PaymentError::GatewayUnavailable(GatewayUnavailable::CircuitOpen)),
            Some(StatusCode::SERVICE_UNAVAILABLE)
        );
        assert_eq!(payment_status(&PaymentError::Internal("boom".into())), None);

        let response = ApiError::from(PaymentError::Internal("secret detail".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_redelivery_errors() {
        let id = uuid::Uuid::new_v4();
        let response = ApiError::from(DispatchError::AttemptNotFound(id)).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = ApiError::from(DispatchError::AttemptInFlight(id)).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
