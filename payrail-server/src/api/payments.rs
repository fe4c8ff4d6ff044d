use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use payrail_core::PaymentError;
use payrail_core::entities::NewPayment;
use payrail_sdk::objects::{
    CancelPaymentRequest, CreatePaymentRequest, PaymentResponse, ProcessPaymentResponse,
    RefundPaymentRequest, StatusHistoryResponse,
};
use time::OffsetDateTime;

use super::ApiError;
use super::extractors::Correlated;
use crate::state::AppState;

/// `POST /payments`: create a PENDING payment and queue it for processing.
pub async fn create_payment(
    State(state): State<AppState>,
    Correlated(ctx): Correlated,
    Json(body): Json<CreatePaymentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let expires_at = body
        .expires_at
        .map(OffsetDateTime::from_unix_timestamp)
        .transpose()
        .map_err(|_| PaymentError::Validation("expiresAt is out of range".to_owned()))?;

    let payment = state
        .processor
        .create_payment(
            &ctx,
            NewPayment {
                account_id: body.account_id,
                amount: body.amount,
                currency: body.currency,
                payment_method_id: body.payment_method_id,
                expires_at,
                metadata: body.metadata,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(PaymentResponse::from(&payment))))
}

/// `GET /payments/{reference}`
pub async fn get_payment(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let payment = state.processor.payment(&reference).await?;
    Ok(Json(PaymentResponse::from(&payment)))
}

/// `GET /payments/{reference}/history`: status changes in order.
pub async fn get_history(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let history = state.processor.history(&reference).await?;
    Ok(Json(
        history
            .iter()
            .map(StatusHistoryResponse::from)
            .collect::<Vec<_>>(),
    ))
}

/// `POST /payments/{reference}/process`
///
/// Business rejections are not errors here: the payment is FAILED and the
/// reason is reported in the body with 200.
pub async fn process_payment(
    State(state): State<AppState>,
    Correlated(ctx): Correlated,
    Path(reference): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.processor.process(&ctx, &reference).await?;
    Ok(Json(ProcessPaymentResponse {
        payment: PaymentResponse::from(&outcome.payment),
        failure_reason: outcome.failure.map(|reason| reason.to_string()),
    }))
}

/// `POST /payments/{reference}/refund`
pub async fn refund_payment(
    State(state): State<AppState>,
    Correlated(ctx): Correlated,
    Path(reference): Path<String>,
    Json(body): Json<RefundPaymentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let payment = state
        .processor
        .refund(&ctx, &reference, body.amount, &body.reason)
        .await?;
    Ok(Json(PaymentResponse::from(&payment)))
}

/// `POST /payments/{reference}/cancel`
pub async fn cancel_payment(
    State(state): State<AppState>,
    Correlated(ctx): Correlated,
    Path(reference): Path<String>,
    Json(body): Json<CancelPaymentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let payment = state
        .processor
        .cancel(&ctx, &reference, &body.reason)
        .await?;
    Ok(Json(PaymentResponse::from(&payment)))
}
