use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use payrail_sdk::objects::DeliveryAttemptResponse;
use uuid::Uuid;

use super::ApiError;
use crate::state::AppState;

/// `POST /webhooks/attempts/{attempt_id}/redeliver`
///
/// Queues a new attempt with the same body and returns it. The original
/// attempt must be delivered or failed; it is left untouched.
pub async fn redeliver_attempt(
    State(state): State<AppState>,
    Path(attempt_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let attempt = state.deliveries.redeliver(attempt_id).await?;
    Ok(Json(DeliveryAttemptResponse::from(&attempt)))
}
