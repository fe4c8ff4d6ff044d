//! Custom Axum extractors.
//!
//! `Correlated` turns the `X-Correlation-Id` header into the
//! [`RequestContext`] every lifecycle operation takes. Requests without the
//! header get a fresh id; a header that is not a UUID is rejected.

use axum::{
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use payrail_core::RequestContext;
use uuid::Uuid;

pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Actor recorded in history and audit entries for API-initiated changes.
pub const API_ACTOR: &str = "api";

pub struct Correlated(pub RequestContext);

#[derive(Debug, thiserror::Error)]
pub enum CorrelationIdError {
    #[error("X-Correlation-Id header is not valid UTF-8")]
    NotText,
    #[error("X-Correlation-Id header is not a UUID")]
    NotUuid,
}

impl IntoResponse for CorrelationIdError {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, self.to_string()).into_response()
    }
}

impl<S> FromRequestParts<S> for Correlated
where
    S: Send + Sync,
{
    type Rejection = CorrelationIdError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let correlation_id = match parts.headers.get(CORRELATION_ID_HEADER) {
            Some(value) => {
                let text = value.to_str().map_err(|_| CorrelationIdError::NotText)?;
                Uuid::parse_str(text.trim()).map_err(|_| CorrelationIdError::NotUuid)?
            }
            None => Uuid::new_v4(),
        };
        Ok(Correlated(RequestContext::with_correlation_id(
            correlation_id,
            API_ACTOR,
        )))
    }
}
