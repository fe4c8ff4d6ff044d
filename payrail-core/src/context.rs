//! Per-request context threaded through every lifecycle operation.
//!
//! Replaces any process-wide correlation state: the caller creates the
//! context (and with it the tracing span) and hands it down explicitly.

use tracing::Span;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RequestContext {
    correlation_id: Uuid,
    actor: String,
    span: Span,
}

impl RequestContext {
    /// A context with a fresh correlation id.
    pub fn new(actor: impl Into<String>) -> Self {
        Self::with_correlation_id(Uuid::new_v4(), actor)
    }

    /// A context continuing an existing correlation id (e.g. from a request
    /// header or a queued job).
    pub fn with_correlation_id(correlation_id: Uuid, actor: impl Into<String>) -> Self {
        let actor = actor.into();
        let span = tracing::info_span!(
            "payrail",
            correlation_id = %correlation_id,
            actor = %actor,
        );
        Self {
            correlation_id,
            actor,
            span,
        }
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    /// The logging handle for this request.
    pub fn span(&self) -> &Span {
        &self.span
    }
}
