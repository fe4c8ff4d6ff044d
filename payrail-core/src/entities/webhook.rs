use crate::error::StoreError;
use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use payrail_sdk::objects::{DeliveryAttemptResponse, EventName};
use smallvec::SmallVec;
use time::OffsetDateTime;
use url::Url;
use uuid::Uuid;

/// A subscriber endpoint registered by an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookSubscription {
    pub id: Uuid,
    pub account_id: Uuid,
    pub target_url: Url,
    pub events: SmallVec<[EventName; 4]>,
    pub secret: String,
    pub active: bool,
    pub max_attempts: u32,
}

impl WebhookSubscription {
    pub fn subscribes_to(&self, event: EventName) -> bool {
        self.active && self.events.contains(&event)
    }
}

/// One logical delivery of one event to one subscription.
///
/// Terminal once `delivered_at` or `failed_at` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookDeliveryAttempt {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub payment_reference: Option<String>,
    pub event: EventName,
    /// Exact bytes that are signed and POSTed.
    pub payload: String,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub next_retry_at: Option<OffsetDateTime>,
    pub delivered_at: Option<OffsetDateTime>,
    pub failed_at: Option<OffsetDateTime>,
    pub last_response_code: Option<u16>,
    pub last_response_body: Option<String>,
    pub created_at: OffsetDateTime,
}

impl WebhookDeliveryAttempt {
    /// A fresh attempt, due immediately.
    pub fn new(
        subscription: &WebhookSubscription,
        event: EventName,
        payment_reference: Option<String>,
        payload: String,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            subscription_id: subscription.id,
            payment_reference,
            event,
            payload,
            attempt_count: 0,
            max_attempts: subscription.max_attempts,
            next_retry_at: None,
            delivered_at: None,
            failed_at: None,
            last_response_code: None,
            last_response_body: None,
            created_at: now,
        }
    }

    /// A new attempt carrying the same signed body, due immediately with a
    /// full budget. The original attempt and its tries are left as they are.
    pub fn redelivery(&self, now: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            subscription_id: self.subscription_id,
            payment_reference: self.payment_reference.clone(),
            event: self.event,
            payload: self.payload.clone(),
            attempt_count: 0,
            max_attempts: self.max_attempts,
            next_retry_at: None,
            delivered_at: None,
            failed_at: None,
            last_response_code: None,
            last_response_body: None,
            created_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.delivered_at.is_some() || self.failed_at.is_some()
    }

    pub fn is_due(&self, now: OffsetDateTime) -> bool {
        !self.is_terminal() && self.next_retry_at.is_none_or(|at| at <= now)
    }
}

impl From<&WebhookDeliveryAttempt> for DeliveryAttemptResponse {
    fn from(a: &WebhookDeliveryAttempt) -> Self {
        DeliveryAttemptResponse {
            id: a.id,
            subscription_id: a.subscription_id,
            event: a.event,
            payment_reference: a.payment_reference.clone(),
            attempt_count: a.attempt_count,
            max_attempts: a.max_attempts,
            next_retry_at: a.next_retry_at.map(OffsetDateTime::unix_timestamp),
            delivered_at: a.delivered_at.map(OffsetDateTime::unix_timestamp),
            failed_at: a.failed_at.map(OffsetDateTime::unix_timestamp),
            last_response_code: a.last_response_code,
        }
    }
}

/// One HTTP try of a delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookDeliveryTry {
    pub attempt_id: Uuid,
    pub try_number: u32,
    /// `None` when the request never produced a response.
    pub response_code: Option<u16>,
    pub error: Option<String>,
    pub tried_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Delivered,
    Retry { next_retry_at: OffsetDateTime },
    Failed,
}

/// Result of one try, persisted as a single unit of work (attempt update +
/// try row).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub attempt_id: Uuid,
    pub attempt_count: u32,
    pub state: DeliveryState,
    pub response_code: Option<u16>,
    pub response_body: Option<String>,
    pub error: Option<String>,
    pub tried_at: OffsetDateTime,
}

impl DeliveryOutcome {
    pub fn delivery_try(&self) -> WebhookDeliveryTry {
        WebhookDeliveryTry {
            attempt_id: self.attempt_id,
            try_number: self.attempt_count,
            response_code: self.response_code,
            error: self.error.clone(),
            tried_at: self.tried_at,
        }
    }

    /// Apply this outcome to the in-memory copy of the attempt.
    pub fn apply_to(&self, attempt: &mut WebhookDeliveryAttempt) {
        attempt.attempt_count = self.attempt_count;
        attempt.last_response_code = self.response_code;
        attempt.last_response_body = self.response_body.clone();
        match self.state {
            DeliveryState::Delivered => {
                attempt.delivered_at = Some(self.tried_at);
                attempt.next_retry_at = None;
            }
            DeliveryState::Retry { next_retry_at } => attempt.next_retry_at = Some(next_retry_at),
            DeliveryState::Failed => {
                attempt.failed_at = Some(self.tried_at);
                attempt.next_retry_at = None;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Postgres rows and query objects
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WebhookSubscriptionRow {
    pub id: Uuid,
    pub account_id: Uuid,
    pub target_url: String,
    pub events: Vec<String>,
    pub secret: String,
    pub active: bool,
    pub max_attempts: i32,
}

impl TryFrom<WebhookSubscriptionRow> for WebhookSubscription {
    type Error = StoreError;

    fn try_from(row: WebhookSubscriptionRow) -> Result<Self, Self::Error> {
        let target_url = Url::parse(&row.target_url)
            .map_err(|e| StoreError::Corrupt(format!("subscription {} url: {e}", row.id)))?;
        let events = row
            .events
            .iter()
            .map(|name| name.parse::<EventName>())
            .collect::<Result<SmallVec<[EventName; 4]>, _>>()
            .map_err(|e| StoreError::Corrupt(format!("subscription {}: {e}", row.id)))?;
        let max_attempts = u32::try_from(row.max_attempts)
            .map_err(|_| StoreError::Corrupt(format!("subscription {} max attempts", row.id)))?;
        Ok(WebhookSubscription {
            id: row.id,
            account_id: row.account_id,
            target_url,
            events,
            secret: row.secret,
            active: row.active,
            max_attempts,
        })
    }
}

const ATTEMPT_COLUMNS: &str = "id, subscription_id, payment_reference, event_name, payload, \
    attempt_count, max_attempts, next_retry_at, delivered_at, failed_at, \
    last_response_code, last_response_body, created_at";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DeliveryAttemptRow {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub payment_reference: Option<String>,
    pub event_name: String,
    pub payload: String,
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub next_retry_at: Option<OffsetDateTime>,
    pub delivered_at: Option<OffsetDateTime>,
    pub failed_at: Option<OffsetDateTime>,
    pub last_response_code: Option<i32>,
    pub last_response_body: Option<String>,
    pub created_at: OffsetDateTime,
}

impl TryFrom<DeliveryAttemptRow> for WebhookDeliveryAttempt {
    type Error = StoreError;

    fn try_from(row: DeliveryAttemptRow) -> Result<Self, Self::Error> {
        let corrupt = |what: &str| StoreError::Corrupt(format!("delivery attempt {}: {what}", row.id));
        Ok(WebhookDeliveryAttempt {
            id: row.id,
            subscription_id: row.subscription_id,
            event: row.event_name.parse().map_err(|_| corrupt("event name"))?,
            attempt_count: u32::try_from(row.attempt_count).map_err(|_| corrupt("attempt count"))?,
            max_attempts: u32::try_from(row.max_attempts).map_err(|_| corrupt("max attempts"))?,
            last_response_code: row
                .last_response_code
                .map(u16::try_from)
                .transpose()
                .map_err(|_| corrupt("response code"))?,
            payment_reference: row.payment_reference,
            payload: row.payload,
            next_retry_at: row.next_retry_at,
            delivered_at: row.delivered_at,
            failed_at: row.failed_at,
            last_response_body: row.last_response_body,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DeliveryTryRow {
    pub attempt_id: Uuid,
    pub try_number: i32,
    pub response_code: Option<i32>,
    pub error: Option<String>,
    pub tried_at: OffsetDateTime,
}

impl TryFrom<DeliveryTryRow> for WebhookDeliveryTry {
    type Error = StoreError;

    fn try_from(row: DeliveryTryRow) -> Result<Self, Self::Error> {
        let corrupt = || StoreError::Corrupt(format!("delivery try of {}", row.attempt_id));
        Ok(WebhookDeliveryTry {
            attempt_id: row.attempt_id,
            try_number: u32::try_from(row.try_number).map_err(|_| corrupt())?,
            response_code: row
                .response_code
                .map(u16::try_from)
                .transpose()
                .map_err(|_| corrupt())?,
            error: row.error,
            tried_at: row.tried_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ListActiveSubscriptions {
    pub account_id: Uuid,
    pub event: EventName,
}

impl Processor<ListActiveSubscriptions> for DatabaseProcessor {
    type Output = Vec<WebhookSubscriptionRow>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListActiveSubscriptions")]
    async fn process(
        &self,
        query: ListActiveSubscriptions,
    ) -> Result<Vec<WebhookSubscriptionRow>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT id, account_id, target_url, events, secret, active, max_attempts
            FROM webhook_subscriptions
            WHERE account_id = $1 AND active AND $2 = ANY(events)
            "#,
        )
        .bind(query.account_id)
        .bind(query.event.as_str())
        .fetch_all(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
pub struct GetSubscription {
    pub id: Uuid,
}

impl Processor<GetSubscription> for DatabaseProcessor {
    type Output = Option<WebhookSubscriptionRow>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetSubscription")]
    async fn process(&self, query: GetSubscription) -> Result<Option<WebhookSubscriptionRow>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT id, account_id, target_url, events, secret, active, max_attempts
            FROM webhook_subscriptions
            WHERE id = $1
            "#,
        )
        .bind(query.id)
        .fetch_optional(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Insert freshly created attempts in a single statement.
pub struct InsertDeliveryAttempts {
    pub attempts: Vec<WebhookDeliveryAttempt>,
}

impl Processor<InsertDeliveryAttempts> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertDeliveryAttempts")]
    async fn process(&self, insert: InsertDeliveryAttempts) -> Result<u64, sqlx::Error> {
        if insert.attempts.is_empty() {
            return Ok(0);
        }

        let mut query_builder = sqlx::QueryBuilder::new(
            "INSERT INTO webhook_delivery_attempts \
            (id, subscription_id, payment_reference, event_name, payload, attempt_count, max_attempts, created_at) ",
        );

        query_builder.push_values(insert.attempts, |mut b, attempt| {
            b.push_bind(attempt.id)
                .push_bind(attempt.subscription_id)
                .push_bind(attempt.payment_reference)
                .push_bind(attempt.event.as_str())
                .push_bind(attempt.payload)
                .push_bind(i32::try_from(attempt.attempt_count).unwrap_or(i32::MAX))
                .push_bind(i32::try_from(attempt.max_attempts).unwrap_or(i32::MAX))
                .push_bind(attempt.created_at);
        });

        let result = query_builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone)]
/// Claim due attempts by pushing their `next_retry_at` to `lease_until`.
///
/// A worker that dies mid-delivery leaves the attempt due again once the
/// lease expires. `SKIP LOCKED` keeps concurrent dispatchers apart.
pub struct ClaimDueDeliveryAttempts {
    pub now: OffsetDateTime,
    pub lease_until: OffsetDateTime,
    pub limit: i64,
}

impl Processor<ClaimDueDeliveryAttempts> for DatabaseProcessor {
    type Output = Vec<DeliveryAttemptRow>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ClaimDueDeliveryAttempts")]
    async fn process(
        &self,
        query: ClaimDueDeliveryAttempts,
    ) -> Result<Vec<DeliveryAttemptRow>, sqlx::Error> {
        let sql = format!(
            r#"
            UPDATE webhook_delivery_attempts SET next_retry_at = $2
            WHERE id IN (
                SELECT id FROM webhook_delivery_attempts
                WHERE delivered_at IS NULL
                  AND failed_at IS NULL
                  AND (next_retry_at IS NULL OR next_retry_at <= $1)
                ORDER BY created_at
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {ATTEMPT_COLUMNS}
            "#
        );
        sqlx::query_as(&sql)
            .bind(query.now)
            .bind(query.lease_until)
            .bind(query.limit)
            .fetch_all(&self.pool)
            .await
    }
}

#[derive(Debug, Clone)]
/// Update the attempt and append its try row in one transaction.
pub struct RecordDeliveryOutcome {
    pub outcome: DeliveryOutcome,
}

impl Processor<RecordDeliveryOutcome> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:RecordDeliveryOutcome")]
    async fn process(&self, record: RecordDeliveryOutcome) -> Result<(), sqlx::Error> {
        let outcome = record.outcome;
        let (next_retry_at, delivered_at, failed_at) = match outcome.state {
            DeliveryState::Delivered => (None, Some(outcome.tried_at), None),
            DeliveryState::Retry { next_retry_at } => (Some(next_retry_at), None, None),
            DeliveryState::Failed => (None, None, Some(outcome.tried_at)),
        };
        let attempt_count = i32::try_from(outcome.attempt_count).unwrap_or(i32::MAX);
        let response_code = outcome.response_code.map(i32::from);

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            UPDATE webhook_delivery_attempts
            SET attempt_count = $2,
                next_retry_at = $3,
                delivered_at = $4,
                failed_at = $5,
                last_response_code = $6,
                last_response_body = $7
            WHERE id = $1
            "#,
        )
        .bind(outcome.attempt_id)
        .bind(attempt_count)
        .bind(next_retry_at)
        .bind(delivered_at)
        .bind(failed_at)
        .bind(response_code)
        .bind(&outcome.response_body)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            r#"
            INSERT INTO webhook_delivery_tries (attempt_id, try_number, response_code, error, tried_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(outcome.attempt_id)
        .bind(attempt_count)
        .bind(response_code)
        .bind(&outcome.error)
        .bind(outcome.tried_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct GetDeliveryAttempt {
    pub id: Uuid,
}

impl Processor<GetDeliveryAttempt> for DatabaseProcessor {
    type Output = Option<DeliveryAttemptRow>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetDeliveryAttempt")]
    async fn process(&self, query: GetDeliveryAttempt) -> Result<Option<DeliveryAttemptRow>, sqlx::Error> {
        let sql = format!("SELECT {ATTEMPT_COLUMNS} FROM webhook_delivery_attempts WHERE id = $1");
        sqlx::query_as(&sql)
            .bind(query.id)
            .fetch_optional(&self.pool)
            .await
    }
}

#[derive(Debug, Clone)]
pub struct ListDeliveryTries {
    pub attempt_id: Uuid,
}

impl Processor<ListDeliveryTries> for DatabaseProcessor {
    type Output = Vec<DeliveryTryRow>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListDeliveryTries")]
    async fn process(&self, query: ListDeliveryTries) -> Result<Vec<DeliveryTryRow>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT attempt_id, try_number, response_code, error, tried_at
            FROM webhook_delivery_tries
            WHERE attempt_id = $1
            ORDER BY id
            "#,
        )
        .bind(query.attempt_id)
        .fetch_all(&self.pool)
        .await
    }
}
