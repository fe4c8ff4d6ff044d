//! WebhookDispatcher processor.
//!
//! - Receives `DomainEvent`s and fans each out into one delivery attempt
//!   per matching active subscription
//! - Claims due attempts and POSTs them through a `WebhookTransport`
//! - Schedules retries on `WebhookBackoff` until the attempt's budget runs out

use crate::config::DispatcherConfig;
use crate::entities::{DeliveryOutcome, DeliveryState, WebhookDeliveryAttempt};
use crate::events::{DomainEvent, DomainEventReceiver};
use crate::ports::{DeliveryRepository, SubscriptionStore};
use crate::processors::webhook_transport::{
    DispatchError, WebhookRequest, WebhookTransport, truncate_body,
};
use futures_util::StreamExt;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{Notify, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Fan-out and delivery, usable without the background loop.
#[derive(Clone)]
pub struct DeliveryEngine {
    subscriptions: Arc<dyn SubscriptionStore>,
    deliveries: Arc<dyn DeliveryRepository>,
    transport: Arc<dyn WebhookTransport>,
    config: DispatcherConfig,
    wake: Arc<Notify>,
}

impl DeliveryEngine {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        deliveries: Arc<dyn DeliveryRepository>,
        transport: Arc<dyn WebhookTransport>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            subscriptions,
            deliveries,
            transport,
            config,
            wake: Arc::new(Notify::new()),
        }
    }

    /// Create one attempt per subscription interested in `event`.
    pub async fn enqueue(&self, event: &DomainEvent) -> Result<usize, DispatchError> {
        let subscriptions = self
            .subscriptions
            .list_active_subscriptions(event.account_id, event.name)
            .await?;
        let subscriptions: Vec<_> = subscriptions
            .into_iter()
            .filter(|s| s.subscribes_to(event.name))
            .collect();
        if subscriptions.is_empty() {
            debug!(payment = %event.payment_reference, event = %event.name, "No subscribers");
            return Ok(0);
        }

        let body = serde_json::to_string(&event.webhook_payload())?;
        let now = OffsetDateTime::now_utc();
        let attempts: Vec<_> = subscriptions
            .iter()
            .map(|subscription| {
                WebhookDeliveryAttempt::new(
                    subscription,
                    event.name,
                    Some(event.payment_reference.clone()),
                    body.clone(),
                    now,
                )
            })
            .collect();
        self.deliveries.insert_attempts(&attempts).await?;

        debug!(
            payment = %event.payment_reference,
            event = %event.name,
            attempts = attempts.len(),
            "Webhook deliveries enqueued"
        );
        Ok(attempts.len())
    }

    /// Claim one batch of due attempts and try each once.
    ///
    /// The batch finishes before the next claim, so tries of one attempt
    /// never overlap.
    pub async fn deliver_due(&self, now: OffsetDateTime) -> Result<usize, DispatchError> {
        let claimed = self
            .deliveries
            .claim_due(now, self.config.claim_lease, self.config.batch_size)
            .await?;
        let count = claimed.len();
        if count == 0 {
            return Ok(0);
        }

        futures_util::stream::iter(claimed)
            .for_each_concurrent(self.config.concurrency.max(1), |attempt| async move {
                let id = attempt.id;
                if let Err(e) = self.deliver_attempt(attempt).await {
                    error!(attempt = %id, error = %e, "Failed to record webhook try");
                }
            })
            .await;
        Ok(count)
    }

    /// POST one attempt and persist the outcome of the try.
    pub async fn deliver_attempt(
        &self,
        attempt: WebhookDeliveryAttempt,
    ) -> Result<DeliveryOutcome, DispatchError> {
        let try_number = attempt.attempt_count.saturating_add(1);
        let subscription = self
            .subscriptions
            .get_subscription(attempt.subscription_id)
            .await?
            .filter(|s| s.active);

        let mut retryable = true;
        let (response_code, response_body, error) = match subscription {
            Some(subscription) => {
                let request = WebhookRequest::signed(
                    subscription.target_url.clone(),
                    attempt.event,
                    attempt.payload.clone(),
                    &subscription.secret,
                );
                match self.transport.send(&request).await {
                    Ok(response) => (Some(response.status), Some(truncate_body(response.body)), None),
                    Err(e) => (None, None, Some(e.to_string())),
                }
            }
            None => {
                retryable = false;
                (None, None, Some("subscription inactive or removed".to_owned()))
            }
        };

        let tried_at = OffsetDateTime::now_utc();
        let delivered = response_code.is_some_and(|code| (200..300).contains(&code));
        let state = if delivered {
            DeliveryState::Delivered
        } else if !retryable || try_number >= attempt.max_attempts {
            DeliveryState::Failed
        } else {
            DeliveryState::Retry {
                next_retry_at: tried_at + self.config.backoff.delay_after(try_number),
            }
        };

        let outcome = DeliveryOutcome {
            attempt_id: attempt.id,
            attempt_count: try_number,
            state,
            response_code,
            response_body,
            error,
            tried_at,
        };
        self.deliveries.record_outcome(&outcome).await?;

        match outcome.state {
            DeliveryState::Delivered => info!(
                attempt = %attempt.id,
                event = %attempt.event,
                tries = try_number,
                "Webhook delivered"
            ),
            DeliveryState::Retry { next_retry_at } => warn!(
                attempt = %attempt.id,
                status = ?outcome.response_code,
                error = ?outcome.error,
                tries = try_number,
                next_retry_at = %next_retry_at,
                "Webhook delivery failed, retry scheduled"
            ),
            DeliveryState::Failed => error!(
                attempt = %attempt.id,
                status = ?outcome.response_code,
                error = ?outcome.error,
                tries = try_number,
                "Webhook delivery failed permanently"
            ),
        }
        Ok(outcome)
    }

    /// Queue a new attempt with the body of a finished one.
    ///
    /// Delivered and failed attempts are never touched again; the copy gets
    /// its own id, its own try history and a full budget.
    pub async fn redeliver(&self, attempt_id: Uuid) -> Result<WebhookDeliveryAttempt, DispatchError> {
        let original = self
            .deliveries
            .get_attempt(attempt_id)
            .await?
            .ok_or(DispatchError::AttemptNotFound(attempt_id))?;
        if !original.is_terminal() {
            return Err(DispatchError::AttemptInFlight(attempt_id));
        }

        let attempt = original.redelivery(OffsetDateTime::now_utc());
        self.deliveries
            .insert_attempts(std::slice::from_ref(&attempt))
            .await?;
        info!(original = %attempt_id, attempt = %attempt.id, "Webhook redelivery queued");
        self.wake.notify_one();
        Ok(attempt)
    }

    pub fn deliveries(&self) -> &Arc<dyn DeliveryRepository> {
        &self.deliveries
    }
}

/// Background loop around a `DeliveryEngine`.
pub struct WebhookDispatcher {
    engine: DeliveryEngine,
    event_rx: DomainEventReceiver,
    shutdown_rx: watch::Receiver<bool>,
}

impl WebhookDispatcher {
    pub fn new(
        engine: DeliveryEngine,
        event_rx: DomainEventReceiver,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            engine,
            event_rx,
            shutdown_rx,
        }
    }

    pub async fn run(mut self) {
        info!("WebhookDispatcher started");

        let mut poll = tokio::time::interval(self.engine.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let wake = self.engine.wake.clone();

        loop {
            tokio::select! {
                biased;

                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!("WebhookDispatcher received shutdown signal");
                        break;
                    }
                }

                Some(event) = self.event_rx.recv() => {
                    debug!(payment = %event.payment_reference, event = %event.name, "Received DomainEvent");
                    if let Err(e) = self.engine.enqueue(&event).await {
                        error!(payment = %event.payment_reference, error = %e, "Failed to enqueue webhook deliveries");
                    }
                    self.deliver_due().await;
                }

                _ = wake.notified() => self.deliver_due().await,

                _ = poll.tick() => self.deliver_due().await,
            }
        }

        info!("WebhookDispatcher shutdown complete");
    }

    async fn deliver_due(&self) {
        if let Err(e) = self.engine.deliver_due(OffsetDateTime::now_utc()).await {
            error!(error = %e, "Failed to claim due webhook deliveries");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WebhookBackoff;
    use crate::entities::{PaymentStatus, WebhookSubscription};
    use crate::processors::webhook_transport::WebhookResponse;
    use crate::store::memory::{InMemoryDeliveryRepository, InMemorySubscriptionStore};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use payrail_sdk::objects::EventName;
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;
    use std::time::Duration;
    use url::Url;

    /// Replays scripted status codes, then answers 200.
    #[derive(Default)]
    struct ScriptedTransport {
        statuses: Mutex<VecDeque<u16>>,
        sent: Mutex<Vec<WebhookRequest>>,
    }

    impl ScriptedTransport {
        fn with(statuses: &[u16]) -> Arc<Self> {
            Arc::new(Self {
                statuses: Mutex::new(statuses.iter().copied().collect()),
                sent: Mutex::default(),
            })
        }
    }

    #[async_trait]
    impl WebhookTransport for ScriptedTransport {
        async fn send(&self, request: &WebhookRequest) -> Result<WebhookResponse, DispatchError> {
            self.sent.lock().push(request.clone());
            let status = self.statuses.lock().pop_front().unwrap_or(200);
            Ok(WebhookResponse {
                status,
                body: String::new(),
            })
        }
    }

    struct Fixture {
        engine: DeliveryEngine,
        deliveries: Arc<InMemoryDeliveryRepository>,
        subscriptions: Arc<InMemorySubscriptionStore>,
        subscription: WebhookSubscription,
    }

    async fn fixture(transport: Arc<ScriptedTransport>, max_attempts: u32) -> Fixture {
        let subscriptions = Arc::new(InMemorySubscriptionStore::default());
        let deliveries = Arc::new(InMemoryDeliveryRepository::default());
        let subscription = WebhookSubscription {
            id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            target_url: Url::parse("https://merchant.test/hooks").unwrap(),
            events: [EventName::PaymentCompleted, EventName::PaymentFailed]
                .into_iter()
                .collect(),
            secret: "whsec".to_owned(),
            active: true,
            max_attempts,
        };
        subscriptions.add(subscription.clone()).await;
        let config = DispatcherConfig {
            backoff: WebhookBackoff {
                unit: Duration::from_secs(60),
                base: 5,
                max: Duration::from_secs(3600),
            },
            ..DispatcherConfig::default()
        };
        let engine = DeliveryEngine::new(subscriptions.clone(), deliveries.clone(), transport, config);
        Fixture {
            engine,
            deliveries,
            subscriptions,
            subscription,
        }
    }

    fn event(account_id: Uuid, name: EventName) -> DomainEvent {
        DomainEvent {
            name,
            payment_reference: "pay_test".to_owned(),
            account_id,
            amount: dec!(50.00),
            currency: "USD".into(),
            status: PaymentStatus::Completed,
            occurred_at: OffsetDateTime::now_utc(),
            correlation_id: Uuid::new_v4(),
        }
    }

    /// Deliver everything that becomes due, jumping the clock past each retry.
    async fn drain(engine: &DeliveryEngine) {
        let mut now = OffsetDateTime::now_utc();
        for _ in 0..10 {
            engine.deliver_due(now).await.unwrap();
            now += Duration::from_secs(24 * 3600);
        }
    }

    #[tokio::test]
    async fn test_only_subscribed_events_are_enqueued() {
        let fx = fixture(ScriptedTransport::with(&[]), 3).await;
        let account = fx.subscription.account_id;
        assert_eq!(fx.engine.enqueue(&event(account, EventName::PaymentCompleted)).await.unwrap(), 1);
        assert_eq!(fx.engine.enqueue(&event(account, EventName::PaymentRefunded)).await.unwrap(), 0);
        assert_eq!(fx.engine.enqueue(&event(Uuid::new_v4(), EventName::PaymentCompleted)).await.unwrap(), 0);
        assert_eq!(fx.deliveries.attempts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_success_on_third_try_counts_three() {
        let transport = ScriptedTransport::with(&[500, 500, 200]);
        let fx = fixture(transport.clone(), 5).await;
        fx.engine
            .enqueue(&event(fx.subscription.account_id, EventName::PaymentCompleted))
            .await
            .unwrap();

        drain(&fx.engine).await;

        let attempt = fx.deliveries.attempts().await.remove(0);
        assert_eq!(attempt.attempt_count, 3);
        assert!(attempt.delivered_at.is_some());
        assert!(attempt.failed_at.is_none());

        let tries = fx.deliveries.tries(attempt.id).await.unwrap();
        let codes: Vec<_> = tries.iter().map(|t| t.response_code).collect();
        assert_eq!(codes, vec![Some(500), Some(500), Some(200)]);
        assert_eq!(transport.sent.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_fails_permanently() {
        let transport = ScriptedTransport::with(&[500, 502, 503, 500, 500]);
        let fx = fixture(transport.clone(), 3).await;
        fx.engine
            .enqueue(&event(fx.subscription.account_id, EventName::PaymentFailed))
            .await
            .unwrap();

        drain(&fx.engine).await;

        let attempt = fx.deliveries.attempts().await.remove(0);
        assert_eq!(attempt.attempt_count, 3);
        assert!(attempt.failed_at.is_some());
        assert!(attempt.delivered_at.is_none());
        assert_eq!(attempt.last_response_code, Some(503));
        assert_eq!(transport.sent.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_retry_follows_backoff_schedule() {
        let fx = fixture(ScriptedTransport::with(&[500]), 5).await;
        fx.engine
            .enqueue(&event(fx.subscription.account_id, EventName::PaymentCompleted))
            .await
            .unwrap();

        let now = OffsetDateTime::now_utc();
        fx.engine.deliver_due(now).await.unwrap();

        let attempt = fx.deliveries.attempts().await.remove(0);
        let next = attempt.next_retry_at.unwrap();
        assert!(next >= now + Duration::from_secs(60));
        assert!(next < now + Duration::from_secs(120));
        // Not due yet.
        assert_eq!(fx.engine.deliver_due(now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_payload_is_signed_with_subscription_secret() {
        let transport = ScriptedTransport::with(&[]);
        let fx = fixture(transport.clone(), 3).await;
        fx.engine
            .enqueue(&event(fx.subscription.account_id, EventName::PaymentCompleted))
            .await
            .unwrap();
        fx.engine.deliver_due(OffsetDateTime::now_utc()).await.unwrap();

        let request = transport.sent.lock().remove(0);
        let payload: payrail_sdk::objects::WebhookPayload = payrail_sdk::signature::verify_webhook(
            &request.signature,
            &request.body,
            b"whsec",
        )
        .unwrap();
        assert_eq!(payload.payment_reference, "pay_test");
        assert_eq!(payload.event, EventName::PaymentCompleted);
        assert_eq!(payload.amount, "50.00");
    }

    #[tokio::test]
    async fn test_deactivated_subscription_fails_attempt() {
        let transport = ScriptedTransport::with(&[]);
        let fx = fixture(transport.clone(), 3).await;
        fx.engine
            .enqueue(&event(fx.subscription.account_id, EventName::PaymentCompleted))
            .await
            .unwrap();
        fx.subscriptions
            .add(WebhookSubscription {
                active: false,
                ..fx.subscription.clone()
            })
            .await;

        fx.engine.deliver_due(OffsetDateTime::now_utc()).await.unwrap();

        let attempt = fx.deliveries.attempts().await.remove(0);
        assert!(attempt.failed_at.is_some());
        assert!(transport.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_redeliver_queues_copy_of_failed_attempt() {
        let transport = ScriptedTransport::with(&[500, 500]);
        let fx = fixture(transport.clone(), 2).await;
        fx.engine
            .enqueue(&event(fx.subscription.account_id, EventName::PaymentCompleted))
            .await
            .unwrap();
        drain(&fx.engine).await;
        let failed = fx.deliveries.attempts().await.remove(0);
        assert!(failed.failed_at.is_some());

        let copy = fx.engine.redeliver(failed.id).await.unwrap();
        assert_ne!(copy.id, failed.id);
        assert_eq!(copy.attempt_count, 0);
        assert_eq!(copy.payload, failed.payload);

        fx.engine.deliver_due(OffsetDateTime::now_utc()).await.unwrap();

        // The failed attempt is unchanged.
        let original = fx.deliveries.get_attempt(failed.id).await.unwrap().unwrap();
        assert_eq!(original, failed);
        let tries: Vec<_> = fx
            .deliveries
            .tries(failed.id)
            .await
            .unwrap()
            .iter()
            .map(|t| t.try_number)
            .collect();
        assert_eq!(tries, vec![1, 2]);

        let redelivered = fx.deliveries.get_attempt(copy.id).await.unwrap().unwrap();
        assert!(redelivered.delivered_at.is_some());
        assert_eq!(redelivered.attempt_count, 1);
        assert_eq!(fx.deliveries.tries(copy.id).await.unwrap().len(), 1);
        assert_eq!(fx.deliveries.attempts().await.len(), 2);
        assert_eq!(transport.sent.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_redeliver_leaves_delivered_attempt_intact() {
        let transport = ScriptedTransport::with(&[200]);
        let fx = fixture(transport.clone(), 3).await;
        fx.engine
            .enqueue(&event(fx.subscription.account_id, EventName::PaymentCompleted))
            .await
            .unwrap();
        fx.engine.deliver_due(OffsetDateTime::now_utc()).await.unwrap();
        let delivered = fx.deliveries.attempts().await.remove(0);
        assert!(delivered.delivered_at.is_some());

        let copy = fx.engine.redeliver(delivered.id).await.unwrap();
        fx.engine.deliver_due(OffsetDateTime::now_utc()).await.unwrap();

        let original = fx.deliveries.get_attempt(delivered.id).await.unwrap().unwrap();
        assert_eq!(original, delivered);
        assert_eq!(fx.deliveries.tries(delivered.id).await.unwrap().len(), 1);
        assert_eq!(fx.deliveries.tries(copy.id).await.unwrap()[0].try_number, 1);
        assert_eq!(transport.sent.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_redeliver_rejects_pending_attempt() {
        let fx = fixture(ScriptedTransport::with(&[500]), 3).await;
        fx.engine
            .enqueue(&event(fx.subscription.account_id, EventName::PaymentCompleted))
            .await
            .unwrap();
        fx.engine.deliver_due(OffsetDateTime::now_utc()).await.unwrap();
        let pending = fx.deliveries.attempts().await.remove(0);
        assert!(!pending.is_terminal());

        assert!(matches!(
            fx.engine.redeliver(pending.id).await,
            Err(DispatchError::AttemptInFlight(id)) if id == pending.id
        ));
        assert_eq!(fx.deliveries.attempts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_redeliver_unknown_attempt() {
        let fx = fixture(ScriptedTransport::with(&[]), 2).await;
        let id = Uuid::new_v4();
        assert!(matches!(
            fx.engine.redeliver(id).await,
            Err(DispatchError::AttemptNotFound(missing)) if missing == id
        ));
    }
}
