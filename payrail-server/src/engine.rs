//! Wiring of the engine: stores, gateway client, processor and the two
//! background processors.

use crate::config::LoadedConfig;
use crate::config::file::DevConfig;
use crate::state::AppState;
use payrail_core::RequestContext;
use payrail_core::config::{ConfigStore, RiskPolicy};
use payrail_core::entities::{AccountSnapshot, AccountStatus, WebhookSubscription};
use payrail_core::events::{EventSenders, domain_event_channel, process_request_channel};
use payrail_core::framework::DatabaseProcessor;
use payrail_core::gateway::{CircuitBreaker, GatewayClient, HttpSettlementGateway};
use payrail_core::ports::{
    AccountDirectory, AuditSink, DeliveryRepository, LedgerAdapter, PaymentRepository,
    SubscriptionStore,
};
use payrail_core::processors::{
    DeliveryEngine, PaymentProcessor, PaymentProcessorDeps, PaymentWorker,
    ReqwestWebhookTransport, WebhookDispatcher,
};
use payrail_core::store::cache::{CachedAccountDirectory, TtlCache};
use payrail_core::store::memory::{
    InMemoryAccountDirectory, InMemoryAuditSink, InMemoryDeliveryRepository, InMemoryLedger,
    InMemoryPaymentRepository, InMemorySubscriptionStore,
};
use payrail_core::store::postgres::PostgresStore;
use sqlx::PgPool;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// The storage behind every port.
#[derive(Clone)]
pub struct Backends {
    pub payments: Arc<dyn PaymentRepository>,
    pub ledger: Arc<dyn LedgerAdapter>,
    pub accounts: Arc<dyn AccountDirectory>,
    pub subscriptions: Arc<dyn SubscriptionStore>,
    pub deliveries: Arc<dyn DeliveryRepository>,
    pub audit: Arc<dyn AuditSink>,
}

impl Backends {
    pub fn postgres(pool: PgPool) -> Self {
        let store = Arc::new(PostgresStore::new(DatabaseProcessor::new(pool)));
        Self {
            payments: store.clone(),
            ledger: store.clone(),
            accounts: store.clone(),
            subscriptions: store.clone(),
            deliveries: store.clone(),
            audit: store,
        }
    }

    /// In-process stores seeded from the `[dev]` section.
    pub async fn in_memory(dev: &DevConfig) -> Self {
        let ledger = Arc::new(InMemoryLedger::default());
        let accounts = Arc::new(InMemoryAccountDirectory::default());
        let subscriptions = Arc::new(InMemorySubscriptionStore::default());
        let now = OffsetDateTime::now_utc();

        for account in &dev.accounts {
            accounts
                .upsert(AccountSnapshot {
                    account_id: account.id,
                    status: AccountStatus::Active,
                    created_at: now - time::Duration::days(i64::from(account.age_days)),
                })
                .await;
            ledger.open_account(account.id, account.balance).await;
        }
        for subscription in &dev.subscriptions {
            subscriptions
                .add(WebhookSubscription {
                    id: Uuid::new_v4(),
                    account_id: subscription.account_id,
                    target_url: subscription.url.clone(),
                    events: subscription.events.iter().copied().collect(),
                    secret: subscription.secret.clone(),
                    active: true,
                    max_attempts: subscription.max_attempts,
                })
                .await;
        }
        tracing::info!(
            accounts = dev.accounts.len(),
            subscriptions = dev.subscriptions.len(),
            "In-memory stores seeded"
        );

        Self {
            payments: Arc::new(InMemoryPaymentRepository::default()),
            ledger,
            accounts,
            subscriptions,
            deliveries: Arc::new(InMemoryDeliveryRepository::default()),
            audit: Arc::new(InMemoryAuditSink::default()),
        }
    }
}

/// Actor recorded on history entries written by the startup sweep.
pub const RECOVERY_ACTOR: &str = "recovery";

/// A running engine.
pub struct Engine {
    pub state: AppState,
    /// Hot-reloadable risk policy, shared with the processor.
    pub risk_policy: ConfigStore<RiskPolicy>,
    tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Build the processor and spawn the payment worker and the webhook
    /// dispatcher. Both stop once `shutdown_rx` turns `true`.
    ///
    /// A recovery sweep runs in the background once the worker is up: it
    /// requeues PENDING payments and fails PROCESSING ones left by a
    /// previous run.
    pub fn start(
        config: &LoadedConfig,
        backends: Backends,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("payrail/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let gateway = GatewayClient::new(
            Arc::new(HttpSettlementGateway::new(
                http.clone(),
                config.gateway.base_url.clone(),
                config.gateway.api_key.clone(),
            )),
            config.gateway.retry.clone(),
            Arc::new(CircuitBreaker::new(config.gateway.circuit_breaker.clone())),
            config.gateway.call_timeout,
        );

        let accounts = Arc::new(CachedAccountDirectory::new(
            backends.accounts,
            Arc::new(TtlCache::<Uuid, AccountSnapshot>::new()),
            config.worker.account_cache_ttl,
        ));

        let risk_policy = ConfigStore::new(config.risk.clone());
        let (event_tx, event_rx) = domain_event_channel();
        let (request_tx, request_rx) = process_request_channel();

        let processor = PaymentProcessor::new(PaymentProcessorDeps {
            payments: backends.payments,
            ledger: backends.ledger,
            accounts,
            audit: backends.audit,
            gateway,
            risk_policy: risk_policy.clone(),
            events: EventSenders::new(event_tx, request_tx),
        });

        let deliveries = DeliveryEngine::new(
            backends.subscriptions,
            backends.deliveries,
            Arc::new(ReqwestWebhookTransport::new(
                http,
                config.dispatcher.request_timeout,
            )),
            config.dispatcher.clone(),
        );

        let worker = PaymentWorker::new(
            processor.clone(),
            request_rx,
            shutdown_rx.clone(),
            &config.worker,
        );
        let dispatcher = WebhookDispatcher::new(deliveries.clone(), event_rx, shutdown_rx);
        let mut tasks = vec![tokio::spawn(worker.run()), tokio::spawn(dispatcher.run())];
        tasks.push(tokio::spawn(recover(
            processor.clone(),
            config.worker.stale_processing_after,
        )));

        Ok(Self {
            state: AppState::new(processor, deliveries),
            risk_policy,
            tasks,
        })
    }

    /// Wait for the background processors to finish.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Background processor panicked");
            }
        }
    }
}

async fn recover(processor: PaymentProcessor, stale_after: std::time::Duration) {
    let ctx = RequestContext::new(RECOVERY_ACTOR);
    if let Err(e) = processor.recover(&ctx, stale_after).await {
        tracing::error!(error = %e, "Startup recovery failed; PENDING payments wait for an explicit process call");
    }
}
