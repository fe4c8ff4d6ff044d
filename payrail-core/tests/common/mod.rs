#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use payrail_core::config::{ConfigStore, RiskPolicy};
use payrail_core::entities::{AccountSnapshot, AccountStatus, NewPayment, Payment, StatusHistoryEntry};
use payrail_core::events::{
    DomainEvent, DomainEventReceiver, EventSenders, ProcessRequestReceiver, domain_event_channel,
    process_request_channel,
};
use payrail_core::gateway::{
    CircuitBreaker, CircuitBreakerConfig, GatewayCallError, GatewayClient, RetryPolicy,
    SettlementGateway,
};
use payrail_core::ports::{LedgerAdapter, PaymentRepository};
use payrail_core::processors::{PaymentProcessor, PaymentProcessorDeps};
use payrail_core::risk::OffHours;
use payrail_core::store::memory::{
    InMemoryAccountDirectory, InMemoryAuditSink, InMemoryLedger, InMemoryPaymentRepository,
};
use payrail_core::RequestContext;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

/// Settlement gateway that replays scripted answers.
pub struct ScriptedGateway {
    charges: Mutex<VecDeque<Result<bool, GatewayCallError>>>,
    refunds: Mutex<VecDeque<Result<bool, GatewayCallError>>>,
    default_charge: Result<bool, GatewayCallError>,
    default_refund: Result<bool, GatewayCallError>,
    charge_calls: AtomicU32,
    refund_calls: AtomicU32,
}

impl ScriptedGateway {
    pub fn approving() -> Self {
        Self::always(Ok(true), Ok(true))
    }

    pub fn always(
        charge: Result<bool, GatewayCallError>,
        refund: Result<bool, GatewayCallError>,
    ) -> Self {
        Self {
            charges: Mutex::default(),
            refunds: Mutex::default(),
            default_charge: charge,
            default_refund: refund,
            charge_calls: AtomicU32::new(0),
            refund_calls: AtomicU32::new(0),
        }
    }

    pub fn script_charges(&self, answers: impl IntoIterator<Item = Result<bool, GatewayCallError>>) {
        self.charges.lock().extend(answers);
    }

    pub fn script_refunds(&self, answers: impl IntoIterator<Item = Result<bool, GatewayCallError>>) {
        self.refunds.lock().extend(answers);
    }

    pub fn charge_calls(&self) -> u32 {
        self.charge_calls.load(Ordering::SeqCst)
    }

    pub fn refund_calls(&self) -> u32 {
        self.refund_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SettlementGateway for ScriptedGateway {
    async fn charge(&self, _payment: &Payment) -> Result<bool, GatewayCallError> {
        self.charge_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.charges.lock().pop_front();
        scripted.unwrap_or_else(|| self.default_charge.clone())
    }

    async fn refund(&self, _payment: &Payment, _amount: Decimal) -> Result<bool, GatewayCallError> {
        self.refund_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.refunds.lock().pop_front();
        scripted.unwrap_or_else(|| self.default_refund.clone())
    }
}

/// Scoring without the time-of-day factor, so results do not depend on
/// when the suite runs.
pub fn daytime_policy() -> RiskPolicy {
    RiskPolicy {
        off_hours: OffHours {
            start_hour: 0,
            end_hour: 0,
            points: 0,
        },
        ..RiskPolicy::default()
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        multiplier: 2.0,
        jitter: false,
    }
}

pub struct Harness {
    pub processor: PaymentProcessor,
    pub payments: Arc<InMemoryPaymentRepository>,
    pub ledger: Arc<InMemoryLedger>,
    pub accounts: Arc<InMemoryAccountDirectory>,
    pub audit: Arc<InMemoryAuditSink>,
    pub gateway: Arc<ScriptedGateway>,
    pub breaker: Arc<CircuitBreaker>,
    pub risk_policy: ConfigStore<RiskPolicy>,
    pub events: DomainEventReceiver,
    pub requests: Option<ProcessRequestReceiver>,
}

pub struct HarnessBuilder {
    gateway: ScriptedGateway,
    ledger: Option<Arc<dyn LedgerAdapter>>,
    payments: Option<Arc<dyn PaymentRepository>>,
    settlement: Option<Arc<dyn SettlementGateway>>,
    retry: RetryPolicy,
}

impl HarnessBuilder {
    pub fn gateway(mut self, gateway: ScriptedGateway) -> Self {
        self.gateway = gateway;
        self
    }

    /// Replace the ledger the processor talks to; `Harness::ledger` still
    /// refers to the in-memory book.
    pub fn ledger(mut self, ledger: Arc<dyn LedgerAdapter>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Replace the payment repository the processor talks to;
    /// `Harness::payments` still refers to the in-memory store.
    pub fn payments(mut self, payments: Arc<dyn PaymentRepository>) -> Self {
        self.payments = Some(payments);
        self
    }

    /// Put a different gateway behind the client; `Harness::gateway` then
    /// sees no calls.
    pub fn settlement(mut self, settlement: Arc<dyn SettlementGateway>) -> Self {
        self.settlement = Some(settlement);
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn build(self) -> Harness {
        let payments = Arc::new(InMemoryPaymentRepository::default());
        let ledger = Arc::new(InMemoryLedger::default());
        let accounts = Arc::new(InMemoryAccountDirectory::default());
        let audit = Arc::new(InMemoryAuditSink::default());
        let gateway = Arc::new(self.gateway);
        let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default()));
        let risk_policy = ConfigStore::new(daytime_policy());

        let (event_tx, event_rx) = domain_event_channel();
        let (request_tx, request_rx) = process_request_channel();

        let processor_ledger: Arc<dyn LedgerAdapter> = match self.ledger {
            Some(replacement) => replacement,
            None => ledger.clone(),
        };
        let processor_payments: Arc<dyn PaymentRepository> = match self.payments {
            Some(replacement) => replacement,
            None => payments.clone(),
        };
        let settlement: Arc<dyn SettlementGateway> = match self.settlement {
            Some(replacement) => replacement,
            None => gateway.clone(),
        };
        let processor = PaymentProcessor::new(PaymentProcessorDeps {
            payments: processor_payments,
            ledger: processor_ledger,
            accounts: accounts.clone(),
            audit: audit.clone(),
            gateway: GatewayClient::new(
                settlement,
                self.retry,
                breaker.clone(),
                Duration::from_secs(2),
            ),
            risk_policy: risk_policy.clone(),
            events: EventSenders::new(event_tx, request_tx),
        });

        Harness {
            processor,
            payments,
            ledger,
            accounts,
            audit,
            gateway,
            breaker,
            risk_policy,
            events: event_rx,
            requests: Some(request_rx),
        }
    }
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            gateway: ScriptedGateway::approving(),
            ledger: None,
            payments: None,
            settlement: None,
            retry: fast_retry(),
        }
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn ctx() -> RequestContext {
        RequestContext::new("test")
    }

    /// An active account of the given age with the given balance.
    pub async fn open_account(&self, age: time::Duration, balance: Decimal) -> Uuid {
        let account_id = Uuid::new_v4();
        self.accounts
            .upsert(AccountSnapshot {
                account_id,
                status: AccountStatus::Active,
                created_at: OffsetDateTime::now_utc() - age,
            })
            .await;
        self.ledger.open_account(account_id, balance).await;
        account_id
    }

    pub async fn create(&self, account_id: Uuid, amount: Decimal) -> Payment {
        self.processor
            .create_payment(&Self::ctx(), new_payment(account_id, amount))
            .await
            .expect("payment should be created")
    }

    pub fn drain_events(&mut self) -> Vec<DomainEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    pub async fn history(&self, reference: &str) -> Vec<StatusHistoryEntry> {
        self.processor.history(reference).await.expect("history")
    }
}

pub fn new_payment(account_id: Uuid, amount: Decimal) -> NewPayment {
    NewPayment {
        account_id,
        amount,
        currency: "USD".into(),
        payment_method_id: Some("pm_card".to_owned()),
        expires_at: None,
        metadata: HashMap::new(),
    }
}

/// The history must start at PENDING and follow allowed edges only.
pub fn assert_valid_walk(history: &[StatusHistoryEntry]) {
    let first = history.first().expect("history is never empty");
    assert_eq!(first.from_status, None);
    assert_eq!(first.sequence, 1);
    for pair in history.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        assert_eq!(next.sequence, prev.sequence + 1);
        assert_eq!(next.from_status, Some(prev.to_status));
        assert!(
            prev.to_status.can_transition_to(next.to_status),
            "{} -> {} is not an allowed edge",
            prev.to_status,
            next.to_status
        );
    }
}
