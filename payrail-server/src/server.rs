//! Axum server setup and router configuration.

use crate::api;
use crate::shutdown::shutdown_signal;
use crate::state::AppState;
use axum::{Json, Router, response::IntoResponse, routing::get};
use serde::Serialize;
use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Build the main application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .merge(api::router())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Run the server with graceful shutdown support.
pub async fn run_server(router: Router, addr: SocketAddr) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoadedConfig;
    use crate::config::file::{DevAccount, DevConfig};
    use crate::engine::{Backends, Engine};
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use payrail_core::config::{DispatcherConfig, GatewayConfig, ServerConfig, WorkerConfig};
    use payrail_core::gateway::{CircuitBreakerConfig, RetryPolicy};
    use payrail_core::risk::{OffHours, RiskPolicy};
    use payrail_sdk::objects::{
        PaymentResponse, PaymentStatus, ProcessPaymentResponse, StatusHistoryResponse,
    };
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::watch;
    use tower::ServiceExt;
    use url::Url;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct TestApp {
        router: Router,
        account: Uuid,
        shutdown_tx: watch::Sender<bool>,
        engine: Engine,
        _gateway: MockServer,
    }

    async fn app(approved: bool) -> TestApp {
        let gateway = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/charges"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "approved": approved })))
            .mount(&gateway)
            .await;
        Mock::given(method("POST"))
            .and(path("/refunds"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "approved": true })))
            .mount(&gateway)
            .await;

        let account = Uuid::new_v4();
        let config = LoadedConfig {
            server: ServerConfig {
                listen: "127.0.0.1:0".parse().unwrap(),
            },
            gateway: GatewayConfig {
                base_url: Url::parse(&format!("{}/", gateway.uri())).unwrap(),
                api_key: None,
                call_timeout: Duration::from_secs(2),
                retry: RetryPolicy::none(),
                circuit_breaker: CircuitBreakerConfig::default(),
            },
            risk: RiskPolicy {
                off_hours: OffHours {
                    start_hour: 0,
                    end_hour: 0,
                    points: 0,
                },
                ..RiskPolicy::default()
            },
            dispatcher: DispatcherConfig::default(),
            worker: WorkerConfig::default(),
            dev: DevConfig {
                accounts: vec![DevAccount {
                    id: account,
                    balance: dec!(500),
                    age_days: 365,
                }],
                subscriptions: vec![],
            },
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let backends = Backends::in_memory(&config.dev).await;
        let engine = Engine::start(&config, backends, shutdown_rx).unwrap();
        TestApp {
            router: build_router(engine.state.clone()),
            account,
            shutdown_tx,
            engine,
            _gateway: gateway,
        }
    }

    impl TestApp {
        async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            (status, body.to_vec())
        }

        async fn post(&self, uri: &str, body: serde_json::Value) -> (StatusCode, Vec<u8>) {
            self.send(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
        }

        async fn get(&self, uri: &str) -> (StatusCode, Vec<u8>) {
            self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
        }

        async fn create(&self, amount: &str) -> PaymentResponse {
            let (status, body) = self
                .post(
                    "/payments",
                    json!({ "accountId": self.account, "amount": amount, "currency": "USD", "paymentMethodId": "pm_card" }),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED);
            serde_json::from_slice(&body).unwrap()
        }

        async fn wait_for(&self, reference: &str, wanted: PaymentStatus) -> PaymentResponse {
            for _ in 0..100 {
                let (_, body) = self.get(&format!("/payments/{reference}")).await;
                let payment: PaymentResponse = serde_json::from_slice(&body).unwrap();
                if payment.status == wanted {
                    return payment;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            panic!("payment {reference} never reached {wanted}");
        }

        async fn stop(self) {
            self.shutdown_tx.send(true).unwrap();
            self.engine.join().await;
        }
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = app(true).await;
        let (status, body) = app.get("/health").await;
        assert_eq!(status, StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["status"], "healthy");
        app.stop().await;
    }

    #[tokio::test]
    async fn test_created_payment_completes_in_background() {
        let app = app(true).await;
        let created = app.create("50.00").await;
        assert_eq!(created.status, PaymentStatus::Pending);
        assert!(created.reference.starts_with("pay_"));

        let completed = app.wait_for(&created.reference, PaymentStatus::Completed).await;
        assert_eq!(completed.amount, dec!(50.00));
        assert!(completed.risk_score.is_some());

        let (status, body) = app
            .get(&format!("/payments/{}/history", created.reference))
            .await;
        assert_eq!(status, StatusCode::OK);
        let history: Vec<StatusHistoryResponse> = serde_json::from_slice(&body).unwrap();
        let walk: Vec<_> = history.iter().map(|e| e.to_status).collect();
        assert_eq!(
            walk,
            vec![
                PaymentStatus::Pending,
                PaymentStatus::Processing,
                PaymentStatus::Completed
            ]
        );
        app.stop().await;
    }

    #[tokio::test]
    async fn test_refund_after_completion() {
        let app = app(true).await;
        let created = app.create("80").await;
        app.wait_for(&created.reference, PaymentStatus::Completed).await;

        let (status, body) = app
            .post(
                &format!("/payments/{}/refund", created.reference),
                json!({ "amount": "80", "reason": "customer request" }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        let refunded: PaymentResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(refunded.status, PaymentStatus::Refunded);
        app.stop().await;
    }

    #[tokio::test]
    async fn test_declined_charge_reports_failure_reason() {
        let app = app(false).await;
        // Stop the worker so the explicit process call does the settlement.
        app.shutdown_tx.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let created = app.create("50").await;
        let uri = format!("/payments/{}/process", created.reference);
        let (status, body) = app.post(&uri, json!({})).await;
        assert_eq!(status, StatusCode::OK);
        let outcome: ProcessPaymentResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(outcome.payment.status, PaymentStatus::Failed);
        assert_eq!(outcome.failure_reason.as_deref(), Some("gateway declined"));

        // Processing again is a state conflict, not a second settlement.
        let (status, _) = app.post(&uri, json!({})).await;
        assert_eq!(status, StatusCode::CONFLICT);
        app.engine.join().await;
    }

    #[tokio::test]
    async fn test_validation_and_lookup_errors() {
        let app = app(true).await;

        let (status, _) = app
            .post(
                "/payments",
                json!({ "accountId": app.account, "amount": "-5", "currency": "USD" }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app
            .post(
                "/payments",
                json!({ "accountId": app.account, "amount": "5", "currency": "usd" }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app.get("/payments/pay_missing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = app.get("/payments/pay_missing/history").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = app
            .post(
                &format!("/webhooks/attempts/{}/redeliver", Uuid::new_v4()),
                json!({}),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        app.stop().await;
    }

    #[tokio::test]
    async fn test_malformed_correlation_id_is_rejected() {
        let app = app(true).await;
        let request = Request::builder()
            .method("POST")
            .uri("/payments")
            .header("content-type", "application/json")
            .header("x-correlation-id", "not-a-uuid")
            .body(Body::from(
                json!({ "accountId": app.account, "amount": "5", "currency": "USD" }).to_string(),
            ))
            .unwrap();
        let (status, _) = app.send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        app.stop().await;
    }

    #[tokio::test]
    async fn test_cancel_pending_payment_with_future_expiry() {
        let app = app(true).await;
        // Stop the worker first so the payment stays PENDING.
        app.shutdown_tx.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let expires_at = time::OffsetDateTime::now_utc().unix_timestamp() + 3600;
        let (status, body) = app
            .post(
                "/payments",
                json!({ "accountId": app.account, "amount": "5", "currency": "USD", "expiresAt": expires_at }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let created: PaymentResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(created.expires_at, Some(expires_at));

        let (status, body) = app
            .post(
                &format!("/payments/{}/cancel", created.reference),
                json!({ "reason": "customer abandoned checkout" }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        let cancelled: PaymentResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(cancelled.status, PaymentStatus::Cancelled);
        app.engine.join().await;
    }
}
