//! PaymentWorker processor.
//!
//! Receives `ProcessRequest`s and runs `PaymentProcessor::process` for each,
//! with at most `max_concurrency` payments in flight.

use crate::config::WorkerConfig;
use crate::context::RequestContext;
use crate::error::PaymentError;
use crate::events::{ProcessRequest, ProcessRequestReceiver};
use crate::processors::payment_processor::PaymentProcessor;
use std::sync::Arc;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

pub const WORKER_ACTOR: &str = "payment-worker";

pub struct PaymentWorker {
    processor: PaymentProcessor,
    process_rx: ProcessRequestReceiver,
    shutdown_rx: watch::Receiver<bool>,
    permits: Arc<Semaphore>,
    in_flight: JoinSet<()>,
}

impl PaymentWorker {
    pub fn new(
        processor: PaymentProcessor,
        process_rx: ProcessRequestReceiver,
        shutdown_rx: watch::Receiver<bool>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            processor,
            process_rx,
            shutdown_rx,
            permits: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            in_flight: JoinSet::new(),
        }
    }

    pub async fn run(mut self) {
        info!("PaymentWorker started");

        loop {
            tokio::select! {
                biased;

                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!("PaymentWorker received shutdown signal");
                        break;
                    }
                }

                Some(request) = self.process_rx.recv() => {
                    debug!(payment = %request.reference, "Received ProcessRequest");
                    self.spawn(request).await;
                }

                // Reap finished tasks so the set does not grow unbounded.
                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Payment task panicked");
                    }
                }

                else => {
                    info!("ProcessRequest channel closed");
                    break;
                }
            }
        }

        let remaining = self.in_flight.len();
        if remaining > 0 {
            info!(remaining, "Waiting for in-flight payments");
        }
        while let Some(joined) = self.in_flight.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Payment task panicked");
            }
        }

        info!("PaymentWorker shutdown complete");
    }

    async fn spawn(&mut self, request: ProcessRequest) {
        let Ok(permit) = self.permits.clone().acquire_owned().await else {
            error!("Worker semaphore closed");
            return;
        };
        let processor = self.processor.clone();
        self.in_flight.spawn(async move {
            let _permit = permit;
            let ctx = RequestContext::with_correlation_id(request.correlation_id, WORKER_ACTOR);
            match processor.process(&ctx, &request.reference).await {
                Ok(outcome) => match outcome.failure {
                    None => debug!(payment = %request.reference, "Payment processed"),
                    Some(reason) => debug!(payment = %request.reference, reason = %reason, "Payment rejected"),
                },
                // Already handled through another path, e.g. an explicit
                // process call or a cancel.
                Err(PaymentError::InvalidStateTransition { from, .. }) => {
                    debug!(payment = %request.reference, status = %from, "Payment no longer pending, skipped");
                }
                Err(e) => warn!(payment = %request.reference, error = %e, "Payment processing failed"),
            }
        });
    }
}
