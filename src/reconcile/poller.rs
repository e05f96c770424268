use crate::config::ReconcilerConfig;
use crate::gateways::error::{GatewayError, GatewayResult};
use crate::gateways::gateway::PaymentGateway;
use crate::gateways::registry::GatewayRegistry;
use crate::gateways::status::{canonicalize, CanonicalStatus};
use crate::gateways::types::GatewayKind;
use crate::orders::types::EffectContext;
use crate::reconcile::dispatcher::{DispatchError, DispatchOutcome, EffectDispatcher};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Terminal result of one reconciliation poll.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Approved(DispatchOutcome),
    Rejected,
    Cancelled,
    /// The payment itself was approved but applying its effect failed;
    /// callers should prompt a retry, not report a failed payment.
    EffectFailed { message: String },
    Error { message: String },
}

/// Cancellation handle for an in-flight poll. Cancelling (or dropping the
/// handle, or starting a newer poll for the same provider ref) guarantees no
/// further status calls and no effect dispatch from this poll, even if an
/// in-flight response arrives late.
pub struct PollHandle {
    cancel_tx: watch::Sender<bool>,
    outcome_rx: watch::Receiver<Option<PollOutcome>>,
    pub generation: u64,
}

impl PollHandle {
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    /// Current outcome, if the poll has resolved.
    pub fn outcome(&self) -> Option<PollOutcome> {
        self.outcome_rx.borrow().clone()
    }

    /// Wait until the poll resolves.
    pub async fn resolved(&mut self) -> PollOutcome {
        loop {
            if let Some(outcome) = self.outcome_rx.borrow_and_update().clone() {
                return outcome;
            }
            if self.outcome_rx.changed().await.is_err() {
                return PollOutcome::Cancelled;
            }
        }
    }
}

/// Drives client-side reconciliation: one cooperatively scheduled poll task
/// per in-flight payment, strictly sequential status checks within a task,
/// generation-tagged so a superseded poller can never apply an effect.
pub struct Reconciler {
    registry: Arc<GatewayRegistry>,
    dispatcher: Arc<EffectDispatcher>,
    config: ReconcilerConfig,
    generations: Arc<Mutex<HashMap<String, u64>>>,
}

impl Reconciler {
    pub fn new(
        registry: Arc<GatewayRegistry>,
        dispatcher: Arc<EffectDispatcher>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            config,
            generations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Begin polling a provider reference. Returns a cancellation handle.
    /// Starting a second poll for the same reference supersedes the first.
    pub fn start_reconciliation(
        &self,
        provider_ref: impl Into<String>,
        gateway_kind: GatewayKind,
        order_id: impl Into<String>,
        context: EffectContext,
    ) -> GatewayResult<PollHandle> {
        let provider_ref = provider_ref.into();
        let order_id = order_id.into();
        let gateway = self.registry.get(gateway_kind)?;

        let generation = {
            let mut generations = self.generations.lock().expect("generation map poisoned");
            let slot = generations.entry(provider_ref.clone()).or_insert(0);
            *slot += 1;
            *slot
        };

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (outcome_tx, outcome_rx) = watch::channel(None);

        info!(
            provider_ref = %provider_ref,
            gateway = %gateway_kind,
            order_id = %order_id,
            generation,
            "reconciliation poll started"
        );

        let task = PollTask {
            provider_ref,
            gateway_kind,
            order_id,
            context,
            gateway,
            dispatcher: Arc::clone(&self.dispatcher),
            config: self.config.clone(),
            generations: Arc::clone(&self.generations),
            generation,
            cancel_rx,
            outcome_tx,
        };
        tokio::spawn(task.run());

        Ok(PollHandle {
            cancel_tx,
            outcome_rx,
            generation,
        })
    }
}

/// Backoff delay after the n-th consecutive rate-limit response (1-based):
/// base, 2×base, 4×base, …
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * 2u32.saturating_pow(attempt.saturating_sub(1))
}

struct PollTask {
    provider_ref: String,
    gateway_kind: GatewayKind,
    order_id: String,
    context: EffectContext,
    gateway: Arc<dyn PaymentGateway>,
    dispatcher: Arc<EffectDispatcher>,
    config: ReconcilerConfig,
    generations: Arc<Mutex<HashMap<String, u64>>>,
    generation: u64,
    cancel_rx: watch::Receiver<bool>,
    outcome_tx: watch::Sender<Option<PollOutcome>>,
}

impl PollTask {
    async fn run(mut self) {
        let mut rate_limit_hits: u32 = 0;

        loop {
            if self.is_stale() {
                self.finish(PollOutcome::Cancelled);
                return;
            }

            let result = self.gateway.get_status(&self.provider_ref).await;

            // A response that resolves after cancellation or supersession
            // must be discarded, never dispatched.
            if self.is_stale() {
                debug!(provider_ref = %self.provider_ref, "discarding late status response");
                self.finish(PollOutcome::Cancelled);
                return;
            }

            match result {
                Ok(raw) => {
                    rate_limit_hits = 0;
                    let canonical = canonicalize(self.gateway_kind, &raw);
                    debug!(
                        provider_ref = %self.provider_ref,
                        canonical = %canonical,
                        "status poll result"
                    );
                    if canonical.is_terminal() {
                        let outcome = self.dispatch(canonical).await;
                        self.finish(outcome);
                        return;
                    }
                    // Pending stays pending; no engine-level timeout ever
                    // force-fails a payment.
                }
                Err(e) if e.is_rate_limit() => {
                    if rate_limit_hits < self.config.rate_limit_max_retries {
                        rate_limit_hits += 1;
                        let delay =
                            backoff_delay(self.config.rate_limit_base_delay, rate_limit_hits);
                        warn!(
                            provider_ref = %self.provider_ref,
                            attempt = rate_limit_hits,
                            delay_secs = delay.as_secs(),
                            "rate limited, backing off"
                        );
                        if self.wait(delay).await {
                            self.finish(PollOutcome::Cancelled);
                            return;
                        }
                        continue;
                    }
                    // Backoff budget exhausted: resume the normal cadence.
                    rate_limit_hits = 0;
                }
                Err(GatewayError::Rejected { gateway, message }) => {
                    // An explicit decline surfaced as an error instead of a
                    // rejected status; terminal either way.
                    warn!(
                        provider_ref = %self.provider_ref,
                        gateway = %gateway,
                        message = %message,
                        "payment declined by provider"
                    );
                    let outcome = self.dispatch(CanonicalStatus::Rejected).await;
                    self.finish(outcome);
                    return;
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        provider_ref = %self.provider_ref,
                        error = %e,
                        "transient gateway error, will poll again"
                    );
                }
                Err(e) => {
                    warn!(
                        provider_ref = %self.provider_ref,
                        error = %e,
                        "poll terminated by gateway error"
                    );
                    self.finish(PollOutcome::Error {
                        message: e.to_string(),
                    });
                    return;
                }
            }

            if self.wait(self.config.poll_interval).await {
                self.finish(PollOutcome::Cancelled);
                return;
            }
        }
    }

    async fn dispatch(&self, canonical: CanonicalStatus) -> PollOutcome {
        let dispatched = self
            .dispatcher
            .dispatch(&self.order_id, &self.provider_ref, &self.context, canonical)
            .await;
        match (canonical, dispatched) {
            (CanonicalStatus::Approved, Ok(outcome)) => PollOutcome::Approved(outcome),
            (CanonicalStatus::Rejected, Ok(_)) => PollOutcome::Rejected,
            (_, Err(DispatchError::EffectApplication { message, .. })) => {
                PollOutcome::EffectFailed { message }
            }
            (_, Err(e)) => PollOutcome::Error {
                message: e.to_string(),
            },
            // Pending never reaches here; is_terminal() gates the call.
            (CanonicalStatus::Pending, Ok(_)) => PollOutcome::Cancelled,
        }
    }

    fn is_stale(&self) -> bool {
        if *self.cancel_rx.borrow() {
            return true;
        }
        let generations = self.generations.lock().expect("generation map poisoned");
        generations
            .get(&self.provider_ref)
            .map(|current| *current != self.generation)
            .unwrap_or(true)
    }

    /// Sleep for `delay`, waking early on cancellation. Returns true when
    /// the poll was cancelled.
    async fn wait(&mut self, delay: Duration) -> bool {
        tokio::select! {
            changed = self.cancel_rx.changed() => match changed {
                Ok(()) => *self.cancel_rx.borrow(),
                // Handle dropped: nobody can observe this poll anymore.
                Err(_) => true,
            },
            _ = tokio::time::sleep(delay) => false,
        }
    }

    fn finish(&self, outcome: PollOutcome) {
        info!(
            provider_ref = %self.provider_ref,
            generation = self.generation,
            outcome = ?outcome,
            "reconciliation poll resolved"
        );
        let _ = self.outcome_tx.send(Some(outcome));
    }
}
