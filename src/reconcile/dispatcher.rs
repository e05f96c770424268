use crate::gateways::status::CanonicalStatus;
use crate::orders::store::{OrderStore, StoreError};
use crate::orders::types::{EffectContext, Order, OrderStatus};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Boundary to the hosting control plane. Called once per activation;
/// implementations must be safe to retry with the same order id.
#[async_trait]
pub trait ProvisioningTrigger: Send + Sync {
    async fn provision(&self, order: &Order) -> Result<String, ProvisionError>;
}

#[derive(Debug, Clone, Error)]
#[error("provisioning failed for order {order_id}: {message}")]
pub struct ProvisionError {
    pub order_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The approval was observed but the downstream mutation or provisioning
    /// step failed. The order is left reflecting "payment approved, effect
    /// not yet applied" and the dispatch is safe to retry.
    #[error("effect application failed for order {order_id}: {message}")]
    EffectApplication { order_id: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Canonical status was still pending; nothing to do.
    StillPending,
    /// Plain activation applied; the instance is provisioned.
    Activated { instance_id: String },
    /// Renewal applied; expiry extended by one billing period.
    Renewed { new_expiry: DateTime<Utc> },
    /// Upgrade applied; allocation after the increment.
    Upgraded { ram_mb: u32 },
    /// This provider ref already drove its effect; nothing was mutated.
    AlreadyApplied,
    /// Rejection recorded; order moved to failed.
    MarkedFailed,
    /// Order was already in a terminal state; rejection was a no-op.
    AlreadyResolved,
}

/// Applies exactly one of {activation, renewal, upgrade} per approved
/// provider reference. All guards run inside the store's compare-and-update
/// so that two pollers observing the same approval cannot double-apply.
pub struct EffectDispatcher {
    store: Arc<dyn OrderStore>,
    provisioning: Arc<dyn ProvisioningTrigger>,
    billing_period: Duration,
}

impl EffectDispatcher {
    pub fn new(
        store: Arc<dyn OrderStore>,
        provisioning: Arc<dyn ProvisioningTrigger>,
        billing_period: Duration,
    ) -> Self {
        Self {
            store,
            provisioning,
            billing_period,
        }
    }

    pub async fn dispatch(
        &self,
        order_id: &str,
        provider_ref: &str,
        context: &EffectContext,
        status: CanonicalStatus,
    ) -> Result<DispatchOutcome, DispatchError> {
        match status {
            CanonicalStatus::Pending => Ok(DispatchOutcome::StillPending),
            CanonicalStatus::Rejected => self.mark_failed(order_id, provider_ref).await,
            CanonicalStatus::Approved => match context {
                EffectContext::Activation => self.activate(order_id, provider_ref).await,
                EffectContext::Renewal { target_order_id } => {
                    self.renew(target_order_id, provider_ref).await
                }
                EffectContext::Upgrade {
                    target_order_id,
                    ram_mb,
                } => self.upgrade(target_order_id, provider_ref, *ram_mb).await,
            },
        }
    }

    async fn mark_failed(
        &self,
        order_id: &str,
        provider_ref: &str,
    ) -> Result<DispatchOutcome, DispatchError> {
        let result = self
            .store
            .compare_and_update(
                order_id,
                &|o| o.status == OrderStatus::Pending,
                &|o| o.status = OrderStatus::Failed,
            )
            .await;
        match result {
            Ok(_) => {
                warn!(order_id = %order_id, provider_ref = %provider_ref, "payment rejected, order failed");
                Ok(DispatchOutcome::MarkedFailed)
            }
            // Already completed or failed: rejection is an idempotent no-op.
            Err(StoreError::Conflict { .. }) => Ok(DispatchOutcome::AlreadyResolved),
            Err(e) => Err(e.into()),
        }
    }

    async fn activate(
        &self,
        order_id: &str,
        provider_ref: &str,
    ) -> Result<DispatchOutcome, DispatchError> {
        let period = self.billing_period;
        let marker = provider_ref.to_string();
        let transition = self
            .store
            .compare_and_update(
                order_id,
                &{
                    let marker = marker.clone();
                    move |o: &Order| o.status == OrderStatus::Pending && !o.has_applied(&marker)
                },
                &move |o: &mut Order| {
                    let now = Utc::now();
                    o.status = OrderStatus::Completed;
                    o.subscription_start_date = Some(now);
                    o.subscription_expiry_date = Some(now + period);
                    o.applied_payments.push(marker.clone());
                },
            )
            .await;

        let order = match transition {
            Ok(order) => {
                info!(order_id = %order_id, provider_ref = %provider_ref, "order completed");
                order
            }
            Err(StoreError::Conflict { .. }) => {
                let current = self.store.get(order_id).await?;
                match current.status {
                    // Completed but never provisioned: a previous dispatch
                    // observed the approval and then provisioning failed.
                    // Re-enter the provisioning step only.
                    OrderStatus::Completed if current.instance_id.is_none() => current,
                    OrderStatus::Completed => return Ok(DispatchOutcome::AlreadyApplied),
                    _ => return Ok(DispatchOutcome::AlreadyResolved),
                }
            }
            Err(e) => return Err(e.into()),
        };

        self.provision_once(order).await
    }

    async fn provision_once(&self, order: Order) -> Result<DispatchOutcome, DispatchError> {
        let order_id = order.id.clone();
        let instance_id = self
            .provisioning
            .provision(&order)
            .await
            .map_err(|e| DispatchError::EffectApplication {
                order_id: order_id.clone(),
                message: e.to_string(),
            })?;

        let stored = instance_id.clone();
        let record = self
            .store
            .compare_and_update(
                &order_id,
                &|o| o.instance_id.is_none(),
                &move |o: &mut Order| o.instance_id = Some(stored.clone()),
            )
            .await;
        match record {
            Ok(_) => {
                info!(order_id = %order_id, instance_id = %instance_id, "instance provisioned");
                Ok(DispatchOutcome::Activated { instance_id })
            }
            // A concurrent dispatch won the provisioning write; the trigger
            // is idempotent per order id, so report the stored instance.
            Err(StoreError::Conflict { .. }) => {
                let current = self.store.get(&order_id).await?;
                match current.instance_id {
                    Some(instance_id) => Ok(DispatchOutcome::Activated { instance_id }),
                    None => Err(DispatchError::EffectApplication {
                        order_id,
                        message: "instance id write conflicted and no instance recorded"
                            .to_string(),
                    }),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn renew(
        &self,
        target_order_id: &str,
        provider_ref: &str,
    ) -> Result<DispatchOutcome, DispatchError> {
        let period = self.billing_period;
        let marker = provider_ref.to_string();
        let result = self
            .store
            .compare_and_update(
                target_order_id,
                &{
                    let marker = marker.clone();
                    move |o: &Order| !o.has_applied(&marker)
                },
                &move |o: &mut Order| {
                    // Extend from the current expiry, not from now: renewing
                    // early must not forfeit remaining time.
                    let base = o.subscription_expiry_date.unwrap_or_else(Utc::now);
                    o.subscription_expiry_date = Some(base + period);
                    o.applied_payments.push(marker.clone());
                },
            )
            .await;
        match result {
            Ok(order) => {
                let new_expiry = order.subscription_expiry_date.ok_or_else(|| {
                    DispatchError::EffectApplication {
                        order_id: target_order_id.to_string(),
                        message: "renewal applied but expiry date is unset".to_string(),
                    }
                })?;
                info!(
                    order_id = %target_order_id,
                    provider_ref = %provider_ref,
                    new_expiry = %new_expiry,
                    "subscription renewed"
                );
                Ok(DispatchOutcome::Renewed { new_expiry })
            }
            Err(StoreError::Conflict { .. }) => Ok(DispatchOutcome::AlreadyApplied),
            Err(e) => Err(e.into()),
        }
    }

    async fn upgrade(
        &self,
        target_order_id: &str,
        provider_ref: &str,
        increment_mb: u32,
    ) -> Result<DispatchOutcome, DispatchError> {
        let marker = provider_ref.to_string();
        let result = self
            .store
            .compare_and_update(
                target_order_id,
                &{
                    let marker = marker.clone();
                    move |o: &Order| !o.has_applied(&marker)
                },
                &move |o: &mut Order| {
                    o.ram_mb += increment_mb;
                    o.applied_payments.push(marker.clone());
                },
            )
            .await;
        match result {
            Ok(order) => {
                info!(
                    order_id = %target_order_id,
                    provider_ref = %provider_ref,
                    ram_mb = order.ram_mb,
                    "resource upgrade applied"
                );
                Ok(DispatchOutcome::Upgraded { ram_mb: order.ram_mb })
            }
            Err(StoreError::Conflict { .. }) => Ok(DispatchOutcome::AlreadyApplied),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateways::types::PaymentMethod;
    use crate::orders::store::InMemoryOrderStore;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct RecordingProvisioner {
        calls: AtomicU32,
        fail_next: AtomicBool,
    }

    impl RecordingProvisioner {
        fn new() -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_next: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl ProvisioningTrigger for RecordingProvisioner {
        async fn provision(&self, order: &Order) -> Result<String, ProvisionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(ProvisionError {
                    order_id: order.id.clone(),
                    message: "control plane unavailable".to_string(),
                });
            }
            Ok(format!("inst_{}", order.id))
        }
    }

    fn dispatcher(
        store: Arc<InMemoryOrderStore>,
        provisioner: Arc<RecordingProvisioner>,
    ) -> EffectDispatcher {
        EffectDispatcher::new(store, provisioner, Duration::days(30))
    }

    fn pending_order(id: &str) -> Order {
        Order::new_pending(id, dec!(15.00), PaymentMethod::Pix)
    }

    #[tokio::test]
    async fn activation_applies_exactly_once() {
        let store = Arc::new(InMemoryOrderStore::with_orders(vec![pending_order("ord_1")]));
        let provisioner = Arc::new(RecordingProvisioner::new());
        let dispatcher = dispatcher(Arc::clone(&store), Arc::clone(&provisioner));

        let first = dispatcher
            .dispatch(
                "ord_1",
                "pay_99",
                &EffectContext::Activation,
                CanonicalStatus::Approved,
            )
            .await
            .expect("first dispatch should succeed");
        assert_eq!(
            first,
            DispatchOutcome::Activated {
                instance_id: "inst_ord_1".to_string()
            }
        );

        let second = dispatcher
            .dispatch(
                "ord_1",
                "pay_99",
                &EffectContext::Activation,
                CanonicalStatus::Approved,
            )
            .await
            .expect("second dispatch should succeed");
        assert_eq!(second, DispatchOutcome::AlreadyApplied);
        assert_eq!(provisioner.calls.load(Ordering::SeqCst), 1);

        let order = store.get("ord_1").await.expect("get");
        assert_eq!(order.status, OrderStatus::Completed);
        assert!(order.subscription_expiry_date.is_some());
    }

    #[tokio::test]
    async fn provisioning_failure_leaves_order_recoverable() {
        let store = Arc::new(InMemoryOrderStore::with_orders(vec![pending_order("ord_1")]));
        let provisioner = Arc::new(RecordingProvisioner::new());
        provisioner.fail_next.store(true, Ordering::SeqCst);
        let dispatcher = dispatcher(Arc::clone(&store), Arc::clone(&provisioner));

        let first = dispatcher
            .dispatch(
                "ord_1",
                "pay_99",
                &EffectContext::Activation,
                CanonicalStatus::Approved,
            )
            .await;
        assert!(matches!(
            first,
            Err(DispatchError::EffectApplication { .. })
        ));

        // Payment applied, instance missing: approved but effect incomplete.
        let order = store.get("ord_1").await.expect("get");
        assert_eq!(order.status, OrderStatus::Completed);
        assert!(order.instance_id.is_none());

        // Retry completes provisioning without re-applying the payment.
        let retry = dispatcher
            .dispatch(
                "ord_1",
                "pay_99",
                &EffectContext::Activation,
                CanonicalStatus::Approved,
            )
            .await
            .expect("retry should succeed");
        assert_eq!(
            retry,
            DispatchOutcome::Activated {
                instance_id: "inst_ord_1".to_string()
            }
        );
        assert_eq!(provisioner.calls.load(Ordering::SeqCst), 2);

        let order = store.get("ord_1").await.expect("get");
        assert_eq!(order.applied_payments, vec!["pay_99".to_string()]);
    }

    #[tokio::test]
    async fn renewal_extends_from_current_expiry_not_now() {
        let mut order = pending_order("ord_3");
        order.status = OrderStatus::Completed;
        let expiry = Utc::now() + Duration::days(3);
        order.subscription_expiry_date = Some(expiry);
        let store = Arc::new(InMemoryOrderStore::with_orders(vec![order]));
        let dispatcher = dispatcher(Arc::clone(&store), Arc::new(RecordingProvisioner::new()));

        let outcome = dispatcher
            .dispatch(
                "ord_renew",
                "pay_42",
                &EffectContext::Renewal {
                    target_order_id: "ord_3".to_string(),
                },
                CanonicalStatus::Approved,
            )
            .await
            .expect("renewal should succeed");
        assert_eq!(
            outcome,
            DispatchOutcome::Renewed {
                new_expiry: expiry + Duration::days(30)
            }
        );

        // Second approval observation for the same ref: no further extension.
        let repeat = dispatcher
            .dispatch(
                "ord_renew",
                "pay_42",
                &EffectContext::Renewal {
                    target_order_id: "ord_3".to_string(),
                },
                CanonicalStatus::Approved,
            )
            .await
            .expect("repeat should succeed");
        assert_eq!(repeat, DispatchOutcome::AlreadyApplied);

        let stored = store.get("ord_3").await.expect("get");
        assert_eq!(
            stored.subscription_expiry_date,
            Some(expiry + Duration::days(30))
        );
    }

    #[tokio::test]
    async fn upgrade_adds_increment_without_touching_status() {
        let mut order = pending_order("ord_2");
        order.status = OrderStatus::Completed;
        order.ram_mb = 512;
        let store = Arc::new(InMemoryOrderStore::with_orders(vec![order]));
        let dispatcher = dispatcher(Arc::clone(&store), Arc::new(RecordingProvisioner::new()));

        let outcome = dispatcher
            .dispatch(
                "ord_upgrade",
                "pay_7",
                &EffectContext::Upgrade {
                    target_order_id: "ord_2".to_string(),
                    ram_mb: 512,
                },
                CanonicalStatus::Approved,
            )
            .await
            .expect("upgrade should succeed");
        assert_eq!(outcome, DispatchOutcome::Upgraded { ram_mb: 1024 });

        let stored = store.get("ord_2").await.expect("get");
        assert_eq!(stored.ram_mb, 1024);
        assert_eq!(stored.status, OrderStatus::Completed);
    }

    #[tokio::test]
    async fn rejection_fails_pending_orders_idempotently() {
        let store = Arc::new(InMemoryOrderStore::with_orders(vec![pending_order("ord_1")]));
        let dispatcher = dispatcher(Arc::clone(&store), Arc::new(RecordingProvisioner::new()));

        let first = dispatcher
            .dispatch(
                "ord_1",
                "pay_1",
                &EffectContext::Activation,
                CanonicalStatus::Rejected,
            )
            .await
            .expect("rejection should succeed");
        assert_eq!(first, DispatchOutcome::MarkedFailed);

        let second = dispatcher
            .dispatch(
                "ord_1",
                "pay_1",
                &EffectContext::Activation,
                CanonicalStatus::Rejected,
            )
            .await
            .expect("repeat rejection should succeed");
        assert_eq!(second, DispatchOutcome::AlreadyResolved);

        assert_eq!(
            store.get("ord_1").await.expect("get").status,
            OrderStatus::Failed
        );
    }

    #[tokio::test]
    async fn pending_status_is_a_no_op() {
        let store = Arc::new(InMemoryOrderStore::with_orders(vec![pending_order("ord_1")]));
        let dispatcher = dispatcher(Arc::clone(&store), Arc::new(RecordingProvisioner::new()));

        let outcome = dispatcher
            .dispatch(
                "ord_1",
                "pay_1",
                &EffectContext::Activation,
                CanonicalStatus::Pending,
            )
            .await
            .expect("pending should succeed");
        assert_eq!(outcome, DispatchOutcome::StillPending);
        assert_eq!(
            store.get("ord_1").await.expect("get").status,
            OrderStatus::Pending
        );
    }

    #[tokio::test]
    async fn concurrent_approvals_apply_one_effect() {
        let mut order = pending_order("ord_3");
        order.status = OrderStatus::Completed;
        order.subscription_expiry_date = Some(Utc::now() + Duration::days(3));
        let store = Arc::new(InMemoryOrderStore::with_orders(vec![order]));
        let dispatcher = Arc::new(dispatcher(
            Arc::clone(&store),
            Arc::new(RecordingProvisioner::new()),
        ));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let dispatcher = Arc::clone(&dispatcher);
            handles.push(tokio::spawn(async move {
                dispatcher
                    .dispatch(
                        "ord_renew",
                        "pay_42",
                        &EffectContext::Renewal {
                            target_order_id: "ord_3".to_string(),
                        },
                        CanonicalStatus::Approved,
                    )
                    .await
                    .expect("dispatch should succeed")
            }));
        }

        let mut applied = 0;
        for handle in handles {
            if matches!(
                handle.await.expect("task should not panic"),
                DispatchOutcome::Renewed { .. }
            ) {
                applied += 1;
            }
        }
        assert_eq!(applied, 1);
        assert_eq!(
            store.get("ord_3").await.expect("get").applied_payments.len(),
            1
        );
    }
}
