//! Payment creation facade: picks the gateway, creates the charge, and
//! persists the provider reference on the order before any polling starts.

use crate::gateways::error::GatewayError;
use crate::gateways::registry::GatewayRegistry;
use crate::gateways::types::{CreatePaymentRequest, CreatePaymentResponse, GatewayKind};
use crate::orders::store::{OrderStore, StoreError};
use crate::orders::types::{EffectContext, OrderStatus};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("order {order_id} is not pending")]
    OrderNotPending { order_id: String },
}

pub struct PaymentService {
    registry: Arc<GatewayRegistry>,
    store: Arc<dyn OrderStore>,
}

impl PaymentService {
    pub fn new(registry: Arc<GatewayRegistry>, store: Arc<dyn OrderStore>) -> Self {
        Self { registry, store }
    }

    /// Create a charge for a pending order on the chosen gateway and record
    /// the provider reference, gateway, and effect linkage on the order. The
    /// order must still be pending both before the charge is created and
    /// when the reference is stored.
    pub async fn create_payment(
        &self,
        gateway_kind: GatewayKind,
        request: CreatePaymentRequest,
        context: &EffectContext,
    ) -> Result<CreatePaymentResponse, ServiceError> {
        let order_id = request.order_id.clone();
        let order = self.store.get(&order_id).await?;
        if order.status != OrderStatus::Pending {
            return Err(ServiceError::OrderNotPending { order_id });
        }

        let gateway = self.registry.get(gateway_kind)?;
        let response = gateway.create_payment(request).await?;

        let provider_ref = response.provider_ref.clone();
        let target = match context {
            EffectContext::Activation => None,
            EffectContext::Renewal { target_order_id }
            | EffectContext::Upgrade {
                target_order_id, ..
            } => Some(target_order_id.clone()),
        };
        self.store
            .compare_and_update(
                &order_id,
                &|o| o.status == OrderStatus::Pending,
                &move |o| {
                    o.gateway_payment_id = Some(provider_ref.clone());
                    o.gateway = Some(gateway_kind);
                    o.target_order_id = target.clone();
                },
            )
            .await
            .map_err(|e| match e {
                StoreError::Conflict { order_id } => ServiceError::OrderNotPending { order_id },
                other => ServiceError::Store(other),
            })?;

        info!(
            order_id = %order_id,
            gateway = %gateway_kind,
            provider_ref = %response.provider_ref,
            "payment created"
        );
        Ok(response)
    }
}
