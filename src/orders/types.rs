use crate::gateways::types::{GatewayKind, PaymentMethod};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Completed,
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::Pending => write!(f, "pending"),
            OrderStatus::Completed => write!(f, "completed"),
            OrderStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Which financial effect an approved payment triggers. Captured at payment
/// creation and carried alongside the provider reference, because a renewal
/// or upgrade payment is attached to a different order record than the one
/// ultimately mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "effect")]
pub enum EffectContext {
    Activation,
    Renewal { target_order_id: String },
    Upgrade { target_order_id: String, ram_mb: u32 },
}

impl EffectContext {
    /// Id of the order record the effect mutates.
    pub fn target<'a>(&'a self, payment_order_id: &'a str) -> &'a str {
        match self {
            EffectContext::Activation => payment_order_id,
            EffectContext::Renewal { target_order_id }
            | EffectContext::Upgrade {
                target_order_id, ..
            } => target_order_id,
        }
    }
}

/// The central entity of the store: one purchased bot instance (or the
/// payment record for a renewal/upgrade of one).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    /// Provider payment reference, once a payment has been created.
    pub gateway_payment_id: Option<String>,
    /// For renewal/upgrade carrier orders: the order being mutated.
    pub target_order_id: Option<String>,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    pub gateway: Option<GatewayKind>,
    pub status: OrderStatus,
    pub subscription_start_date: Option<DateTime<Utc>>,
    pub subscription_expiry_date: Option<DateTime<Utc>>,
    /// Memory allocation of the hosted instance; upgrades only ever add.
    pub ram_mb: u32,
    /// Hosting-control-plane identifier, set once provisioning succeeds.
    pub instance_id: Option<String>,
    /// Provider refs whose effect has already been applied to this order.
    pub applied_payments: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new_pending(id: impl Into<String>, amount: Decimal, payment_method: PaymentMethod) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            gateway_payment_id: None,
            target_order_id: None,
            amount,
            payment_method,
            gateway: None,
            status: OrderStatus::Pending,
            subscription_start_date: None,
            subscription_expiry_date: None,
            ram_mb: 0,
            instance_id: None,
            applied_payments: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_applied(&self, provider_ref: &str) -> bool {
        self.applied_payments.iter().any(|r| r == provider_ref)
    }
}
