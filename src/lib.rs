//! Payment reconciliation and order lifecycle engine for a subscription
//! bot-hosting store.
//!
//! Charges are created through heterogeneous payment gateways, their raw
//! statuses are canonicalized into a 3-value outcome, a cancellable poller
//! reconciles pending payments client-side, and approved payments apply
//! their business effect (activation, renewal, or RAM upgrade) exactly once
//! through compare-and-update on the order store.

pub mod config;
pub mod gateways;
pub mod logging;
pub mod orders;
pub mod reconcile;
pub mod service;

pub use config::ReconcilerConfig;
pub use gateways::error::{GatewayError, GatewayResult};
pub use gateways::gateway::PaymentGateway;
pub use gateways::registry::{GatewayCredentials, GatewayRegistry};
pub use gateways::status::{canonicalize, CanonicalStatus};
pub use gateways::types::{
    CreatePaymentRequest, CreatePaymentResponse, GatewayKind, Money, Payer, PaymentMethod,
    Presentation, RawStatus,
};
pub use orders::store::{InMemoryOrderStore, OrderStore, StoreError};
pub use orders::types::{EffectContext, Order, OrderStatus};
pub use reconcile::dispatcher::{
    DispatchError, DispatchOutcome, EffectDispatcher, ProvisionError, ProvisioningTrigger,
};
pub use reconcile::poller::{PollHandle, PollOutcome, Reconciler};
pub use service::{PaymentService, ServiceError};
