use crate::gateways::error::GatewayResult;
use crate::gateways::types::{
    CreatePaymentRequest, CreatePaymentResponse, GatewayKind, PaymentMethod, RawStatus,
};
use async_trait::async_trait;

/// Common surface all gateway adapters normalize into.
///
/// Adapters own every provider quirk: envelope shapes, amount encoding,
/// payer field requirements, credential validation. Raw status vocabulary
/// still crosses this boundary (inside [`RawStatus`]) but is consumed only
/// by the canonicalizer.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment(
        &self,
        request: CreatePaymentRequest,
    ) -> GatewayResult<CreatePaymentResponse>;

    async fn get_status(&self, provider_ref: &str) -> GatewayResult<RawStatus>;

    fn kind(&self) -> GatewayKind;

    fn supported_methods(&self) -> &'static [PaymentMethod];
}
