use crate::gateways::error::{GatewayError, GatewayResult};
use crate::gateways::gateway::PaymentGateway;
use crate::gateways::providers::{
    EfiConfig, EfiPixGateway, MercadoPagoConfig, MercadoPagoGateway, StripeConfig, StripeGateway,
};
use crate::gateways::types::GatewayKind;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Externally supplied credentials; a `None` entry means the gateway is not
/// offered by this deployment.
#[derive(Debug, Clone, Default)]
pub struct GatewayCredentials {
    pub mercado_pago: Option<MercadoPagoConfig>,
    pub stripe: Option<StripeConfig>,
    pub efi: Option<EfiConfig>,
}

impl GatewayCredentials {
    /// Read whichever gateways are configured in the environment. Each
    /// gateway is optional, but at least one must be present.
    pub fn from_env() -> GatewayResult<Self> {
        let credentials = Self {
            mercado_pago: std::env::var("MP_ACCESS_TOKEN")
                .ok()
                .map(|_| MercadoPagoConfig::from_env())
                .transpose()?,
            stripe: std::env::var("STRIPE_SECRET_KEY")
                .ok()
                .map(|_| StripeConfig::from_env())
                .transpose()?,
            efi: std::env::var("EFI_CLIENT_ID")
                .ok()
                .map(|_| EfiConfig::from_env())
                .transpose()?,
        };
        if credentials.mercado_pago.is_none()
            && credentials.stripe.is_none()
            && credentials.efi.is_none()
        {
            return Err(GatewayError::Configuration {
                gateway: "registry".to_string(),
                message: "no payment gateway credentials configured".to_string(),
            });
        }
        Ok(credentials)
    }
}

/// Constructs and holds one adapter per configured gateway. All credential
/// validation happens here, up front, so a misconfigured deployment fails at
/// startup rather than mid-payment.
pub struct GatewayRegistry {
    gateways: HashMap<GatewayKind, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn new(credentials: GatewayCredentials) -> GatewayResult<Self> {
        let mut gateways: HashMap<GatewayKind, Arc<dyn PaymentGateway>> = HashMap::new();
        if let Some(config) = credentials.mercado_pago {
            gateways.insert(
                GatewayKind::MercadoPago,
                Arc::new(MercadoPagoGateway::new(config)?),
            );
        }
        if let Some(config) = credentials.stripe {
            gateways.insert(GatewayKind::Stripe, Arc::new(StripeGateway::new(config)?));
        }
        if let Some(config) = credentials.efi {
            gateways.insert(GatewayKind::EfiPix, Arc::new(EfiPixGateway::new(config)?));
        }

        info!(
            gateways = ?gateways.keys().collect::<Vec<_>>(),
            "gateway registry initialized"
        );
        Ok(Self { gateways })
    }

    pub fn from_env() -> GatewayResult<Self> {
        Self::new(GatewayCredentials::from_env()?)
    }

    /// Empty registry for incremental assembly (tests inject mocks here).
    pub fn empty() -> Self {
        Self {
            gateways: HashMap::new(),
        }
    }

    pub fn insert(&mut self, gateway: Arc<dyn PaymentGateway>) {
        self.gateways.insert(gateway.kind(), gateway);
    }

    pub fn get(&self, kind: GatewayKind) -> GatewayResult<Arc<dyn PaymentGateway>> {
        self.gateways
            .get(&kind)
            .cloned()
            .ok_or_else(|| GatewayError::Configuration {
                gateway: kind.to_string(),
                message: format!("gateway {} is not configured", kind),
            })
    }

    pub fn available(&self) -> Vec<GatewayKind> {
        self.gateways.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateways::error::GatewayResult;
    use crate::gateways::types::{
        CreatePaymentRequest, CreatePaymentResponse, PaymentMethod, Presentation, RawStatus,
    };
    use async_trait::async_trait;

    struct FakeGateway(GatewayKind);

    #[async_trait]
    impl PaymentGateway for FakeGateway {
        async fn create_payment(
            &self,
            _request: CreatePaymentRequest,
        ) -> GatewayResult<CreatePaymentResponse> {
            Ok(CreatePaymentResponse {
                provider_ref: "ref".to_string(),
                presentation: Presentation::Redirect {
                    url: "https://example.com".to_string(),
                },
                provider_data: None,
            })
        }

        async fn get_status(&self, _provider_ref: &str) -> GatewayResult<RawStatus> {
            Ok(RawStatus::new("pending"))
        }

        fn kind(&self) -> GatewayKind {
            self.0
        }

        fn supported_methods(&self) -> &'static [PaymentMethod] {
            &[PaymentMethod::Card]
        }
    }

    #[test]
    fn unconfigured_gateway_is_a_configuration_error() {
        let registry = GatewayRegistry::empty();
        assert!(matches!(
            registry.get(GatewayKind::Stripe),
            Err(GatewayError::Configuration { .. })
        ));
    }

    #[test]
    fn inserted_gateways_are_resolvable_by_kind() {
        let mut registry = GatewayRegistry::empty();
        registry.insert(Arc::new(FakeGateway(GatewayKind::Stripe)));
        registry.insert(Arc::new(FakeGateway(GatewayKind::EfiPix)));

        assert!(registry.get(GatewayKind::Stripe).is_ok());
        assert!(registry.get(GatewayKind::EfiPix).is_ok());
        assert!(registry.get(GatewayKind::MercadoPago).is_err());
        assert_eq!(registry.available().len(), 2);
    }

    #[test]
    fn invalid_credentials_fail_registry_construction() {
        let credentials = GatewayCredentials {
            stripe: Some(StripeConfig {
                secret_key: "not-a-key".to_string(),
                ..StripeConfig::default()
            }),
            ..GatewayCredentials::default()
        };
        assert!(matches!(
            GatewayRegistry::new(credentials),
            Err(GatewayError::Configuration { .. })
        ));
    }
}
