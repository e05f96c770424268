use crate::gateways::error::{GatewayError, GatewayResult};
use crate::gateways::gateway::PaymentGateway;
use crate::gateways::http::GatewayHttpClient;
use crate::gateways::types::{
    CreatePaymentRequest, CreatePaymentResponse, GatewayKind, PaymentMethod, Presentation,
    RawStatus,
};
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            base_url: "https://api.stripe.com/v1".to_string(),
            timeout_secs: 30,
        }
    }
}

impl StripeConfig {
    pub fn from_env() -> GatewayResult<Self> {
        let secret_key =
            std::env::var("STRIPE_SECRET_KEY").map_err(|_| GatewayError::Configuration {
                gateway: "stripe".to_string(),
                message: "STRIPE_SECRET_KEY environment variable is required".to_string(),
            })?;
        Ok(Self {
            secret_key,
            base_url: std::env::var("STRIPE_BASE_URL")
                .unwrap_or_else(|_| "https://api.stripe.com/v1".to_string()),
            timeout_secs: std::env::var("STRIPE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
        })
    }

    fn validate(&self) -> GatewayResult<()> {
        let key = self.secret_key.trim();
        if !key.starts_with("sk_") || key.len() < 20 {
            return Err(GatewayError::Configuration {
                gateway: "stripe".to_string(),
                message: "secret key must start with sk_ and be at least 20 characters"
                    .to_string(),
            });
        }
        Ok(())
    }
}

pub struct StripeGateway {
    config: StripeConfig,
    http: GatewayHttpClient,
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> GatewayResult<Self> {
        config.validate()?;
        let http = GatewayHttpClient::new("stripe", Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> GatewayResult<Self> {
        Self::new(StripeConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }
}

/// Stripe works in minor units; BRL has two decimals.
fn to_minor_units(amount: Decimal) -> GatewayResult<i64> {
    (amount * Decimal::from(100))
        .round()
        .to_i64()
        .ok_or_else(|| GatewayError::Provider {
            gateway: "stripe".to_string(),
            message: format!("amount {} does not fit in minor units", amount),
            status_code: None,
        })
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_payment(
        &self,
        request: CreatePaymentRequest,
    ) -> GatewayResult<CreatePaymentResponse> {
        request.amount.validate_positive("amount")?;
        if !self.supported_methods().contains(&request.payment_method) {
            return Err(GatewayError::UnsupportedMethod {
                gateway: GatewayKind::Stripe,
                method: request.payment_method,
            });
        }

        let unit_amount = to_minor_units(request.amount.amount)?;
        let mut form: Vec<(&str, String)> = vec![
            ("mode", "payment".to_string()),
            ("payment_method_types[0]", "card".to_string()),
            ("line_items[0][quantity]", "1".to_string()),
            (
                "line_items[0][price_data][currency]",
                request.amount.currency.to_lowercase(),
            ),
            (
                "line_items[0][price_data][unit_amount]",
                unit_amount.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]",
                request.description.clone(),
            ),
            ("client_reference_id", request.order_id.clone()),
            (
                "success_url",
                request
                    .callback_url
                    .clone()
                    .unwrap_or_else(|| "https://example.com/payment/return".to_string()),
            ),
        ];
        if let Some(email) = request.payer.email.as_deref() {
            form.push(("customer_email", email.to_string()));
        }

        let session: StripeCheckoutSession = self
            .http
            .request_form(
                reqwest::Method::POST,
                &self.endpoint("/checkout/sessions"),
                &self.config.secret_key,
                &form,
            )
            .await?;

        let url = session.url.ok_or_else(|| GatewayError::Provider {
            gateway: "stripe".to_string(),
            message: "missing checkout url in session response".to_string(),
            status_code: None,
        })?;

        info!(
            gateway = "stripe",
            provider_ref = %session.id,
            order_id = %request.order_id,
            "checkout session created"
        );

        Ok(CreatePaymentResponse {
            provider_ref: session.id,
            presentation: Presentation::Redirect { url },
            provider_data: None,
        })
    }

    async fn get_status(&self, provider_ref: &str) -> GatewayResult<RawStatus> {
        let session: StripeCheckoutSession = self
            .http
            .request_form(
                reqwest::Method::GET,
                &self.endpoint(&format!("/checkout/sessions/{}", provider_ref)),
                &self.config.secret_key,
                &[],
            )
            .await?;

        // payment_status carries the money outcome; the session status
        // ("open" / "complete" / "expired") is kept as detail.
        Ok(RawStatus {
            value: session.payment_status.unwrap_or_default(),
            detail: session.status,
            provider_data: None,
        })
    }

    fn kind(&self) -> GatewayKind {
        GatewayKind::Stripe
    }

    fn supported_methods(&self) -> &'static [PaymentMethod] {
        &[PaymentMethod::Card]
    }
}

#[derive(Debug, Deserialize)]
struct StripeCheckoutSession {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    payment_status: Option<String>,
}
