use crate::gateways::error::{GatewayError, GatewayResult};
use crate::gateways::gateway::PaymentGateway;
use crate::gateways::http::GatewayHttpClient;
use crate::gateways::types::{
    CreatePaymentRequest, CreatePaymentResponse, GatewayKind, PaymentMethod, Presentation,
    RawStatus,
};
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct MercadoPagoConfig {
    pub access_token: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for MercadoPagoConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            base_url: "https://api.mercadopago.com".to_string(),
            timeout_secs: 30,
        }
    }
}

impl MercadoPagoConfig {
    pub fn from_env() -> GatewayResult<Self> {
        let access_token =
            std::env::var("MP_ACCESS_TOKEN").map_err(|_| GatewayError::Configuration {
                gateway: "mercado_pago".to_string(),
                message: "MP_ACCESS_TOKEN environment variable is required".to_string(),
            })?;
        Ok(Self {
            access_token,
            base_url: std::env::var("MP_BASE_URL")
                .unwrap_or_else(|_| "https://api.mercadopago.com".to_string()),
            timeout_secs: std::env::var("MP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
        })
    }

    fn validate(&self) -> GatewayResult<()> {
        let token = self.access_token.trim();
        if token.is_empty() || token.len() < 20 {
            return Err(GatewayError::Configuration {
                gateway: "mercado_pago".to_string(),
                message: "access token is missing or too short".to_string(),
            });
        }
        Ok(())
    }
}

pub struct MercadoPagoGateway {
    config: MercadoPagoConfig,
    http: GatewayHttpClient,
}

impl MercadoPagoGateway {
    pub fn new(config: MercadoPagoConfig) -> GatewayResult<Self> {
        config.validate()?;
        let http =
            GatewayHttpClient::new("mercado_pago", Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> GatewayResult<Self> {
        Self::new(MercadoPagoConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }
}

#[async_trait]
impl PaymentGateway for MercadoPagoGateway {
    async fn create_payment(
        &self,
        request: CreatePaymentRequest,
    ) -> GatewayResult<CreatePaymentResponse> {
        request.amount.validate_positive("amount")?;
        if !self.supported_methods().contains(&request.payment_method) {
            return Err(GatewayError::UnsupportedMethod {
                gateway: GatewayKind::MercadoPago,
                method: request.payment_method,
            });
        }

        let payment_method_id = match request.payment_method {
            PaymentMethod::Pix => "pix",
            PaymentMethod::Boleto => "bolbradesco",
            // Card flows go through the hosted ticket; the API still wants a
            // concrete payment_method_id on this endpoint.
            PaymentMethod::Card | PaymentMethod::Other => "account_money",
        };

        let payload = serde_json::json!({
            "transaction_amount": request.amount.amount.to_f64(),
            "description": request.description,
            "payment_method_id": payment_method_id,
            "external_reference": request.order_id,
            "notification_url": request.callback_url,
            "payer": {
                "email": request.payer.email,
                "first_name": request.payer.name,
                "identification": request.payer.document.as_ref().map(|doc| serde_json::json!({
                    "type": "CPF",
                    "number": doc,
                })),
            },
            "metadata": request.metadata,
        });

        // Payment creation is not idempotent on the provider side without
        // this header.
        let idempotency_key = Uuid::new_v4().to_string();
        let payment: MpPayment = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/v1/payments"),
                Some(&self.config.access_token),
                Some(&payload),
                &[("X-Idempotency-Key", idempotency_key.as_str())],
            )
            .await?;

        payment.ensure_not_rejected()?;
        let provider_ref = payment.id.to_string();
        let presentation = payment.presentation(request.payment_method)?;
        info!(
            gateway = "mercado_pago",
            provider_ref = %provider_ref,
            order_id = %request.order_id,
            "payment created"
        );

        Ok(CreatePaymentResponse {
            provider_ref,
            presentation,
            provider_data: payment.raw,
        })
    }

    async fn get_status(&self, provider_ref: &str) -> GatewayResult<RawStatus> {
        let payment: MpPayment = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/v1/payments/{}", provider_ref)),
                Some(&self.config.access_token),
                None,
                &[],
            )
            .await?;

        Ok(RawStatus {
            value: payment.status.unwrap_or_default(),
            detail: payment.status_detail,
            provider_data: payment.raw,
        })
    }

    fn kind(&self) -> GatewayKind {
        GatewayKind::MercadoPago
    }

    fn supported_methods(&self) -> &'static [PaymentMethod] {
        &[PaymentMethod::Pix, PaymentMethod::Card, PaymentMethod::Boleto]
    }
}

/// Mercado Pago returns the payment object flat, no envelope.
#[derive(Debug, Deserialize)]
struct MpPayment {
    id: u64,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    status_detail: Option<String>,
    #[serde(default)]
    point_of_interaction: Option<MpPointOfInteraction>,
    #[serde(default)]
    transaction_details: Option<MpTransactionDetails>,
    #[serde(flatten)]
    raw: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct MpPointOfInteraction {
    #[serde(default)]
    transaction_data: Option<MpTransactionData>,
}

#[derive(Debug, Deserialize)]
struct MpTransactionData {
    #[serde(default)]
    qr_code: Option<String>,
    #[serde(default)]
    ticket_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MpTransactionDetails {
    #[serde(default)]
    external_resource_url: Option<String>,
}

impl MpPayment {
    /// This provider settles card payments synchronously, so the create call
    /// itself can come back already declined.
    fn ensure_not_rejected(&self) -> GatewayResult<()> {
        if self.status.as_deref() == Some("rejected") {
            return Err(GatewayError::Rejected {
                gateway: "mercado_pago".to_string(),
                message: self
                    .status_detail
                    .clone()
                    .unwrap_or_else(|| "payment rejected".to_string()),
            });
        }
        Ok(())
    }

    fn presentation(&self, method: PaymentMethod) -> GatewayResult<Presentation> {
        let transaction_data = self
            .point_of_interaction
            .as_ref()
            .and_then(|poi| poi.transaction_data.as_ref());

        if method == PaymentMethod::Pix {
            let payload = transaction_data
                .and_then(|td| td.qr_code.clone())
                .ok_or_else(|| GatewayError::Provider {
                    gateway: "mercado_pago".to_string(),
                    message: "missing pix qr_code in payment response".to_string(),
                    status_code: None,
                })?;
            return Ok(Presentation::QrCode {
                payload,
                image_url: transaction_data.and_then(|td| td.ticket_url.clone()),
            });
        }

        let url = transaction_data
            .and_then(|td| td.ticket_url.clone())
            .or_else(|| {
                self.transaction_details
                    .as_ref()
                    .and_then(|td| td.external_resource_url.clone())
            })
            .ok_or_else(|| GatewayError::Provider {
                gateway: "mercado_pago".to_string(),
                message: "missing checkout url in payment response".to_string(),
                status_code: None,
            })?;
        Ok(Presentation::Redirect { url })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MercadoPagoConfig {
        MercadoPagoConfig {
            access_token: "APP_USR-test-token-0123456789".to_string(),
            ..MercadoPagoConfig::default()
        }
    }

    #[test]
    fn constructor_rejects_short_token() {
        let short = MercadoPagoConfig {
            access_token: "abc".to_string(),
            ..MercadoPagoConfig::default()
        };
        assert!(matches!(
            MercadoPagoGateway::new(short),
            Err(GatewayError::Configuration { .. })
        ));
        assert!(MercadoPagoGateway::new(config()).is_ok());
    }

    #[test]
    fn flat_payment_envelope_deserializes() {
        let body = serde_json::json!({
            "id": 123456789_u64,
            "status": "in_process",
            "status_detail": "pending_contingency",
            "transaction_amount": 15.0
        });
        let payment: MpPayment =
            serde_json::from_value(body).expect("deserialization should succeed");
        assert_eq!(payment.id, 123456789);
        assert_eq!(payment.status.as_deref(), Some("in_process"));
    }

    #[test]
    fn synchronously_declined_payment_surfaces_as_rejected() {
        let declined: MpPayment = serde_json::from_value(serde_json::json!({
            "id": 4_u64,
            "status": "rejected",
            "status_detail": "cc_rejected_insufficient_amount"
        }))
        .expect("deserialization should succeed");
        assert!(matches!(
            declined.ensure_not_rejected(),
            Err(GatewayError::Rejected { message, .. }) if message == "cc_rejected_insufficient_amount"
        ));

        let pending: MpPayment = serde_json::from_value(serde_json::json!({
            "id": 5_u64,
            "status": "in_process"
        }))
        .expect("deserialization should succeed");
        assert!(pending.ensure_not_rejected().is_ok());
    }

    #[test]
    fn pix_presentation_requires_qr_code() {
        let without_qr: MpPayment = serde_json::from_value(serde_json::json!({
            "id": 1_u64,
            "status": "pending"
        }))
        .expect("deserialization should succeed");
        assert!(without_qr.presentation(PaymentMethod::Pix).is_err());

        let with_qr: MpPayment = serde_json::from_value(serde_json::json!({
            "id": 2_u64,
            "status": "pending",
            "point_of_interaction": {
                "transaction_data": {
                    "qr_code": "000201pixpayload",
                    "ticket_url": "https://mp.example/ticket"
                }
            }
        }))
        .expect("deserialization should succeed");
        assert_eq!(
            with_qr
                .presentation(PaymentMethod::Pix)
                .expect("presentation should resolve"),
            Presentation::QrCode {
                payload: "000201pixpayload".to_string(),
                image_url: Some("https://mp.example/ticket".to_string()),
            }
        );
    }

    #[test]
    fn card_presentation_falls_back_to_external_resource_url() {
        let payment: MpPayment = serde_json::from_value(serde_json::json!({
            "id": 3_u64,
            "status": "pending",
            "transaction_details": {
                "external_resource_url": "https://mp.example/checkout"
            }
        }))
        .expect("deserialization should succeed");
        assert_eq!(
            payment
                .presentation(PaymentMethod::Card)
                .expect("presentation should resolve"),
            Presentation::Redirect {
                url: "https://mp.example/checkout".to_string(),
            }
        );
    }
}
