use crate::gateways::error::{GatewayError, GatewayResult};
use crate::gateways::gateway::PaymentGateway;
use crate::gateways::http::GatewayHttpClient;
use crate::gateways::types::{
    CreatePaymentRequest, CreatePaymentResponse, GatewayKind, PaymentMethod, Presentation,
    RawStatus,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct EfiConfig {
    pub client_id: String,
    pub client_secret: String,
    pub pix_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
    /// Pix charge expiration window, seconds.
    pub charge_expiration_secs: u64,
}

impl Default for EfiConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            pix_key: String::new(),
            base_url: "https://pix.api.efipay.com.br".to_string(),
            timeout_secs: 30,
            charge_expiration_secs: 3600,
        }
    }
}

impl EfiConfig {
    pub fn from_env() -> GatewayResult<Self> {
        let client_id = std::env::var("EFI_CLIENT_ID").unwrap_or_default();
        let client_secret = std::env::var("EFI_CLIENT_SECRET").unwrap_or_default();
        let pix_key = std::env::var("EFI_PIX_KEY").unwrap_or_default();
        let config = Self {
            client_id,
            client_secret,
            pix_key,
            base_url: std::env::var("EFI_BASE_URL")
                .unwrap_or_else(|_| "https://pix.api.efipay.com.br".to_string()),
            timeout_secs: std::env::var("EFI_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
            charge_expiration_secs: std::env::var("EFI_CHARGE_EXPIRATION_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(3600),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> GatewayResult<()> {
        if self.client_id.trim().is_empty()
            || self.client_secret.trim().is_empty()
            || self.pix_key.trim().is_empty()
        {
            return Err(GatewayError::Configuration {
                gateway: "efi_pix".to_string(),
                message: "EFI_CLIENT_ID, EFI_CLIENT_SECRET and EFI_PIX_KEY are required"
                    .to_string(),
            });
        }
        Ok(())
    }
}

pub struct EfiPixGateway {
    config: EfiConfig,
    http: GatewayHttpClient,
}

impl EfiPixGateway {
    pub fn new(config: EfiConfig) -> GatewayResult<Self> {
        config.validate()?;
        let http = GatewayHttpClient::new("efi_pix", Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> GatewayResult<Self> {
        Self::new(EfiConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// Efí scopes every Pix call behind a short-lived OAuth token issued
    /// against the client credentials.
    async fn access_token(&self) -> GatewayResult<String> {
        let token: EfiTokenResponse = self
            .http
            .post_json_basic_auth(
                &self.endpoint("/oauth/token"),
                &self.config.client_id,
                &self.config.client_secret,
                &serde_json::json!({ "grant_type": "client_credentials" }),
            )
            .await?;
        Ok(token.access_token)
    }
}

#[async_trait]
impl PaymentGateway for EfiPixGateway {
    async fn create_payment(
        &self,
        request: CreatePaymentRequest,
    ) -> GatewayResult<CreatePaymentResponse> {
        // Pix is the only rail this provider offers; refuse anything else
        // before touching the network.
        if request.payment_method != PaymentMethod::Pix {
            return Err(GatewayError::UnsupportedMethod {
                gateway: GatewayKind::EfiPix,
                method: request.payment_method,
            });
        }
        request.amount.validate_positive("amount")?;

        let token = self.access_token().await?;
        let payload = serde_json::json!({
            "calendario": { "expiracao": self.config.charge_expiration_secs },
            "valor": { "original": request.amount.as_fixed_string() },
            "chave": self.config.pix_key,
            "solicitacaoPagador": request.description,
            "infoAdicionais": [
                { "nome": "pedido", "valor": request.order_id }
            ],
        });

        let charge: EfiCharge = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/v2/cob"),
                Some(&token),
                Some(&payload),
                &[("Content-Type", "application/json")],
            )
            .await?;

        // The charge response carries the copia-e-cola payload; the rendered
        // QR image needs a second call against the charge location.
        let payload_text = charge
            .pix_copia_e_cola
            .clone()
            .ok_or_else(|| GatewayError::Provider {
                gateway: "efi_pix".to_string(),
                message: "missing pixCopiaECola in charge response".to_string(),
                status_code: None,
            })?;

        let image_url = match charge.loc.as_ref() {
            Some(loc) => {
                let qr: EfiQrCode = self
                    .http
                    .request_json(
                        reqwest::Method::GET,
                        &self.endpoint(&format!("/v2/loc/{}/qrcode", loc.id)),
                        Some(&token),
                        None,
                        &[],
                    )
                    .await?;
                qr.link_visualizacao
            }
            None => None,
        };

        info!(
            gateway = "efi_pix",
            provider_ref = %charge.txid,
            order_id = %request.order_id,
            "pix charge created"
        );

        Ok(CreatePaymentResponse {
            provider_ref: charge.txid,
            presentation: Presentation::QrCode {
                payload: payload_text,
                image_url,
            },
            provider_data: None,
        })
    }

    async fn get_status(&self, provider_ref: &str) -> GatewayResult<RawStatus> {
        let token = self.access_token().await?;
        let charge: EfiCharge = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/v2/cob/{}", provider_ref)),
                Some(&token),
                None,
                &[],
            )
            .await?;

        Ok(RawStatus {
            value: charge.status.unwrap_or_default(),
            detail: None,
            provider_data: None,
        })
    }

    fn kind(&self) -> GatewayKind {
        GatewayKind::EfiPix
    }

    fn supported_methods(&self) -> &'static [PaymentMethod] {
        &[PaymentMethod::Pix]
    }
}

#[derive(Debug, Deserialize)]
struct EfiTokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct EfiCharge {
    txid: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    loc: Option<EfiLoc>,
    #[serde(default, rename = "pixCopiaECola")]
    pix_copia_e_cola: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EfiLoc {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct EfiQrCode {
    #[serde(default, rename = "linkVisualizacao")]
    link_visualizacao: Option<String>,
}
