use crate::gateways::error::GatewayError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GatewayKind {
    MercadoPago,
    Stripe,
    EfiPix,
}

impl GatewayKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayKind::MercadoPago => "mercado_pago",
            GatewayKind::Stripe => "stripe",
            GatewayKind::EfiPix => "efi_pix",
        }
    }
}

impl std::fmt::Display for GatewayKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GatewayKind {
    type Err = GatewayError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "mercado_pago" | "mercadopago" | "mp" => Ok(GatewayKind::MercadoPago),
            "stripe" => Ok(GatewayKind::Stripe),
            "efi_pix" | "efi" | "pix" => Ok(GatewayKind::EfiPix),
            _ => Err(GatewayError::Configuration {
                gateway: value.trim().to_string(),
                message: format!("unknown payment gateway: {}", value),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Pix,
    Card,
    Boleto,
    Other,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Pix => "pix",
            PaymentMethod::Card => "card",
            PaymentMethod::Boleto => "boleto",
            PaymentMethod::Other => "other",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Money {
    pub amount: Decimal,
    pub currency: String,
}

impl Money {
    pub fn new(amount: Decimal, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
        }
    }

    pub fn validate_positive(&self, field: &str) -> Result<(), GatewayError> {
        if self.amount <= Decimal::ZERO {
            return Err(GatewayError::InvalidRequest {
                message: format!("{}: amount must be greater than zero", field),
            });
        }
        if self.currency.trim().is_empty() {
            return Err(GatewayError::InvalidRequest {
                message: format!("{}: currency is required", field),
            });
        }
        Ok(())
    }

    /// Two-decimal string form required by providers that take amounts as text.
    pub fn as_fixed_string(&self) -> String {
        self.amount.round_dp(2).to_string()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Payer {
    pub name: Option<String>,
    pub email: Option<String>,
    pub document: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePaymentRequest {
    pub order_id: String,
    pub amount: Money,
    pub description: String,
    pub payer: Payer,
    pub payment_method: PaymentMethod,
    pub callback_url: Option<String>,
    pub metadata: Option<JsonValue>,
}

/// What the presentation layer renders so the customer can pay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Presentation {
    /// Scannable code (Pix "copia e cola" payload plus optional rendered image).
    QrCode {
        payload: String,
        image_url: Option<String>,
    },
    /// External checkout page hosted by the provider.
    Redirect { url: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePaymentResponse {
    pub provider_ref: String,
    pub presentation: Presentation,
    pub provider_data: Option<JsonValue>,
}

/// Raw provider status as returned by a status poll. The `value` field uses
/// the provider's own vocabulary and must not travel past the canonicalizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawStatus {
    pub value: String,
    pub detail: Option<String>,
    pub provider_data: Option<JsonValue>,
}

impl RawStatus {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            detail: None,
            provider_data: None,
        }
    }
}
