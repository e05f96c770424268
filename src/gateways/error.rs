use crate::gateways::types::{GatewayKind, PaymentMethod};
use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Missing or structurally invalid credentials. Fatal, surfaced at
    /// adapter construction; never retried.
    #[error("gateway configuration error: gateway={gateway}, {message}")]
    Configuration { gateway: String, message: String },

    /// Caller-supplied request data failed validation; no provider call was
    /// attempted.
    #[error("invalid payment request: {message}")]
    InvalidRequest { message: String },

    /// The caller asked for a payment method this gateway cannot provide.
    #[error("unsupported payment method {method} for gateway {gateway}")]
    UnsupportedMethod {
        gateway: GatewayKind,
        method: PaymentMethod,
    },

    /// Network failure or provider 5xx. Absorbed and retried by the poller.
    #[error("transient gateway error: gateway={gateway}, {message}")]
    Transient { gateway: String, message: String },

    /// Provider asked us to slow down (HTTP 429 or equivalent). The poller
    /// backs off; this must never be read as a payment rejection.
    #[error("rate limited by gateway {gateway}")]
    RateLimited {
        gateway: String,
        retry_after_seconds: Option<u64>,
    },

    /// Explicit decline or cancellation from the provider. Terminal.
    #[error("payment rejected by gateway {gateway}: {message}")]
    Rejected { gateway: String, message: String },

    /// Any other provider-level failure, carrying the provider's own message
    /// when the error body was parseable, else the raw HTTP status.
    #[error("provider error: gateway={gateway}, status={status_code:?}, {message}")]
    Provider {
        gateway: String,
        message: String,
        status_code: Option<u16>,
    },
}

impl GatewayError {
    /// Whether the poller may keep polling after seeing this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Transient { .. } | GatewayError::RateLimited { .. }
        )
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, GatewayError::RateLimited { .. })
    }
}
