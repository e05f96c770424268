use crate::gateways::error::{GatewayError, GatewayResult};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::warn;

/// Shared HTTP client for gateway adapters.
///
/// Deliberately does not retry: the reconciliation poller owns all retry and
/// backoff policy, so this layer only classifies failures (429 vs transient
/// vs provider error) and surfaces the provider's error body.
#[derive(Clone)]
pub struct GatewayHttpClient {
    gateway: String,
    client: Client,
}

impl GatewayHttpClient {
    pub fn new(gateway: impl Into<String>, timeout: Duration) -> GatewayResult<Self> {
        let gateway = gateway.into();
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            GatewayError::Configuration {
                gateway: gateway.clone(),
                message: format!("failed to initialize HTTP client: {}", e),
            }
        })?;
        Ok(Self { gateway, client })
    }

    /// JSON-in / JSON-out request with bearer auth.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        bearer_token: Option<&str>,
        body: Option<&JsonValue>,
        additional_headers: &[(&str, &str)],
    ) -> GatewayResult<T> {
        let mut request = self.client.request(method, url);
        if let Some(token) = bearer_token {
            request = request.bearer_auth(token);
        }
        for (key, value) in additional_headers {
            request = request.header(*key, *value);
        }
        if let Some(payload) = body {
            request = request.json(payload);
        }
        self.execute(request).await
    }

    /// Form-encoded request with bearer auth (Stripe's wire format).
    pub async fn request_form<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        bearer_token: &str,
        form: &[(&str, String)],
    ) -> GatewayResult<T> {
        let request = self
            .client
            .request(method, url)
            .bearer_auth(bearer_token)
            .form(form);
        self.execute(request).await
    }

    /// JSON POST with HTTP basic auth (Efí's OAuth token endpoint takes the
    /// grant as a JSON body).
    pub async fn post_json_basic_auth<T: DeserializeOwned>(
        &self,
        url: &str,
        username: &str,
        password: &str,
        body: &JsonValue,
    ) -> GatewayResult<T> {
        let request = self
            .client
            .post(url)
            .basic_auth(username, Some(password))
            .json(body);
        self.execute(request).await
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> GatewayResult<T> {
        let response = request.send().await.map_err(|e| GatewayError::Transient {
            gateway: self.gateway.clone(),
            message: format!("provider request failed: {}", e),
        })?;

        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let text = response.text().await.unwrap_or_default();

        if status.is_success() {
            return serde_json::from_str::<T>(&text).map_err(|e| GatewayError::Provider {
                gateway: self.gateway.clone(),
                message: format!("invalid provider JSON response: {}", e),
                status_code: Some(status.as_u16()),
            });
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!(gateway = %self.gateway, "provider rate limit hit");
            return Err(GatewayError::RateLimited {
                gateway: self.gateway.clone(),
                retry_after_seconds: retry_after,
            });
        }

        if status.is_server_error() {
            return Err(GatewayError::Transient {
                gateway: self.gateway.clone(),
                message: format!("HTTP {}: {}", status.as_u16(), truncate(&text, 200)),
            });
        }

        Err(GatewayError::Provider {
            gateway: self.gateway.clone(),
            message: extract_error_message(&text)
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
            status_code: Some(status.as_u16()),
        })
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

/// Pull the human-readable message out of a provider error body, trying the
/// envelope shapes the three providers use.
fn extract_error_message(body: &str) -> Option<String> {
    let parsed: JsonValue = serde_json::from_str(body).ok()?;
    for key in ["message", "error_description", "detail"] {
        if let Some(value) = parsed.get(key).and_then(|v| v.as_str()) {
            if !value.trim().is_empty() {
                return Some(value.to_string());
            }
        }
    }
    // Stripe nests errors under {"error": {"message": ...}}.
    parsed
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
