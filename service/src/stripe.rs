//! Stripe Checkout client.
//!
//! Implements [`PaymentProvider`] against the Stripe REST API. Requests are
//! form encoded; every checkout carries the registration, transaction and
//! tenant ids as metadata on both the session and its payment intent so that
//! session and charge webhooks can be correlated.

use registration_core::ProviderError;
use registration_core::provider::{CheckoutSession, CheckoutSessionRequest, PaymentProvider};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

/// Production API base.
pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Stripe API client
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: String,
    api_base: String,
}

impl std::fmt::Debug for StripeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeClient")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: String,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl StripeClient {
    /// Create a client for the production API.
    #[must_use]
    pub fn new(secret_key: String) -> Self {
        Self::with_api_base(secret_key, DEFAULT_API_BASE.to_string())
    }

    /// Create a client for a custom API base (proxies, test servers).
    #[must_use]
    pub fn with_api_base(secret_key: String, api_base: String) -> Self {
        Self {
            client: Client::new(),
            secret_key,
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    fn post(&self, path: &str, account_id: Option<&str>) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .post(format!("{}{path}", self.api_base))
            .bearer_auth(&self.secret_key)
            .timeout(REQUEST_TIMEOUT);
        match account_id {
            Some(account) => builder.header("Stripe-Account", account),
            None => builder,
        }
    }
}

/// Form fields of a checkout session request.
fn checkout_form(request: &CheckoutSessionRequest) -> Vec<(String, String)> {
    let metadata = [
        ("registration_id", request.metadata.registration_id.to_string()),
        ("transaction_id", request.metadata.transaction_id.to_string()),
        ("tenant_id", request.metadata.tenant_id.to_string()),
    ];

    let mut form = vec![
        ("mode".to_string(), "payment".to_string()),
        ("success_url".to_string(), request.success_url.clone()),
        ("cancel_url".to_string(), request.cancel_url.clone()),
        ("line_items[0][quantity]".to_string(), "1".to_string()),
        (
            "line_items[0][price_data][currency]".to_string(),
            request.currency.clone(),
        ),
        (
            "line_items[0][price_data][unit_amount]".to_string(),
            request.amount.cents().to_string(),
        ),
        (
            "line_items[0][price_data][product_data][name]".to_string(),
            request.description.clone(),
        ),
    ];
    if let Some(tax_rate) = &request.tax_rate_id {
        form.push(("line_items[0][tax_rates][0]".to_string(), tax_rate.clone()));
    }
    if let Some(expires_at) = request.expires_at {
        form.push(("expires_at".to_string(), expires_at.timestamp().to_string()));
    }
    for (key, value) in metadata {
        form.push((format!("metadata[{key}]"), value.clone()));
        form.push((format!("payment_intent_data[metadata][{key}]"), value));
    }
    form
}

fn send_error(e: &reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Network(e.to_string())
    }
}

async fn api_error(response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&body)
        .ok()
        .and_then(|e| e.error.message)
        .unwrap_or(body);
    ProviderError::Api { status, message }
}

impl PaymentProvider for StripeClient {
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession, ProviderError> {
        let response = self
            .post("/v1/checkout/sessions", request.account_id.as_deref())
            .header(
                "Idempotency-Key",
                request.metadata.transaction_id.to_string(),
            )
            .form(&checkout_form(request))
            .send()
            .await
            .map_err(|e| send_error(&e))?;

        match response.status() {
            StatusCode::OK => {
                let session: SessionResponse = response
                    .json()
                    .await
                    .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
                tracing::debug!(session_id = %session.id, "Checkout session created");
                Ok(CheckoutSession {
                    id: session.id,
                    url: session.url,
                })
            }
            _ => Err(api_error(response).await),
        }
    }

    async fn expire_checkout_session(
        &self,
        session_id: &str,
        account_id: Option<&str>,
    ) -> Result<(), ProviderError> {
        let response = self
            .post(&format!("/v1/checkout/sessions/{session_id}/expire"), account_id)
            .send()
            .await
            .map_err(|e| send_error(&e))?;

        if response.status().is_success() {
            tracing::debug!(session_id, "Checkout session expired");
            Ok(())
        } else {
            Err(api_error(response).await)
        }
    }
}
