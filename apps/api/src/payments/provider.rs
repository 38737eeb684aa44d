//! Payment provider seam: hosted checkout sessions.
//!
//! `StripeProvider` talks to the Stripe REST API with form-encoded requests.
//! `MockProvider` is for local development; its checkout URL points back at
//! this service and every session reads as paid.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, instrument};
use uuid::Uuid;

use crate::catalog::ProductOrBundle;

const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";

/// Placeholder Stripe substitutes with the real session id on redirect.
pub const SESSION_ID_PLACEHOLDER: &str = "{CHECKOUT_SESSION_ID}";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Unexpected provider response: {0}")]
    InvalidResponse(String),
}

/// Everything a provider needs to open a checkout.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub analysis_id: Uuid,
    pub item: ProductOrBundle,
    pub description: String,
    /// Minor currency units.
    pub amount: i64,
    pub currency: String,
    /// May contain [`SESSION_ID_PLACEHOLDER`].
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCheckout {
    pub session_id: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderSessionStatus {
    Open,
    Paid,
    Expired,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Short name stored on each payment session.
    fn name(&self) -> &'static str;

    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<ProviderCheckout, ProviderError>;

    async fn retrieve_session(&self, session_id: &str)
        -> Result<ProviderSessionStatus, ProviderError>;
}

// ────────────────────────────────────────────
// Stripe
// ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct StripeCheckoutSession {
    id: String,
    url: Option<String>,
    status: Option<String>,
    payment_status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
}

#[derive(Clone)]
pub struct StripeProvider {
    client: Client,
    secret_key: String,
}

impl StripeProvider {
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            secret_key: secret_key.into(),
        }
    }

    async fn stripe_request(
        &self,
        method: reqwest::Method,
        endpoint: &str,
        form: Option<&[(String, String)]>,
    ) -> Result<StripeCheckoutSession, ProviderError> {
        let url = format!("{STRIPE_API_BASE}{endpoint}");

        let mut request = self
            .client
            .request(method, &url)
            .basic_auth(&self.secret_key, Option::<&str>::None);
        if let Some(form) = form {
            request = request.form(form);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<StripeErrorBody>(&body)
                .ok()
                .and_then(|b| b.error.message)
                .unwrap_or_else(|| "no error message".to_string());
            error!(status = %status, message = %message, "Stripe API error");
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<StripeCheckoutSession>()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }
}

/// Form fields for a one-off payment checkout with a single inline price.
fn checkout_form(request: &CheckoutRequest) -> Vec<(String, String)> {
    let analysis_id = request.analysis_id.to_string();
    [
        ("mode", "payment".to_string()),
        ("success_url", request.success_url.clone()),
        ("cancel_url", request.cancel_url.clone()),
        ("client_reference_id", analysis_id.clone()),
        ("line_items[0][quantity]", "1".to_string()),
        ("line_items[0][price_data][currency]", request.currency.clone()),
        ("line_items[0][price_data][unit_amount]", request.amount.to_string()),
        (
            "line_items[0][price_data][product_data][name]",
            request.description.clone(),
        ),
        ("metadata[analysis_id]", analysis_id),
        ("metadata[product_or_bundle]", request.item.as_str().to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    fn name(&self) -> &'static str {
        "stripe"
    }

    #[instrument(skip(self, request), fields(analysis_id = %request.analysis_id, item = %request.item))]
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<ProviderCheckout, ProviderError> {
        debug!(amount = request.amount, currency = %request.currency, "Creating Stripe checkout session");

        let form = checkout_form(request);
        let session = self
            .stripe_request(reqwest::Method::POST, "/checkout/sessions", Some(&form))
            .await?;

        let url = session.url.ok_or_else(|| {
            ProviderError::InvalidResponse(format!("checkout session {} has no url", session.id))
        })?;
        Ok(ProviderCheckout {
            session_id: session.id,
            url,
        })
    }

    #[instrument(skip(self))]
    async fn retrieve_session(
        &self,
        session_id: &str,
    ) -> Result<ProviderSessionStatus, ProviderError> {
        let session = self
            .stripe_request(
                reqwest::Method::GET,
                &format!("/checkout/sessions/{session_id}"),
                None,
            )
            .await?;
        Ok(session_status(
            session.status.as_deref(),
            session.payment_status.as_deref(),
        ))
    }
}

fn session_status(status: Option<&str>, payment_status: Option<&str>) -> ProviderSessionStatus {
    match (status, payment_status) {
        (_, Some("paid" | "no_payment_required")) => ProviderSessionStatus::Paid,
        (Some("expired"), _) => ProviderSessionStatus::Expired,
        _ => ProviderSessionStatus::Open,
    }
}

// ────────────────────────────────────────────
// Mock
// ────────────────────────────────────────────

#[derive(Clone)]
pub struct MockProvider {
    public_base_url: String,
}

impl MockProvider {
    pub fn new(public_base_url: impl Into<String>) -> Self {
        Self {
            public_base_url: public_base_url.into(),
        }
    }
}

#[async_trait]
impl PaymentProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<ProviderCheckout, ProviderError> {
        let session_id = format!("mock_cs_{}", Uuid::new_v4().simple());
        debug!(session_id = %session_id, analysis_id = %request.analysis_id, "Mock checkout session created");
        Ok(ProviderCheckout {
            url: format!("{}/payment/mock-checkout/{session_id}", self.public_base_url),
            session_id,
        })
    }

    async fn retrieve_session(
        &self,
        _session_id: &str,
    ) -> Result<ProviderSessionStatus, ProviderError> {
        Ok(ProviderSessionStatus::Paid)
    }
}
