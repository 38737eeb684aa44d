use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::Html,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::handlers::country_from_headers;
use crate::catalog::{ProductOrBundle, Region};
use crate::errors::AppError;
use crate::models::payment::SessionStatus;
use crate::models::promo::PromoCode;
use crate::payments::pipeline::{Confirmation, CreateSession, Reconciliation, SessionOutcome};
use crate::payments::promo::{create_promo_code, validate_code, DiscountedPrice, NewPromoCode};
use crate::payments::webhook::parse_event;
use crate::records::analyses::require_analysis;
use crate::records::sessions::get_session;
use crate::state::AppState;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub analysis_id: Uuid,
    pub product_or_bundle: String,
    pub job_posting: Option<String>,
    pub promo_code: Option<String>,
    pub region: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PromoPreviewRequest {
    pub analysis_id: Uuid,
    pub product_or_bundle: String,
    pub promo_code: String,
    pub region: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SuccessQuery {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

fn resolve_region(state: &AppState, explicit: Option<&str>, headers: &HeaderMap) -> Region {
    Region::resolve(explicit, country_from_headers(headers), state.config.default_region)
}

/// POST /payment/create
pub async fn handle_create_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreatePaymentRequest>,
) -> Result<Json<SessionOutcome>, AppError> {
    let region = resolve_region(&state, req.region.as_deref(), &headers);
    let outcome = state
        .pipeline()
        .create_payment_session(CreateSession {
            analysis_id: req.analysis_id,
            product_or_bundle: req.product_or_bundle,
            job_posting: req.job_posting,
            promo_code: req.promo_code,
            region,
        })
        .await?;
    Ok(Json(outcome))
}

/// POST /payment/promo/validate
///
/// Previews a code's effect on the price. Nothing is recorded.
pub async fn handle_validate_promo(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<PromoPreviewRequest>,
) -> Result<Json<DiscountedPrice>, AppError> {
    let item = ProductOrBundle::parse(&req.product_or_bundle).ok_or_else(|| {
        AppError::Validation(format!("Unknown product or bundle '{}'", req.product_or_bundle))
    })?;
    let analysis = require_analysis(&state.db, req.analysis_id).await?;
    let region = resolve_region(&state, req.region.as_deref(), &headers);
    let base = state.pricing.price(region, item)?;

    let price = validate_code(&state.db, &req.promo_code, item, base, analysis.id, Utc::now()).await?;
    Ok(Json(price))
}

/// POST /webhooks/provider
///
/// Body must be the raw bytes the provider signed.
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let Some(verifier) = state.webhooks.as_ref() else {
        return Err(AppError::NotFound("Webhooks are not configured".to_string()));
    };
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Unauthorized)?;

    verifier.verify_signature(&body, signature).map_err(|e| {
        warn!("Rejected webhook: {e}");
        AppError::Unauthorized
    })?;
    let event = parse_event(&body).map_err(|e| AppError::Validation(e.to_string()))?;

    let action = state.pipeline().handle_webhook_event(event).await?;
    info!(?action, "Webhook processed");
    Ok(Json(WebhookAck { received: true }))
}

/// POST /payment/mock-confirm/:session_id
///
/// Development stand-in for the provider's webhook.
pub async fn handle_mock_confirm(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Confirmation>, AppError> {
    if state.config.environment.is_production() {
        return Err(AppError::NotFound("Not found".to_string()));
    }
    let confirmation = state.pipeline().confirm_payment(&session_id).await?;
    Ok(Json(confirmation))
}

/// GET /payment/success?session_id=
///
/// Landing endpoint after checkout. Confirms from the provider's view of the
/// session, so a lost webhook still ends in delivery.
pub async fn handle_payment_success(
    State(state): State<AppState>,
    Query(query): Query<SuccessQuery>,
) -> Result<Json<Reconciliation>, AppError> {
    let outcome = state.pipeline().reconcile_session(&query.session_id).await?;
    Ok(Json(outcome))
}

/// GET /payment/mock-checkout/:session_id
///
/// Hosted-checkout stand-in for the development provider.
pub async fn handle_mock_checkout(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Html<String>, AppError> {
    if state.config.environment.is_production() {
        return Err(AppError::NotFound("Not found".to_string()));
    }
    let session = get_session(&state.db, &session_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Payment session {session_id} not found")))?;
    if session.status != SessionStatus::Created {
        return Err(AppError::Conflict(format!(
            "Payment session {session_id} is {}",
            session.status.as_str()
        )));
    }

    let amount = format!("{:.2}", session.amount as f64 / 100.0);
    Ok(Html(format!(
        r#"<!doctype html>
<html><head><meta charset="utf-8"><title>Mock checkout</title></head>
<body>
<h1>Mock checkout</h1>
<p>{item}: {amount} {currency}</p>
<form method="post" action="/payment/mock-confirm/{id}">
<button type="submit">Pay</button>
</form>
</body></html>"#,
        item = session.product_or_bundle.display_name(),
        currency = session.currency.to_ascii_uppercase(),
        id = session.id,
    )))
}

/// Compares the bearer token without leaking where it first differs.
fn bearer_matches(headers: &HeaderMap, expected: &str) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|provided| bool::from(provided.as_bytes().ct_eq(expected.as_bytes())))
}

/// POST /admin/promo-codes
pub async fn handle_create_promo_code(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<NewPromoCode>,
) -> Result<(StatusCode, Json<PromoCode>), AppError> {
    let Some(expected) = state.config.admin_api_token.as_deref() else {
        return Err(AppError::NotFound("Not found".to_string()));
    };
    if !bearer_matches(&headers, expected) {
        return Err(AppError::Unauthorized);
    }

    let promo = create_promo_code(&state.db, req, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(promo)))
}
