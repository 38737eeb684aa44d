pub mod health;

use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use crate::catalog::handlers as catalog;
use crate::config::Config;
use crate::intake::handlers as intake;
use crate::payments::handlers as payments;
use crate::render::handlers as render;
use crate::state::AppState;

/// Headroom over the upload limit for the multipart envelope and form fields.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Scheme and authority of a URL, without any path.
fn origin_of(url: &str) -> &str {
    let after_scheme = url.find("://").map_or(0, |i| i + 3);
    match url[after_scheme..].find('/') {
        Some(slash) => &url[..after_scheme + slash],
        None => url,
    }
}

/// Development allows any origin. Production only allows the public site.
pub fn cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    if !config.environment.is_production() {
        return Ok(CorsLayer::permissive());
    }
    let origin = origin_of(&config.public_base_url);
    let origin = HeaderValue::from_str(origin)
        .with_context(|| format!("PUBLIC_BASE_URL origin '{origin}' is not a valid header value"))?;
    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]))
}

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes + MULTIPART_OVERHEAD;

    Router::new()
        .route("/health", get(health::health_handler))
        .route("/catalog", get(catalog::handle_catalog))
        // Intake
        .route("/analyze", post(intake::handle_analyze))
        // Checkout
        .route("/payment/create", post(payments::handle_create_payment))
        .route("/payment/promo/validate", post(payments::handle_validate_promo))
        .route("/payment/success", get(payments::handle_payment_success))
        .route(
            "/payment/mock-checkout/:session_id",
            get(payments::handle_mock_checkout),
        )
        .route(
            "/payment/mock-confirm/:session_id",
            post(payments::handle_mock_confirm),
        )
        .route("/webhooks/provider", post(payments::handle_webhook))
        .route("/admin/promo-codes", post(payments::handle_create_promo_code))
        // Results
        .route("/results/:analysis_id", get(render::handle_get_results))
        .route("/results/:analysis_id/view", get(render::handle_results_page))
        .route("/results/:analysis_id/retry", post(render::handle_retry))
        .route("/export/:analysis_id/:format", get(render::handle_export))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
