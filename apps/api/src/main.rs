mod analysis;
mod catalog;
mod config;
mod db;
mod errors;
mod intake;
mod llm_client;
mod models;
mod payments;
mod records;
mod render;
mod routes;
mod state;

use anyhow::Result;
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use std::sync::Arc;

use crate::analysis::analyzer::{LlmAnalyzer, ResumeAnalyzer};
use crate::catalog::pricing::PricingTable;
use crate::config::Config;
use crate::db::create_pool;
use crate::llm_client::LlmClient;
use crate::payments::provider::{MockProvider, PaymentProvider, StripeProvider};
use crate::payments::webhook::WebhookVerifier;
use crate::routes::{build_router, cors_layer};
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Configuration first; missing required variables abort startup
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "api={level},tower_http={level}",
                level = &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting resume review API v{} ({:?})",
        env!("CARGO_PKG_VERSION"),
        config.environment
    );

    // SQLite, migrations applied on connect
    let db = create_pool(&config.database_url).await?;

    let llm = LlmClient::new(config.anthropic_api_key.clone(), config.llm_timeout)?;
    info!("LLM client initialized (model: {})", llm_client::MODEL);
    let analyzer: Arc<dyn ResumeAnalyzer> = Arc::new(LlmAnalyzer::new(llm));

    let pricing = Arc::new(PricingTable::load(config.pricing_file.as_deref())?);

    let payments: Arc<dyn PaymentProvider> = match &config.stripe_secret_key {
        Some(key) => Arc::new(StripeProvider::new(key.clone())),
        None => {
            warn!("STRIPE_SECRET_KEY not set; using the mock checkout provider");
            Arc::new(MockProvider::new(config.public_base_url.clone()))
        }
    };
    info!("Payment provider: {}", payments.name());

    let webhooks = config.stripe_webhook_secret.clone().map(WebhookVerifier::new);
    if webhooks.is_none() {
        warn!("STRIPE_WEBHOOK_SECRET not set; the webhook endpoint is disabled");
    }

    let state = AppState {
        db,
        config: config.clone(),
        analyzer,
        payments,
        webhooks,
        pricing,
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config)?);

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
