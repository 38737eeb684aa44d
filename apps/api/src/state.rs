use std::sync::Arc;

use sqlx::SqlitePool;

use crate::analysis::analyzer::ResumeAnalyzer;
use crate::catalog::pricing::PricingTable;
use crate::config::Config;
use crate::payments::pipeline::Pipeline;
use crate::payments::provider::PaymentProvider;
use crate::payments::webhook::WebhookVerifier;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Config,
    /// Pluggable analysis collaborator. Default: `LlmAnalyzer`.
    pub analyzer: Arc<dyn ResumeAnalyzer>,
    /// Stripe in production, the mock provider in development without keys.
    pub payments: Arc<dyn PaymentProvider>,
    /// `None` when no webhook secret is configured.
    pub webhooks: Option<WebhookVerifier>,
    pub pricing: Arc<PricingTable>,
}

impl AppState {
    pub fn pipeline(&self) -> Pipeline {
        Pipeline {
            db: self.db.clone(),
            analyzer: self.analyzer.clone(),
            provider: self.payments.clone(),
            pricing: self.pricing.clone(),
            llm_timeout: self.config.llm_timeout,
            public_base_url: Arc::from(self.config.public_base_url.as_str()),
        }
    }
}
