//! Payment-to-premium pipeline.
//!
//! `create_payment_session` → provider checkout (or the free fast path) →
//! `confirm_payment` → premium generation. Every step can be repeated:
//! confirmation is a conditional status move, and each product is claimed
//! before generation, so a webhook delivered twice never generates twice.
//!
//! Settlement (marking the analysis paid, redeeming the promo code and
//! generating) runs on its own task once the session is completed. A caller
//! that goes away mid-request does not strand the purchase, and a later
//! confirmation picks up any product that never started.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{error, info, instrument, warn, Instrument};
use uuid::Uuid;

use crate::analysis::analyzer::ResumeAnalyzer;
use crate::analysis::results::{AnalysisOutcome, FreeOutcome, OutcomeErrorKind, ProductOutcome};
use crate::catalog::pricing::PricingTable;
use crate::catalog::{ProductId, ProductOrBundle, Region};
use crate::errors::AppError;
use crate::models::analysis::{
    AnalysisRecord, GenerationStatus, PaymentStatus, PremiumResult, PremiumStatus,
};
use crate::models::payment::{PaymentSession, SessionStatus};
use crate::payments::promo::{redeem_use, release_use, reserve_use, validate_code};
use crate::payments::provider::{
    CheckoutRequest, PaymentProvider, ProviderSessionStatus, SESSION_ID_PLACEHOLDER,
};
use crate::payments::webhook::{WebhookEvent, WebhookEventType};
use crate::records::analyses::{
    claim_product, list_premium_results, mark_paid, mark_payment_failed, require_analysis,
    set_generation_status, set_requested_products, store_product_outcome,
};
use crate::records::sessions::{
    cancel_session, complete_session, find_open_session, get_session, insert_session,
    other_completed_session, NewSession,
};

pub const MAX_JOB_POSTING_CHARS: usize = 20_000;

/// Provider name recorded on sessions that never leave this service.
const FREE_PROVIDER: &str = "free";

/// Everything the pipeline touches. Cheap to clone, so settlement can own a copy.
#[derive(Clone)]
pub struct Pipeline {
    pub db: SqlitePool,
    pub analyzer: Arc<dyn ResumeAnalyzer>,
    pub provider: Arc<dyn PaymentProvider>,
    pub pricing: Arc<PricingTable>,
    /// Bound on each product's model call.
    pub llm_timeout: Duration,
    pub public_base_url: Arc<str>,
}

#[derive(Debug, Clone)]
pub struct CreateSession {
    pub analysis_id: Uuid,
    pub product_or_bundle: String,
    pub job_posting: Option<String>,
    pub promo_code: Option<String>,
    pub region: Region,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GenerationReport {
    pub status: GenerationStatus,
    pub total: usize,
    pub ready: usize,
    pub failed: usize,
    pub pending: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionOutcome {
    /// Send the user to the provider's hosted checkout.
    Redirect {
        session_id: String,
        checkout_url: String,
        amount: i64,
        currency: String,
        products: Vec<ProductId>,
    },
    /// Nothing to pay; premium generation already ran.
    Confirmed {
        session_id: String,
        amount: i64,
        currency: String,
        products: Vec<ProductId>,
        generation: GenerationReport,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct Confirmation {
    pub session_id: String,
    pub analysis_id: Uuid,
    /// True when an earlier call already confirmed this session.
    pub already_confirmed: bool,
    pub generation: GenerationReport,
}

/// Outcome of asking the provider about a session after the redirect.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reconciliation {
    Confirmed {
        #[serde(flatten)]
        confirmation: Confirmation,
    },
    Pending {
        session_id: String,
    },
    Expired {
        session_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookAction {
    Confirmed { session_id: String },
    Cancelled { session_id: String },
    PaymentFailed { session_id: String },
    Ignored,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultsView {
    pub analysis_id: Uuid,
    pub file_name: String,
    pub payment_status: PaymentStatus,
    pub generation_status: GenerationStatus,
    pub free_result: Option<FreeOutcome>,
    pub requested_products: Vec<ProductId>,
    pub premium_results: Vec<PremiumResult>,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
}

impl ResultsView {
    fn new(record: AnalysisRecord, premium_results: Vec<PremiumResult>) -> Self {
        Self {
            analysis_id: record.id,
            file_name: record.file_name,
            payment_status: record.payment_status,
            generation_status: record.generation_status,
            free_result: record.free_result,
            requested_products: record.requested_products,
            premium_results,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

fn has_text(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}

/// Trims the posting; blank becomes `None`, oversized is rejected.
pub fn normalize_job_posting(raw: Option<&str>) -> Result<Option<String>, AppError> {
    let Some(text) = raw.map(str::trim).filter(|t| !t.is_empty()) else {
        return Ok(None);
    };
    if text.chars().count() > MAX_JOB_POSTING_CHARS {
        return Err(AppError::Validation(format!(
            "Job posting is longer than {MAX_JOB_POSTING_CHARS} characters"
        )));
    }
    Ok(Some(text.to_string()))
}

impl Pipeline {
    // ────────────────────────────────────────────
    // Checkout
    // ────────────────────────────────────────────

    #[instrument(skip(self, request), fields(analysis_id = %request.analysis_id, item = %request.product_or_bundle))]
    pub async fn create_payment_session(
        &self,
        request: CreateSession,
    ) -> Result<SessionOutcome, AppError> {
        let item = ProductOrBundle::parse(request.product_or_bundle.trim()).ok_or_else(|| {
            AppError::Validation(format!(
                "Unknown product or bundle '{}'",
                request.product_or_bundle
            ))
        })?;
        let job_posting = normalize_job_posting(request.job_posting.as_deref())?;

        let record = require_analysis(&self.db, request.analysis_id).await?;
        match record.payment_status {
            PaymentStatus::Paid => {
                return Err(AppError::Conflict(
                    "This analysis has already been paid for".to_string(),
                ))
            }
            PaymentStatus::Failed => {
                return Err(AppError::Conflict(
                    "Payment for this analysis failed; upload the resume again".to_string(),
                ))
            }
            PaymentStatus::Unpaid => {}
        }

        let products = item.products();
        let posting_available = job_posting.is_some() || has_text(record.job_posting.as_deref());
        if let Some(product) = products
            .iter()
            .find(|p| p.requires_job_posting() && !posting_available)
        {
            return Err(AppError::Validation(format!(
                "{} requires a job posting",
                product.display_name()
            )));
        }

        let base = self.pricing.price(request.region, item)?;
        let promo = match request.promo_code.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            Some(code) => Some(validate_code(&self.db, code, item, base, record.id, Utc::now()).await?),
            None => None,
        };
        let amount = promo.as_ref().map_or(base.amount, |p| p.final_amount);
        let promo_code = promo.map(|p| p.code);

        if !set_requested_products(&self.db, record.id, &products, job_posting.as_deref(), Utc::now())
            .await?
        {
            return Err(AppError::Conflict(
                "This analysis is no longer awaiting payment".to_string(),
            ));
        }

        if let Some(open) = find_open_session(&self.db, record.id, item, amount, base.currency).await? {
            if let Some(checkout_url) = open.checkout_url {
                info!(session_id = %open.id, "Reusing open checkout session");
                return Ok(SessionOutcome::Redirect {
                    session_id: open.id,
                    checkout_url,
                    amount: open.amount,
                    currency: open.currency,
                    products: open.products,
                });
            }
        }

        if let Some(code) = promo_code.as_deref() {
            reserve_use(&self.db, code, record.id, Utc::now()).await?;
        }

        if amount == 0 {
            let session_id = format!("free_{}", Uuid::new_v4().simple());
            insert_session(
                &self.db,
                NewSession {
                    id: &session_id,
                    analysis_id: record.id,
                    product_or_bundle: item,
                    products: &products,
                    amount: 0,
                    currency: base.currency,
                    region: request.region,
                    promo_code: promo_code.as_deref(),
                    checkout_url: None,
                    provider: FREE_PROVIDER,
                },
                Utc::now(),
            )
            .await?;
            info!(session_id = %session_id, "Nothing to pay, confirming immediately");

            let confirmation = self.confirm_payment(&session_id).await?;
            return Ok(SessionOutcome::Confirmed {
                session_id,
                amount: 0,
                currency: base.currency.to_string(),
                products,
                generation: confirmation.generation,
            });
        }

        let checkout = match self
            .provider
            .create_checkout_session(&CheckoutRequest {
                analysis_id: record.id,
                item,
                description: item.display_name().to_string(),
                amount,
                currency: base.currency.to_string(),
                success_url: format!(
                    "{}/payment/success?session_id={SESSION_ID_PLACEHOLDER}",
                    self.public_base_url
                ),
                cancel_url: format!("{}/results/{}/view", self.public_base_url, record.id),
            })
            .await
        {
            Ok(checkout) => checkout,
            Err(e) => {
                error!(error = %e, provider = self.provider.name(), "Checkout session creation failed");
                if let Some(code) = promo_code.as_deref() {
                    release_use(&self.db, code, record.id).await?;
                }
                return Err(AppError::PaymentProvider(e.to_string()));
            }
        };

        insert_session(
            &self.db,
            NewSession {
                id: &checkout.session_id,
                analysis_id: record.id,
                product_or_bundle: item,
                products: &products,
                amount,
                currency: base.currency,
                region: request.region,
                promo_code: promo_code.as_deref(),
                checkout_url: Some(&checkout.url),
                provider: self.provider.name(),
            },
            Utc::now(),
        )
        .await?;
        info!(session_id = %checkout.session_id, amount, currency = base.currency, "Checkout session created");

        Ok(SessionOutcome::Redirect {
            session_id: checkout.session_id,
            checkout_url: checkout.url,
            amount,
            currency: base.currency.to_string(),
            products,
        })
    }

    // ────────────────────────────────────────────
    // Confirmation
    // ────────────────────────────────────────────

    #[instrument(skip(self))]
    pub async fn confirm_payment(&self, session_id: &str) -> Result<Confirmation, AppError> {
        let session = self.require_session(session_id).await?;
        match session.status {
            SessionStatus::Completed => return self.already_confirmed(session).await,
            SessionStatus::Cancelled => {
                return Err(AppError::Conflict(format!(
                    "Payment session {session_id} was cancelled"
                )))
            }
            SessionStatus::Created => {}
        }

        if !complete_session(&self.db, &session.id, Utc::now()).await? {
            // Lost a race with another confirmation; report whatever won.
            let current = self.require_session(session_id).await?;
            return match current.status {
                SessionStatus::Completed => self.already_confirmed(current).await,
                _ => Err(AppError::Conflict(format!(
                    "Payment session {session_id} is no longer open"
                ))),
            };
        }

        let generation = self.settle_detached(session.clone()).await?;
        Ok(Confirmation {
            session_id: session.id,
            analysis_id: session.analysis_id,
            already_confirmed: false,
            generation,
        })
    }

    /// Reports on an earlier confirmation, finishing whatever it left undone.
    async fn already_confirmed(&self, session: PaymentSession) -> Result<Confirmation, AppError> {
        let record = require_analysis(&self.db, session.analysis_id).await?;
        let generation = match record.payment_status {
            PaymentStatus::Unpaid => {
                warn!(session_id = %session.id, "Completed session was never settled, settling now");
                self.settle_detached(session.clone()).await?
            }
            PaymentStatus::Paid => {
                let unstarted = self.unstarted_products(&record).await?;
                if unstarted.is_empty() {
                    self.generation_report(&record).await?
                } else {
                    warn!(session_id = %session.id, products = ?unstarted, "Resuming premium generation");
                    self.generate_detached(record, unstarted).await?
                }
            }
            PaymentStatus::Failed => self.generation_report(&record).await?,
        };
        Ok(Confirmation {
            session_id: session.id,
            analysis_id: session.analysis_id,
            already_confirmed: true,
            generation,
        })
    }

    /// Runs `settle` on its own task and waits for it.
    async fn settle_detached(&self, session: PaymentSession) -> Result<GenerationReport, AppError> {
        let pipeline = self.clone();
        tokio::spawn(async move { pipeline.settle(session).await }.in_current_span())
            .await
            .map_err(|e| AppError::Internal(e.into()))?
    }

    async fn generate_detached(
        &self,
        record: AnalysisRecord,
        products: Vec<ProductId>,
    ) -> Result<GenerationReport, AppError> {
        let pipeline = self.clone();
        tokio::spawn(
            async move { pipeline.generate_premium(&record, &products).await }.in_current_span(),
        )
        .await
        .map_err(|e| AppError::Internal(e.into()))?
    }

    /// Marks the analysis paid, redeems the promo code and generates the
    /// purchased products. Safe to run more than once for a session.
    async fn settle(self, session: PaymentSession) -> Result<GenerationReport, AppError> {
        let now = Utc::now();
        if mark_paid(&self.db, session.analysis_id, &session.products, now).await? {
            info!(session_id = %session.id, analysis_id = %session.analysis_id, "Payment confirmed");
        } else {
            let record = require_analysis(&self.db, session.analysis_id).await?;
            let paid_elsewhere = other_completed_session(&self.db, session.analysis_id, &session.id).await?;
            if record.payment_status != PaymentStatus::Paid || paid_elsewhere {
                error!(
                    session_id = %session.id,
                    analysis_id = %session.analysis_id,
                    payment_status = record.payment_status.as_str(),
                    amount = session.amount,
                    currency = %session.currency,
                    "Payment completed for an analysis that cannot accept it; refund required"
                );
                return Err(AppError::Conflict(
                    "This analysis was already settled by another payment".to_string(),
                ));
            }
        }

        if let Some(code) = session.promo_code.as_deref() {
            redeem_use(&self.db, code, session.analysis_id, &session.id, now).await?;
        }

        let record = require_analysis(&self.db, session.analysis_id).await?;
        self.generate_premium(&record, &record.requested_products).await
    }

    /// Requested products with no result row, or one still marked pending.
    async fn unstarted_products(&self, record: &AnalysisRecord) -> Result<Vec<ProductId>, AppError> {
        let results = list_premium_results(&self.db, record.id).await?;
        Ok(record
            .requested_products
            .iter()
            .copied()
            .filter(|product| {
                !results
                    .iter()
                    .any(|r| r.product == *product && r.status != PremiumStatus::Pending)
            })
            .collect())
    }

    /// Cancels an open session and hands back the promo use it was holding.
    async fn cancel_open_session(&self, session_id: &str) -> Result<Option<PaymentSession>, AppError> {
        let Some(session) = get_session(&self.db, session_id).await? else {
            warn!(session_id = %session_id, "Cancellation for unknown session");
            return Ok(None);
        };
        if !cancel_session(&self.db, session_id).await? {
            return Ok(None);
        }
        if let Some(code) = session.promo_code.as_deref() {
            release_use(&self.db, code, session.analysis_id).await?;
        }
        Ok(Some(session))
    }

    async fn require_session(&self, session_id: &str) -> Result<PaymentSession, AppError> {
        get_session(&self.db, session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payment session {session_id} not found")))
    }

    /// Checks a session with the provider after the user is redirected back.
    #[instrument(skip(self))]
    pub async fn reconcile_session(&self, session_id: &str) -> Result<Reconciliation, AppError> {
        let session = self.require_session(session_id).await?;
        match session.status {
            SessionStatus::Completed => {
                return Ok(Reconciliation::Confirmed {
                    confirmation: self.already_confirmed(session).await?,
                })
            }
            SessionStatus::Cancelled => {
                return Ok(Reconciliation::Expired {
                    session_id: session.id,
                })
            }
            SessionStatus::Created => {}
        }

        let status = self
            .provider
            .retrieve_session(&session.id)
            .await
            .map_err(|e| {
                error!(error = %e, session_id = %session.id, "Session lookup failed");
                AppError::PaymentProvider(e.to_string())
            })?;
        match status {
            ProviderSessionStatus::Paid => Ok(Reconciliation::Confirmed {
                confirmation: self.confirm_payment(&session.id).await?,
            }),
            ProviderSessionStatus::Expired => {
                self.cancel_open_session(&session.id).await?;
                Ok(Reconciliation::Expired {
                    session_id: session.id,
                })
            }
            ProviderSessionStatus::Open => Ok(Reconciliation::Pending {
                session_id: session.id,
            }),
        }
    }

    /// Applies a verified provider event.
    #[instrument(skip(self, event), fields(event_id = %event.id))]
    pub async fn handle_webhook_event(&self, event: WebhookEvent) -> Result<WebhookAction, AppError> {
        let Some(session) = event.session else {
            info!(event_type = ?event.event_type, "Ignoring webhook event");
            return Ok(WebhookAction::Ignored);
        };
        let session_id = session.session_id.clone();

        match event.event_type {
            WebhookEventType::CheckoutSessionCompleted if !session.is_paid() => {
                info!(session_id = %session_id, "Checkout completed, payment still processing");
                Ok(WebhookAction::Ignored)
            }
            WebhookEventType::CheckoutSessionCompleted
            | WebhookEventType::CheckoutSessionAsyncPaymentSucceeded => {
                match self.confirm_payment(&session_id).await {
                    Ok(_) => Ok(WebhookAction::Confirmed { session_id }),
                    // Neither retrying the event nor failing it changes anything.
                    Err(AppError::NotFound(_)) | Err(AppError::Conflict(_)) => {
                        warn!(session_id = %session_id, "Webhook confirmation not applicable");
                        Ok(WebhookAction::Ignored)
                    }
                    Err(e) => Err(e),
                }
            }
            WebhookEventType::CheckoutSessionExpired => {
                if self.cancel_open_session(&session_id).await?.is_some() {
                    info!(session_id = %session_id, "Checkout session expired");
                    Ok(WebhookAction::Cancelled { session_id })
                } else {
                    Ok(WebhookAction::Ignored)
                }
            }
            WebhookEventType::CheckoutSessionAsyncPaymentFailed => {
                let Some(stored) = self.cancel_open_session(&session_id).await? else {
                    return Ok(WebhookAction::Ignored);
                };
                mark_payment_failed(&self.db, stored.analysis_id, Utc::now()).await?;
                warn!(session_id = %session_id, analysis_id = %stored.analysis_id, "Payment failed");
                Ok(WebhookAction::PaymentFailed { session_id })
            }
            WebhookEventType::Unknown(_) => Ok(WebhookAction::Ignored),
        }
    }

    // ────────────────────────────────────────────
    // Premium generation
    // ────────────────────────────────────────────

    /// Generates every product in `products` this call manages to claim.
    /// Products owned by a concurrent run, or already ready, are left alone.
    async fn generate_premium(
        &self,
        record: &AnalysisRecord,
        products: &[ProductId],
    ) -> Result<GenerationReport, AppError> {
        let now = Utc::now();
        let stale_before = now
            - chrono::Duration::from_std(self.llm_timeout * 2)
                .unwrap_or_else(|_| chrono::Duration::hours(1));

        let mut claimed = Vec::new();
        for &product in products {
            if claim_product(&self.db, record.id, product, now, stale_before).await? {
                claimed.push(product);
            }
        }
        if claimed.is_empty() {
            return self.generation_report(record).await;
        }

        set_generation_status(&self.db, record.id, GenerationStatus::InProgress, now).await?;
        info!(analysis_id = %record.id, products = ?claimed, "Generating premium results");

        let mut running: FuturesUnordered<_> = claimed
            .iter()
            .map(|&product| async move { (product, self.generate_product(product, record).await) })
            .collect();

        while let Some((product, outcome)) = running.next().await {
            match outcome.error_kind() {
                None => info!(%product, "Premium result ready"),
                Some(kind) => warn!(%product, ?kind, "Premium result failed"),
            }
            store_product_outcome(&self.db, record.id, product, &outcome, Utc::now()).await?;
        }

        let report = self.generation_report(record).await?;
        set_generation_status(&self.db, record.id, report.status, Utc::now()).await?;
        info!(
            analysis_id = %record.id,
            status = report.status.as_str(),
            ready = report.ready,
            failed = report.failed,
            "Premium generation finished"
        );
        Ok(report)
    }

    async fn generate_product(&self, product: ProductId, record: &AnalysisRecord) -> ProductOutcome {
        if product.requires_job_posting() && !has_text(record.job_posting.as_deref()) {
            return AnalysisOutcome::failed(
                OutcomeErrorKind::MissingJobPosting,
                format!("{} needs a job posting", product.display_name()),
            );
        }

        let call = self
            .analyzer
            .premium(product, &record.source_text, record.job_posting.as_deref());
        match tokio::time::timeout(self.llm_timeout, call).await {
            Ok(outcome) => outcome,
            Err(_) => AnalysisOutcome::failed(
                OutcomeErrorKind::Timeout,
                format!(
                    "{} did not finish within {}s",
                    product.display_name(),
                    self.llm_timeout.as_secs()
                ),
            ),
        }
    }

    async fn generation_report(&self, record: &AnalysisRecord) -> Result<GenerationReport, AppError> {
        let results = list_premium_results(&self.db, record.id).await?;
        let count = |status: PremiumStatus| {
            results
                .iter()
                .filter(|r| r.status == status && record.requested_products.contains(&r.product))
                .count()
        };
        let total = record.requested_products.len();
        let ready = count(PremiumStatus::Ready);
        let failed = count(PremiumStatus::Failed);
        let pending = total.saturating_sub(ready + failed);
        let status = if results.is_empty() {
            GenerationStatus::NotStarted
        } else {
            GenerationStatus::from_counts(ready, failed, pending)
        };
        Ok(GenerationReport {
            status,
            total,
            ready,
            failed,
            pending,
        })
    }

    /// Re-runs products whose last attempt failed.
    #[instrument(skip(self))]
    pub async fn retry_generation(&self, analysis_id: Uuid) -> Result<GenerationReport, AppError> {
        let record = require_analysis(&self.db, analysis_id).await?;
        if record.payment_status != PaymentStatus::Paid {
            return Err(AppError::Forbidden(
                "Premium results require payment".to_string(),
            ));
        }
        self.generate_premium(&record, &record.requested_products).await
    }

    // ────────────────────────────────────────────
    // Results
    // ────────────────────────────────────────────

    pub async fn get_results(
        &self,
        analysis_id: Uuid,
        filter: Option<&str>,
    ) -> Result<ResultsView, AppError> {
        let filter = filter
            .map(|raw| {
                ProductOrBundle::parse(raw.trim()).ok_or_else(|| {
                    AppError::Validation(format!("Unknown product or bundle '{raw}'"))
                })
            })
            .transpose()?;

        let record = require_analysis(&self.db, analysis_id).await?;
        let paid = record.payment_status == PaymentStatus::Paid;

        let wanted = match filter {
            None if !paid => return Ok(ResultsView::new(record, Vec::new())),
            None => record.requested_products.clone(),
            Some(item) => {
                if !paid {
                    return Err(AppError::Forbidden(
                        "Premium results require payment".to_string(),
                    ));
                }
                let members = item.products();
                if let Some(missing) = members
                    .iter()
                    .find(|p| !record.requested_products.contains(p))
                {
                    return Err(AppError::Forbidden(format!(
                        "{} was not purchased for this analysis",
                        missing.display_name()
                    )));
                }
                members
            }
        };

        let premium = list_premium_results(&self.db, analysis_id)
            .await?
            .into_iter()
            .filter(|r| wanted.contains(&r.product))
            .collect();
        Ok(ResultsView::new(record, premium))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::analysis::results::{
        CoverLetter, FreeCritique, InterviewPrep, InterviewQuestion, JobFit, ProductResult,
        QuestionCategory, ResumeCritique, ResumeRewrite, RewrittenSection,
    };
    use crate::catalog::Bundle;
    use crate::db::test_pool;
    use crate::models::promo::DiscountType;
    use crate::payments::promo::{create_promo_code, get_promo_code, NewPromoCode};
    use crate::payments::provider::{ProviderCheckout, ProviderError};
    use crate::payments::webhook::CheckoutSessionData;
    use crate::records::analyses::{get_analysis, insert_analysis, NewAnalysis};

    const POSTING: &str = "Senior Rust engineer. Tokio, axum, Postgres.";

    fn sample_result(product: ProductId) -> ProductResult {
        match product {
            ProductId::ResumeAnalysis => ProductResult::ResumeAnalysis(ResumeCritique {
                overall_score: 72,
                summary: "Solid backend profile".to_string(),
                categories: Vec::new(),
            }),
            ProductId::JobFitAnalysis => ProductResult::JobFitAnalysis(JobFit {
                match_score: 81,
                summary: "Strong match".to_string(),
                matched_skills: vec!["Rust".to_string()],
                gaps: Vec::new(),
                recommendations: Vec::new(),
            }),
            ProductId::CoverLetter => ProductResult::CoverLetter(CoverLetter {
                letter: "Dear hiring team".to_string(),
            }),
            ProductId::ResumeRewrite => ProductResult::ResumeRewrite(ResumeRewrite {
                summary: String::new(),
                sections: vec![RewrittenSection {
                    title: "Experience".to_string(),
                    rewritten: "Led the payments team".to_string(),
                }],
            }),
            ProductId::MockInterview => ProductResult::MockInterview(InterviewPrep {
                categories: vec![QuestionCategory {
                    name: "Technical".to_string(),
                    questions: vec![InterviewQuestion {
                        question: "Explain ownership".to_string(),
                        guidance: String::new(),
                    }],
                }],
            }),
        }
    }

    #[derive(Default)]
    struct FakeAnalyzer {
        calls: Mutex<Vec<ProductId>>,
        slow: Vec<ProductId>,
        broken: Vec<ProductId>,
        /// Added to every call.
        delay: Option<Duration>,
    }

    impl FakeAnalyzer {
        fn calls(&self) -> Vec<ProductId> {
            let mut calls = self.calls.lock().unwrap().clone();
            calls.sort();
            calls
        }
    }

    #[async_trait]
    impl ResumeAnalyzer for FakeAnalyzer {
        async fn free_critique(&self, _resume_text: &str) -> FreeOutcome {
            AnalysisOutcome::Ok {
                result: FreeCritique {
                    overall_score: 60,
                    summary: "Decent".to_string(),
                    top_issues: Vec::new(),
                    strengths: Vec::new(),
                },
            }
        }

        async fn premium(
            &self,
            product: ProductId,
            _resume_text: &str,
            _job_posting: Option<&str>,
        ) -> ProductOutcome {
            self.calls.lock().unwrap().push(product);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.slow.contains(&product) {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            if self.broken.contains(&product) {
                return AnalysisOutcome::failed(OutcomeErrorKind::Upstream, "upstream down");
            }
            AnalysisOutcome::Ok {
                result: sample_result(product),
            }
        }
    }

    struct FakeProvider {
        created: AtomicUsize,
        fail: bool,
        status: ProviderSessionStatus,
    }

    impl Default for FakeProvider {
        fn default() -> Self {
            Self {
                created: AtomicUsize::new(0),
                fail: false,
                status: ProviderSessionStatus::Paid,
            }
        }
    }

    #[async_trait]
    impl PaymentProvider for FakeProvider {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn create_checkout_session(
            &self,
            request: &CheckoutRequest,
        ) -> Result<ProviderCheckout, ProviderError> {
            if self.fail {
                return Err(ProviderError::Api {
                    status: 500,
                    message: "secret upstream detail".to_string(),
                });
            }
            let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(ProviderCheckout {
                session_id: format!("cs_fake_{n}"),
                url: format!("https://checkout.test/{}/{n}", request.analysis_id),
            })
        }

        async fn retrieve_session(
            &self,
            _session_id: &str,
        ) -> Result<ProviderSessionStatus, ProviderError> {
            Ok(self.status)
        }
    }

    struct Harness {
        pool: SqlitePool,
        analyzer: Arc<FakeAnalyzer>,
        provider: Arc<FakeProvider>,
        pricing: Arc<PricingTable>,
    }

    impl Harness {
        async fn new() -> Self {
            Self::with(FakeAnalyzer::default(), FakeProvider::default()).await
        }

        async fn with(analyzer: FakeAnalyzer, provider: FakeProvider) -> Self {
            Self {
                pool: test_pool().await,
                analyzer: Arc::new(analyzer),
                provider: Arc::new(provider),
                pricing: Arc::new(PricingTable::default()),
            }
        }

        fn pipeline(&self) -> Pipeline {
            Pipeline {
                db: self.pool.clone(),
                analyzer: self.analyzer.clone(),
                provider: self.provider.clone(),
                pricing: self.pricing.clone(),
                llm_timeout: Duration::from_millis(200),
                public_base_url: Arc::from("https://app.test"),
            }
        }

        async fn upload(&self, job_posting: Option<&str>) -> Uuid {
            insert_analysis(
                &self.pool,
                NewAnalysis {
                    id: Uuid::new_v4(),
                    file_name: "cv.pdf",
                    source_text: "Jane Doe, Rust engineer",
                    job_posting,
                },
                Utc::now(),
            )
            .await
            .unwrap()
            .id
        }

        async fn checkout(&self, analysis_id: Uuid, item: &str) -> Result<SessionOutcome, AppError> {
            self.checkout_with(analysis_id, item, None).await
        }

        async fn checkout_with(
            &self,
            analysis_id: Uuid,
            item: &str,
            promo_code: Option<&str>,
        ) -> Result<SessionOutcome, AppError> {
            self.pipeline()
                .create_payment_session(CreateSession {
                    analysis_id,
                    product_or_bundle: item.to_string(),
                    job_posting: None,
                    promo_code: promo_code.map(str::to_string),
                    region: Region::Us,
                })
                .await
        }
    }

    async fn limited_promo(pool: &SqlitePool, code: &str, max_uses: i64) {
        create_promo_code(
            pool,
            NewPromoCode {
                code: code.to_string(),
                discount_type: DiscountType::Percentage,
                discount_value: 50,
                currency: None,
                applies_to: None,
                max_uses: Some(max_uses),
                valid_from: None,
                valid_until: None,
            },
            Utc::now(),
        )
        .await
        .unwrap();
    }

    async fn promo_uses(pool: &SqlitePool, code: &str) -> i64 {
        get_promo_code(pool, code).await.unwrap().unwrap().current_uses
    }

    fn redirect_id(outcome: SessionOutcome) -> String {
        match outcome {
            SessionOutcome::Redirect { session_id, .. } => session_id,
            other => panic!("expected redirect, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_single_product_purchase_generates_only_that_product() {
        let h = Harness::new().await;
        let id = h.upload(None).await;

        let outcome = h.checkout(id, "resume_analysis").await.unwrap();
        let SessionOutcome::Redirect { amount, ref currency, ref products, .. } = outcome else {
            panic!("expected redirect");
        };
        assert_eq!((amount, currency.as_str()), (1000, "usd"));
        assert_eq!(products, &vec![ProductId::ResumeAnalysis]);
        let session_id = redirect_id(outcome);

        let confirmation = h.pipeline().confirm_payment(&session_id).await.unwrap();
        assert!(!confirmation.already_confirmed);
        assert_eq!(confirmation.generation.status, GenerationStatus::Complete);
        assert_eq!(confirmation.generation.total, 1);
        assert_eq!(h.analyzer.calls(), vec![ProductId::ResumeAnalysis]);

        let record = get_analysis(&h.pool, id).await.unwrap().unwrap();
        assert_eq!(record.payment_status, PaymentStatus::Paid);
        assert_eq!(record.generation_status, GenerationStatus::Complete);
    }

    #[tokio::test]
    async fn test_bundle_purchase_generates_every_member() {
        let h = Harness::new().await;
        let id = h.upload(Some(POSTING)).await;

        let session_id = redirect_id(h.checkout(id, "complete_package").await.unwrap());
        let confirmation = h.pipeline().confirm_payment(&session_id).await.unwrap();
        assert_eq!(confirmation.generation.status, GenerationStatus::Complete);
        assert_eq!(confirmation.generation.ready, 3);

        let mut expected = Bundle::CompletePackage.members().to_vec();
        expected.sort();
        assert_eq!(h.analyzer.calls(), expected);

        let view = h
            .pipeline()
            .get_results(id, Some("complete_package"))
            .await
            .unwrap();
        let mut delivered: Vec<_> = view.premium_results.iter().map(|r| r.product).collect();
        delivered.sort();
        assert_eq!(delivered, expected);
        assert!(view
            .premium_results
            .iter()
            .all(|r| r.status == PremiumStatus::Ready && r.outcome.is_some()));
    }

    #[tokio::test]
    async fn test_bundle_needing_posting_is_rejected_without_one() {
        let h = Harness::new().await;
        let id = h.upload(None).await;
        let err = h.checkout(id, "complete_package").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(h.provider.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_one_slow_product_gives_partial_delivery() {
        let analyzer = FakeAnalyzer {
            slow: vec![ProductId::CoverLetter],
            ..Default::default()
        };
        let h = Harness::with(analyzer, FakeProvider::default()).await;
        let id = h.upload(Some(POSTING)).await;

        let session_id = redirect_id(h.checkout(id, "complete_package").await.unwrap());
        let report = h
            .pipeline()
            .confirm_payment(&session_id)
            .await
            .unwrap()
            .generation;
        assert_eq!(report.status, GenerationStatus::Partial);
        assert_eq!((report.ready, report.failed, report.pending), (2, 1, 0));

        let view = h.pipeline().get_results(id, None).await.unwrap();
        let letter = view
            .premium_results
            .iter()
            .find(|r| r.product == ProductId::CoverLetter)
            .unwrap();
        assert_eq!(letter.status, PremiumStatus::Failed);
        assert_eq!(
            letter.outcome.as_ref().and_then(|o| o.error_kind()),
            Some(OutcomeErrorKind::Timeout)
        );
        assert_eq!(view.generation_status, GenerationStatus::Partial);
    }

    #[tokio::test]
    async fn test_double_confirmation_has_no_second_effect() {
        let h = Harness::new().await;
        let id = h.upload(Some(POSTING)).await;
        let session_id = redirect_id(h.checkout(id, "complete_package").await.unwrap());

        h.pipeline().confirm_payment(&session_id).await.unwrap();
        let before = get_analysis(&h.pool, id).await.unwrap().unwrap();
        let results_before = list_premium_results(&h.pool, id).await.unwrap();

        let second = h.pipeline().confirm_payment(&session_id).await.unwrap();
        assert!(second.already_confirmed);
        assert_eq!(second.generation.status, GenerationStatus::Complete);

        let after = get_analysis(&h.pool, id).await.unwrap().unwrap();
        assert_eq!(before.updated_at, after.updated_at);
        let results_after = list_premium_results(&h.pool, id).await.unwrap();
        let stamps = |rs: &[PremiumResult]| rs.iter().map(|r| r.updated_at).collect::<Vec<_>>();
        assert_eq!(stamps(&results_before), stamps(&results_after));
        assert_eq!(h.analyzer.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_webhook_delivery_is_idempotent() {
        let h = Harness::new().await;
        let id = h.upload(None).await;
        let session_id = redirect_id(h.checkout(id, "resume_rewrite").await.unwrap());

        let event = || WebhookEvent {
            id: "evt_1".to_string(),
            event_type: WebhookEventType::CheckoutSessionCompleted,
            session: Some(CheckoutSessionData {
                session_id: session_id.clone(),
                payment_status: Some("paid".to_string()),
                analysis_id: Some(id.to_string()),
            }),
        };
        let first = h.pipeline().handle_webhook_event(event()).await.unwrap();
        assert_eq!(first, WebhookAction::Confirmed { session_id: session_id.clone() });
        let second = h.pipeline().handle_webhook_event(event()).await.unwrap();
        assert_eq!(second, WebhookAction::Confirmed { session_id: session_id.clone() });
        assert_eq!(h.analyzer.calls(), vec![ProductId::ResumeRewrite]);
    }

    #[tokio::test]
    async fn test_completed_but_unpaid_checkout_waits() {
        let h = Harness::new().await;
        let id = h.upload(None).await;
        let session_id = redirect_id(h.checkout(id, "resume_rewrite").await.unwrap());

        let event = WebhookEvent {
            id: "evt_1".to_string(),
            event_type: WebhookEventType::CheckoutSessionCompleted,
            session: Some(CheckoutSessionData {
                session_id,
                payment_status: Some("unpaid".to_string()),
                analysis_id: None,
            }),
        };
        assert_eq!(
            h.pipeline().handle_webhook_event(event).await.unwrap(),
            WebhookAction::Ignored
        );
        let record = get_analysis(&h.pool, id).await.unwrap().unwrap();
        assert_eq!(record.payment_status, PaymentStatus::Unpaid);
        assert!(h.analyzer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_async_payment_failure_marks_analysis_failed() {
        let h = Harness::new().await;
        let id = h.upload(None).await;
        let session_id = redirect_id(h.checkout(id, "resume_rewrite").await.unwrap());

        let event = WebhookEvent {
            id: "evt_2".to_string(),
            event_type: WebhookEventType::CheckoutSessionAsyncPaymentFailed,
            session: Some(CheckoutSessionData {
                session_id: session_id.clone(),
                payment_status: Some("unpaid".to_string()),
                analysis_id: None,
            }),
        };
        assert_eq!(
            h.pipeline().handle_webhook_event(event).await.unwrap(),
            WebhookAction::PaymentFailed { session_id: session_id.clone() }
        );
        let record = get_analysis(&h.pool, id).await.unwrap().unwrap();
        assert_eq!(record.payment_status, PaymentStatus::Failed);

        let err = h.pipeline().confirm_payment(&session_id).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        let again = h.checkout(id, "resume_rewrite").await.unwrap_err();
        assert!(matches!(again, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_free_checkout_skips_provider() {
        let h = Harness::new().await;
        let id = h.upload(None).await;
        create_promo_code(
            &h.pool,
            NewPromoCode {
                code: "FREEBIE".to_string(),
                discount_type: DiscountType::Percentage,
                discount_value: 100,
                currency: None,
                applies_to: None,
                max_uses: None,
                valid_from: None,
                valid_until: None,
            },
            Utc::now(),
        )
        .await
        .unwrap();

        let outcome = h
            .checkout_with(id, "interview_ready", Some("freebie"))
            .await
            .unwrap();
        let SessionOutcome::Confirmed { amount, generation, .. } = outcome else {
            panic!("expected confirmed, got {outcome:?}");
        };
        assert_eq!(amount, 0);
        assert_eq!(generation.status, GenerationStatus::Complete);
        assert_eq!(generation.ready, 2);
        assert_eq!(h.provider.created.load(Ordering::SeqCst), 0);

        let record = get_analysis(&h.pool, id).await.unwrap().unwrap();
        assert_eq!(record.payment_status, PaymentStatus::Paid);
        assert_eq!(promo_uses(&h.pool, "FREEBIE").await, 1);
    }

    #[tokio::test]
    async fn test_promo_use_reserved_at_checkout_and_redeemed_once() {
        let h = Harness::new().await;
        let id = h.upload(None).await;
        limited_promo(&h.pool, "HALF", 10).await;

        let outcome = h.checkout_with(id, "resume_analysis", Some("HALF")).await.unwrap();
        let SessionOutcome::Redirect { amount, ref session_id, .. } = outcome else {
            panic!("expected redirect");
        };
        assert_eq!(amount, 500);
        assert_eq!(promo_uses(&h.pool, "HALF").await, 1);

        // Clicking checkout again reuses the session and the reservation.
        h.checkout_with(id, "resume_analysis", Some("HALF")).await.unwrap();
        assert_eq!(promo_uses(&h.pool, "HALF").await, 1);

        h.pipeline().confirm_payment(session_id).await.unwrap();
        h.pipeline().confirm_payment(session_id).await.unwrap();
        assert_eq!(promo_uses(&h.pool, "HALF").await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_checkouts_cannot_exceed_promo_limit() {
        let h = Harness::new().await;
        limited_promo(&h.pool, "ONCE", 1).await;
        let mut analyses = Vec::new();
        for _ in 0..3 {
            analyses.push(h.upload(None).await);
        }

        let outcomes = futures::future::join_all(
            analyses
                .iter()
                .map(|&id| h.checkout_with(id, "resume_analysis", Some("ONCE"))),
        )
        .await;

        let discounted = outcomes
            .iter()
            .filter(|o| matches!(o, Ok(SessionOutcome::Redirect { amount: 500, .. })))
            .count();
        assert_eq!(discounted, 1);
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| matches!(o, Err(AppError::Validation(_))))
                .count(),
            2
        );
        assert_eq!(promo_uses(&h.pool, "ONCE").await, 1);
        assert_eq!(h.provider.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_checkout_hands_back_promo_use() {
        let h = Harness::new().await;
        limited_promo(&h.pool, "ONCE", 1).await;
        let first = h.upload(None).await;
        let second = h.upload(None).await;

        let session_id = redirect_id(
            h.checkout_with(first, "resume_analysis", Some("ONCE"))
                .await
                .unwrap(),
        );
        assert!(matches!(
            h.checkout_with(second, "resume_analysis", Some("ONCE")).await,
            Err(AppError::Validation(_))
        ));

        let expired = WebhookEvent {
            id: "evt_3".to_string(),
            event_type: WebhookEventType::CheckoutSessionExpired,
            session: Some(CheckoutSessionData {
                session_id: session_id.clone(),
                payment_status: Some("unpaid".to_string()),
                analysis_id: None,
            }),
        };
        assert_eq!(
            h.pipeline().handle_webhook_event(expired).await.unwrap(),
            WebhookAction::Cancelled { session_id }
        );
        assert_eq!(promo_uses(&h.pool, "ONCE").await, 0);

        h.checkout_with(second, "resume_analysis", Some("ONCE"))
            .await
            .unwrap();
        assert_eq!(promo_uses(&h.pool, "ONCE").await, 1);
    }

    #[tokio::test]
    async fn test_failed_checkout_creation_releases_promo_use() {
        let h = Harness::with(
            FakeAnalyzer::default(),
            FakeProvider {
                fail: true,
                ..Default::default()
            },
        )
        .await;
        limited_promo(&h.pool, "ONCE", 1).await;
        let id = h.upload(None).await;

        assert!(matches!(
            h.checkout_with(id, "resume_analysis", Some("ONCE")).await,
            Err(AppError::PaymentProvider(_))
        ));
        assert_eq!(promo_uses(&h.pool, "ONCE").await, 0);
    }

    #[tokio::test]
    async fn test_dropped_confirmation_still_delivers() {
        let analyzer = FakeAnalyzer {
            delay: Some(Duration::from_millis(100)),
            ..Default::default()
        };
        let h = Harness::with(analyzer, FakeProvider::default()).await;
        let id = h.upload(Some(POSTING)).await;
        let session_id = redirect_id(h.checkout(id, "complete_package").await.unwrap());

        {
            let pipeline = h.pipeline();
            let confirm = pipeline.confirm_payment(&session_id);
            tokio::pin!(confirm);
            // Drop the confirmation once the model calls are under way.
            loop {
                tokio::select! {
                    _ = &mut confirm => panic!("confirmation finished before it was dropped"),
                    _ = tokio::time::sleep(Duration::from_millis(5)) => {
                        if !h.analyzer.calls().is_empty() {
                            break;
                        }
                    }
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(400)).await;
        let results = list_premium_results(&h.pool, id).await.unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.status == PremiumStatus::Ready));
        let record = get_analysis(&h.pool, id).await.unwrap().unwrap();
        assert_eq!(record.generation_status, GenerationStatus::Complete);

        let again = h.pipeline().confirm_payment(&session_id).await.unwrap();
        assert!(again.already_confirmed);
        assert_eq!(again.generation.ready, 3);
        assert_eq!(h.analyzer.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_interrupted_settlement_is_finished_by_next_confirmation() {
        let h = Harness::new().await;
        let id = h.upload(None).await;
        let session_id = redirect_id(h.checkout(id, "resume_analysis").await.unwrap());

        // The session completed but nothing after it ran.
        assert!(complete_session(&h.pool, &session_id, Utc::now()).await.unwrap());

        let confirmation = h.pipeline().confirm_payment(&session_id).await.unwrap();
        assert!(confirmation.already_confirmed);
        assert_eq!(confirmation.generation.status, GenerationStatus::Complete);
        let record = get_analysis(&h.pool, id).await.unwrap().unwrap();
        assert_eq!(record.payment_status, PaymentStatus::Paid);
        assert_eq!(h.analyzer.calls(), vec![ProductId::ResumeAnalysis]);
    }

    #[tokio::test]
    async fn test_confirmation_restarts_missing_and_stale_products() {
        let h = Harness::new().await;
        let id = h.upload(None).await;
        let session_id = redirect_id(h.checkout(id, "interview_ready").await.unwrap());

        let now = Utc::now();
        assert!(complete_session(&h.pool, &session_id, now).await.unwrap());
        let products = [ProductId::ResumeAnalysis, ProductId::MockInterview];
        assert!(mark_paid(&h.pool, id, &products, now).await.unwrap());
        // One product was claimed long ago and abandoned; the other never started.
        let long_ago = now - chrono::Duration::seconds(30);
        assert!(claim_product(&h.pool, id, ProductId::ResumeAnalysis, long_ago, long_ago)
            .await
            .unwrap());

        let confirmation = h.pipeline().confirm_payment(&session_id).await.unwrap();
        assert!(confirmation.already_confirmed);
        assert_eq!(confirmation.generation.status, GenerationStatus::Complete);
        assert_eq!(confirmation.generation.ready, 2);
        assert_eq!(
            h.analyzer.calls(),
            vec![ProductId::ResumeAnalysis, ProductId::MockInterview]
        );
    }

    #[tokio::test]
    async fn test_unpaid_results_are_free_only() {
        let h = Harness::new().await;
        let id = h.upload(None).await;

        let view = h.pipeline().get_results(id, None).await.unwrap();
        assert_eq!(view.payment_status, PaymentStatus::Unpaid);
        assert!(view.premium_results.is_empty());

        let err = h
            .pipeline()
            .get_results(id, Some("resume_analysis"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let retry = h.pipeline().retry_generation(id).await.unwrap_err();
        assert!(matches!(retry, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_results_outside_purchase_are_forbidden() {
        let h = Harness::new().await;
        let id = h.upload(None).await;
        let session_id = redirect_id(h.checkout(id, "resume_analysis").await.unwrap());
        h.pipeline().confirm_payment(&session_id).await.unwrap();

        let err = h
            .pipeline()
            .get_results(id, Some("interview_ready"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        assert!(h.pipeline().get_results(id, Some("resume_analysis")).await.is_ok());
    }

    #[tokio::test]
    async fn test_paid_analysis_cannot_start_another_checkout() {
        let h = Harness::new().await;
        let id = h.upload(None).await;
        let session_id = redirect_id(h.checkout(id, "resume_analysis").await.unwrap());
        h.pipeline().confirm_payment(&session_id).await.unwrap();

        let err = h.checkout(id, "mock_interview").await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_second_paid_session_conflicts() {
        let h = Harness::new().await;
        let id = h.upload(None).await;
        let first = redirect_id(h.checkout(id, "resume_analysis").await.unwrap());
        let second = redirect_id(h.checkout(id, "mock_interview").await.unwrap());
        assert_ne!(first, second);

        h.pipeline().confirm_payment(&first).await.unwrap();
        let err = h.pipeline().confirm_payment(&second).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let record = get_analysis(&h.pool, id).await.unwrap().unwrap();
        assert_eq!(record.requested_products, vec![ProductId::ResumeAnalysis]);
    }

    #[tokio::test]
    async fn test_repeated_click_reuses_open_session() {
        let h = Harness::new().await;
        let id = h.upload(None).await;
        let first = redirect_id(h.checkout(id, "resume_analysis").await.unwrap());
        let again = redirect_id(h.checkout(id, "resume_analysis").await.unwrap());
        assert_eq!(first, again);
        assert_eq!(h.provider.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_checkout_error_cases() {
        let h = Harness::with(
            FakeAnalyzer::default(),
            FakeProvider {
                fail: true,
                ..Default::default()
            },
        )
        .await;
        let id = h.upload(None).await;

        assert!(matches!(
            h.checkout(id, "gold_membership").await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            h.checkout(Uuid::new_v4(), "resume_analysis").await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            h.checkout(id, "resume_analysis").await,
            Err(AppError::PaymentProvider(_))
        ));
        assert!(matches!(
            h.pipeline().confirm_payment("cs_missing").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_price_is_configuration_error() {
        let mut h = Harness::new().await;
        h.pricing = Arc::new(PricingTable::from_entries([(
            Region::Us,
            ProductOrBundle::Product(ProductId::ResumeAnalysis),
            1000,
        )]));
        let id = h.upload(None).await;
        assert!(matches!(
            h.checkout(id, "mock_interview").await,
            Err(AppError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_retry_regenerates_only_failed_products() {
        let analyzer = FakeAnalyzer {
            broken: vec![ProductId::MockInterview],
            ..Default::default()
        };
        let h = Harness::with(analyzer, FakeProvider::default()).await;
        let id = h.upload(None).await;
        let session_id = redirect_id(h.checkout(id, "interview_ready").await.unwrap());

        let report = h.pipeline().confirm_payment(&session_id).await.unwrap().generation;
        assert_eq!(report.status, GenerationStatus::Partial);

        let retried = h.pipeline().retry_generation(id).await.unwrap();
        assert_eq!(retried.status, GenerationStatus::Partial);
        assert_eq!(
            h.analyzer.calls(),
            vec![
                ProductId::ResumeAnalysis,
                ProductId::MockInterview,
                ProductId::MockInterview
            ]
        );
    }

    #[tokio::test]
    async fn test_success_redirect_confirms_when_provider_says_paid() {
        let h = Harness::new().await;
        let id = h.upload(None).await;
        let session_id = redirect_id(h.checkout(id, "resume_analysis").await.unwrap());

        let outcome = h.pipeline().reconcile_session(&session_id).await.unwrap();
        assert!(matches!(
            outcome,
            Reconciliation::Confirmed { ref confirmation } if !confirmation.already_confirmed
        ));
        let again = h.pipeline().reconcile_session(&session_id).await.unwrap();
        assert!(matches!(
            again,
            Reconciliation::Confirmed { ref confirmation } if confirmation.already_confirmed
        ));
    }

    #[tokio::test]
    async fn test_success_redirect_while_payment_open() {
        let h = Harness::with(
            FakeAnalyzer::default(),
            FakeProvider {
                status: ProviderSessionStatus::Open,
                ..Default::default()
            },
        )
        .await;
        let id = h.upload(None).await;
        let session_id = redirect_id(h.checkout(id, "resume_analysis").await.unwrap());

        let outcome = h.pipeline().reconcile_session(&session_id).await.unwrap();
        assert!(matches!(outcome, Reconciliation::Pending { .. }));
        let record = get_analysis(&h.pool, id).await.unwrap().unwrap();
        assert_eq!(record.payment_status, PaymentStatus::Unpaid);
    }

    #[test]
    fn test_job_posting_normalization() {
        assert_eq!(normalize_job_posting(Some("   ")).unwrap(), None);
        assert_eq!(
            normalize_job_posting(Some("  Rust dev ")).unwrap().as_deref(),
            Some("Rust dev")
        );
        let long = "x".repeat(MAX_JOB_POSTING_CHARS + 1);
        assert!(matches!(
            normalize_job_posting(Some(&long)),
            Err(AppError::Validation(_))
        ));
    }
}
