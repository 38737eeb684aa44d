//! Resume analyzer: pluggable, trait-based LLM collaborator.
//!
//! Default: `LlmAnalyzer`, which goes through `LlmClient`.
//! `AppState` holds an `Arc<dyn ResumeAnalyzer>`; tests swap in fakes.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::analysis::prompts::{analysis_system, free_critique_prompt, product_prompt};
use crate::analysis::results::{
    parse_free_answer, parse_product_answer, AnalysisOutcome, FreeOutcome, OutcomeErrorKind,
    ProductOutcome,
};
use crate::catalog::ProductId;
use crate::llm_client::{LlmClient, LlmError};

/// The analysis collaborator. Implementations never fail as a whole:
/// upstream problems and unreadable answers come back as tagged error outcomes.
#[async_trait]
pub trait ResumeAnalyzer: Send + Sync {
    async fn free_critique(&self, resume_text: &str) -> FreeOutcome;

    async fn premium(
        &self,
        product: ProductId,
        resume_text: &str,
        job_posting: Option<&str>,
    ) -> ProductOutcome;
}

pub struct LlmAnalyzer {
    llm: LlmClient,
}

impl LlmAnalyzer {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }
}

fn upstream_failure<T>(context: &str, err: LlmError) -> AnalysisOutcome<T> {
    warn!("{context} LLM call failed: {err}");
    AnalysisOutcome::failed(
        OutcomeErrorKind::Upstream,
        "The AI service did not return a result",
    )
}

#[async_trait]
impl ResumeAnalyzer for LlmAnalyzer {
    async fn free_critique(&self, resume_text: &str) -> FreeOutcome {
        let prompt = free_critique_prompt(resume_text);
        match self.llm.call_text(&prompt, &analysis_system()).await {
            Ok(raw) => {
                let outcome = parse_free_answer(&raw);
                if !outcome.is_ok() {
                    warn!("Free critique answer was malformed");
                }
                outcome
            }
            Err(e) => upstream_failure("Free critique", e),
        }
    }

    async fn premium(
        &self,
        product: ProductId,
        resume_text: &str,
        job_posting: Option<&str>,
    ) -> ProductOutcome {
        let prompt = product_prompt(product, resume_text, job_posting);
        debug!(%product, prompt_chars = prompt.len(), "Requesting premium analysis");
        match self.llm.call_text(&prompt, &analysis_system()).await {
            Ok(raw) => {
                let outcome = parse_product_answer(product, &raw);
                if !outcome.is_ok() {
                    warn!(%product, "Premium answer was malformed");
                }
                outcome
            }
            Err(e) => upstream_failure(product.as_str(), e),
        }
    }
}
